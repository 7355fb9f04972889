//! Engine crate: test-case representation, message extraction, the extras
//! dictionary, mutator, calibrator, cull engine, scheduler, classifier,
//! persistence, stats, and the fuzz loop tying them together.

pub mod calibrator;
pub mod classifier;
pub mod config;
pub mod cull;
pub mod dict;
pub mod extractor;
pub mod fuzzer;
pub mod mutator;
pub mod persist;
pub mod scheduler;
pub mod stats;
pub mod testcase;
