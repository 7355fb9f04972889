//! CLI entrypoint (SPEC_FULL.md §4.10): `protofuzz fuzz <config.json>`.
//!
//! Built with `clap::Parser` in the teacher's style
//! (`cargo-libafl/src/main.rs`, `cargo-libafl/src/options/*.rs`), collapsed
//! to the single subcommand this system exposes, with `anyhow::Result` as
//! the top-level error boundary matching every `RunCommand::run_command` in
//! the teacher.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use protofuzz::config::Config;
use protofuzz::dict;
use protofuzz::extractor::{self, Protocol};
use protofuzz::fuzzer::Fuzzer;
use protofuzz_harness::MockHarness;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Coverage-guided, message-aware protocol fuzzer.
#[derive(Debug, Parser)]
#[command(name = "protofuzz", version, about)]
struct Cli {
    /// Path to the JSON config file (spec §6).
    config: PathBuf,

    /// Override the mutator's PRNG seed.
    #[arg(long, default_value_t = protofuzz::mutator::DEFAULT_SEED)]
    seed: u64,

    /// Raise logging verbosity (stackable: -v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "protofuzz=info",
        1 => "protofuzz=debug",
        _ => "protofuzz=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .init();
}

fn load_seeds(input_dir: &PathBuf, protocol: Protocol) -> Result<Vec<(Option<PathBuf>, Vec<Vec<u8>>)>> {
    let mut seeds = Vec::new();
    for entry in fs::read_dir(input_dir)
        .with_context(|| format!("reading seed directory {}", input_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let bytes = fs::read(&path).with_context(|| format!("reading seed {}", path.display()))?;
        let messages = extractor::extract(&bytes, protocol);
        seeds.push((Some(path), messages));
    }
    Ok(seeds)
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let protocol = Protocol::from_config_str(config.protocol.as_deref().unwrap_or(""));
    let extras = match &config.extra {
        Some(path) => dict::load_extras_file(path, 0, None)
            .with_context(|| format!("loading dictionary {}", path.display()))?,
        None => Vec::new(),
    };

    let seeds = load_seeds(&config.input_dir, protocol)?;
    if seeds.is_empty() {
        warn!(input_dir = %config.input_dir.display(), "no seed files found");
    }

    // The real target-execution harness is an external collaborator
    // (spec §1/§6) and is not reimplemented here. `MockHarness` stands in as
    // a runnable reference implementation; wiring up a real forkserver
    // harness means constructing it instead and passing it to the same
    // `Fuzzer` methods below.
    let mut harness = MockHarness::new(config.exec_tmout_ms);

    let mut fuzzer = Fuzzer::new(cli.seed, extras, config.output_dir.clone());
    fuzzer
        .perform_dry_run(&mut harness, seeds)
        .context("dry run calibration failed")?;
    info!(queue_len = fuzzer.queue_len(), "dry run complete");

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    fuzzer.fuzz(&mut harness, running).context("fuzz loop failed")?;
    info!(stats = ?fuzzer.stats(), "fuzzing stopped");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}
