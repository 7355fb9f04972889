//! Fuzz Loop (spec §4.8, C10): glue tying the queue, mutator, calibrator,
//! cull engine, scheduler, and classifier into the dry-run-then-fuzz
//! sequence.
//!
//! Grounded in `original_source/Fuzzer.py::Fuzzer`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use protofuzz_harness::{FaultCode, Harness};
use rand::Rng;
use thiserror::Error;
use tracing::{error, warn};

use crate::calibrator::{self, CalibrationError};
use crate::classifier::{self, ClassifyError};
use crate::cull::{self, TopRated};
use crate::dict::DictEntry;
use crate::mutator::Mutator;
use crate::scheduler::{self, Scheduler};
use crate::stats::Stats;
use crate::testcase::{Message, TestCase};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum FuzzerError {
    #[error("seed produced no instrumentation output (NOINST): {0:?}")]
    SeedNoInstrumentation(Option<PathBuf>),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

pub struct Fuzzer {
    queue: Vec<TestCase>,
    top_rated: TopRated,
    stats: Stats,
    scheduler: Scheduler,
    mutator: Mutator,
    output_dir: PathBuf,
}

impl Fuzzer {
    pub fn new(seed: u64, extras: Vec<DictEntry>, output_dir: PathBuf) -> Self {
        Fuzzer {
            queue: Vec::new(),
            top_rated: TopRated::new(),
            stats: Stats::new(),
            scheduler: Scheduler::new(seed),
            mutator: Mutator::new(seed, extras),
            output_dir,
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Calibrate every seed once and enqueue it, per spec §4.8's dry-run
    /// preamble. A `NOINST` seed is fatal (spec §7).
    pub fn perform_dry_run<H: Harness>(
        &mut self,
        harness: &mut H,
        seeds: Vec<(Option<PathBuf>, Vec<Message>)>,
    ) -> Result<(), FuzzerError> {
        for (file_path, messages) in seeds {
            let mut case = TestCase::new(file_path.clone(), messages);
            match calibrator::calibrate(harness, &mut case, 0, &mut self.stats.calibration) {
                Ok(FaultCode::None) => {}
                Ok(fault) => {
                    warn!(?fault, ?file_path, "seed faulted during dry run calibration");
                    continue;
                }
                Err(CalibrationError::NoInstrumentation) => {
                    return Err(FuzzerError::SeedNoInstrumentation(file_path));
                }
            }
            self.queue.push(case);
            let idx = self.queue.len() - 1;
            cull::cull_queue(&mut self.queue, idx, &mut self.top_rated, &mut self.stats);
        }
        Ok(())
    }

    /// One scheduling round: choose the next case, possibly skip it, else
    /// run its havoc stage against `harness`.
    pub fn fuzz_one<H: Harness>(&mut self, harness: &mut H) -> Result<(), FuzzerError> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let current_idx = self.scheduler.choose_next(self.queue.len());
        let was_fuzzed = self.queue[current_idx].was_fuzzed;

        if self.scheduler.should_skip(self.stats.pending_favored, was_fuzzed) {
            return Ok(());
        }
        self.queue[current_idx].was_fuzzed = true;

        let avg_exec_us = self.stats.calibration.avg_exec_us();
        let avg_bitmap_size = self.stats.calibration.avg_bitmap_size();
        let perf_score =
            scheduler::calculate_score(&mut self.queue[current_idx], avg_exec_us, avg_bitmap_size);
        let stage_count = scheduler::havoc_rounds(perf_score);

        let parent_depth = self.queue[current_idx].depth;
        let mut mutated = self.queue[current_idx].messages.clone();

        let rng = self.mutator.rng_mut();
        let a = rng.gen_range(0..mutated.len());
        let b = rng.gen_range(0..mutated.len());
        let (start, end) = if a <= b { (a, b) } else { (b, a) };

        for _ in 0..stage_count {
            let k = self.mutator.rng_mut().gen_range(0..=7u32);
            let n = 1u32 << k;
            for _ in 0..n {
                let msg_idx = self.mutator.rng_mut().gen_range(start..=end.min(mutated.len() - 1));
                self.mutator.mutate(&mut mutated, msg_idx);
            }

            let timeout_ms = harness.exec_tmout_ms();
            harness.pre_run_target(timeout_ms);
            for message in &mutated {
                harness.run_target(message);
            }
            let fault = harness.post_run_target(timeout_ms);
            self.stats.record_execs(1);

            let queue_cycle = self.scheduler.queue_cycle();
            let outcome = classifier::classify(
                harness,
                mutated.clone(),
                fault,
                parent_depth,
                &mut self.queue,
                &mut self.top_rated,
                &mut self.stats,
                &self.output_dir,
                queue_cycle,
            )?;
            let _ = outcome;
        }

        Ok(())
    }

    /// Run until `running` is cleared (spec §5's interrupt semantics),
    /// reporting an execs/sec line to stdout roughly every two seconds —
    /// deliberately `println!`, not `tracing`; this is operator-facing
    /// status output, not a diagnostic record (SPEC_FULL.md §4.11).
    pub fn fuzz<H: Harness>(&mut self, harness: &mut H, running: Arc<AtomicBool>) -> Result<(), FuzzerError> {
        let mut last_report = Instant::now();
        let mut execs_at_last_report = self.stats.total_execs;

        while running.load(Ordering::SeqCst) {
            if let Err(err) = self.fuzz_one(harness) {
                error!(?err, "fuzz_one failed");
                return Err(err);
            }

            if last_report.elapsed() >= REPORT_INTERVAL {
                let delta = self.stats.total_execs - execs_at_last_report;
                let rate = delta as f64 / last_report.elapsed().as_secs_f64();
                println!(
                    "execs: {} ({:.1}/s) | queue: {} | crashes: {} | hangs: {}",
                    self.stats.total_execs,
                    rate,
                    self.queue.len(),
                    self.stats.unique_crashes,
                    self.stats.unique_hangs,
                );
                execs_at_last_report = self.stats.total_execs;
                last_report = Instant::now();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protofuzz_harness::MockHarness;

    fn fuzzer() -> (Fuzzer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let f = Fuzzer::new(1, Vec::new(), dir.path().to_path_buf());
        (f, dir)
    }

    #[test]
    fn dry_run_enqueues_calibrated_seeds() {
        let (mut f, _dir) = fuzzer();
        let mut h = MockHarness::new(1000);
        let seeds = vec![(None, vec![b"seed one".to_vec()]), (None, vec![b"seed two".to_vec()])];
        f.perform_dry_run(&mut h, seeds).unwrap();
        assert_eq!(f.queue_len(), 2);
        assert!(f.queue.iter().all(|c| c.is_calibrated()));
    }

    #[test]
    fn noinst_seed_is_fatal() {
        let (mut f, _dir) = fuzzer();
        let mut h = MockHarness::new(1000);
        h.noinst = true;
        let seeds = vec![(None, vec![b"seed".to_vec()])];
        let err = f.perform_dry_run(&mut h, seeds).unwrap_err();
        assert!(matches!(err, FuzzerError::SeedNoInstrumentation(_)));
    }

    #[test]
    fn fuzz_one_runs_against_an_empty_queue_without_panicking() {
        let (mut f, _dir) = fuzzer();
        let mut h = MockHarness::new(1000);
        f.fuzz_one(&mut h).unwrap();
    }

    #[test]
    fn fuzz_one_advances_total_execs() {
        let (mut f, _dir) = fuzzer();
        let mut h = MockHarness::new(1000);
        let seeds = vec![(None, vec![b"seed bytes long enough to mutate".to_vec()])];
        f.perform_dry_run(&mut h, seeds).unwrap();

        f.fuzz_one(&mut h).unwrap();
        assert!(f.stats().total_execs > 0);
    }
}
