//! Running session statistics (spec §3, plus the supplemental counters
//! SPEC_FULL.md §4.13 carries over from `original_source/Fuzzer.py`'s
//! `Stats` class).

use std::time::Instant;

use crate::calibrator::CalibrationStats;
use crate::testcase::TestCase;

#[derive(Debug, Default)]
pub struct Stats {
    pub total_execs: u64,
    pub queue_cycles: u64,

    pub total_tmouts: u64,
    pub total_crashes: u64,

    /// Confirmed-unique hangs (after re-validation at `hang_tmout`); this is
    /// the counter `KEEP_UNIQUE_HANG` gates against.
    pub unique_hangs: u64,
    /// Distinct-timeout-trace counter incremented the moment a timeout shows
    /// new bits, before hang re-validation confirms it — a strict superset
    /// of `unique_hangs` in the original prototype.
    pub unique_tmouts: u64,
    pub unique_crashes: u64,

    /// Count of Top-Rated entries ever registered (spec §4.5's `favor_paths`).
    pub favor_paths: u64,
    /// Favored cases not yet fuzzed; an incrementally-tracked upper bound,
    /// see `recompute_pending_favored` and SPEC_FULL.md §9.
    pub pending_favored: u64,
    /// New-coverage queue entries (spec §8 scenario 6).
    pub queued_with_cov: u64,

    pub last_hang_time: Option<Instant>,

    pub calibration: CalibrationStats,
}

impl Stats {
    pub fn new() -> Self {
        Stats::default()
    }

    pub fn record_execs(&mut self, count: u64) {
        self.total_execs += count;
    }

    /// Recompute `pending_favored` from scratch by scanning `queue`. The
    /// incrementally-tracked field never decrements when a case is demoted
    /// from favored (matching the original's behavior, SPEC_FULL.md §9), so
    /// this is the exact value a caller that needs precision should use
    /// instead.
    pub fn recompute_pending_favored(queue: &[TestCase]) -> u64 {
        queue
            .iter()
            .filter(|c| c.favored && !c.was_fuzzed)
            .count() as u64
    }
}
