//! Calibrator (spec §4.4, C6): runs a test case's message sequence
//! `STAGE_MAX` times against the harness to measure coverage stability,
//! mean execution time, and bitmap size.
//!
//! Grounded in `original_source/Fuzzer.py::calibrate_case`.

use std::time::Instant;

use protofuzz_harness::{FaultCode, Harness};
use thiserror::Error;

use crate::testcase::TestCase;

pub const STAGE_MAX: u32 = 7;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("target produced no instrumentation output (NOINST)")]
    NoInstrumentation,
}

/// Running calibration averages shared across every case calibrated in a
/// session (spec §3's `total_cal_us`/`cal_cycles`/`total_bitmap_size`/
/// `total_bitmap_entries`).
#[derive(Debug, Default, Clone, Copy)]
pub struct CalibrationStats {
    pub total_cal_us: f64,
    pub cal_cycles: u64,
    pub total_bitmap_size: u64,
    pub total_bitmap_entries: u64,
}

impl CalibrationStats {
    pub fn record(&mut self, exec_us: f64, bitmap_size: u32) {
        self.total_cal_us += exec_us;
        self.cal_cycles += 1;
        self.total_bitmap_size += bitmap_size as u64;
        self.total_bitmap_entries += 1;
    }

    pub fn avg_exec_us(&self) -> f64 {
        if self.cal_cycles == 0 {
            0.0
        } else {
            self.total_cal_us / self.cal_cycles as f64
        }
    }

    pub fn avg_bitmap_size(&self) -> f64 {
        if self.total_bitmap_entries == 0 {
            0.0
        } else {
            self.total_bitmap_size as f64 / self.total_bitmap_entries as f64
        }
    }
}

/// Run `test_case.messages` through `harness` `STAGE_MAX` times, updating
/// `test_case`'s calibration metadata in place and folding the result into
/// `stats`.
///
/// Always runs all `STAGE_MAX` replays to completion: only the first run's
/// empty bitmap (`NOINST`) is fatal. A TMOUT/CRASH on a later replay is not
/// treated as terminal — it is exactly the kind of instability calibration
/// exists to characterize via `var_behavior`, not a reason to reject the
/// case — matching `original_source/Fuzzer.py::calibrate_case`, which only
/// ever branches on the per-run result to check `NOINST` on the first run.
/// Always returns `FaultCode::None` on success; `NOINST` is a distinct,
/// fatal error rather than a fault code, matching spec §4.4/§7.
pub fn calibrate<H: Harness>(
    harness: &mut H,
    test_case: &mut TestCase,
    current_queue_cycle: u32,
    stats: &mut CalibrationStats,
) -> Result<FaultCode, CalibrationError> {
    let timeout_ms = harness.exec_tmout_ms();
    let mut prev_cksum: Option<u32> = None;
    let mut var_behavior = false;

    let start = Instant::now();
    for run in 0..STAGE_MAX {
        harness.pre_run_target(timeout_ms);
        for message in &test_case.messages {
            harness.run_target(message);
        }
        harness.post_run_target(timeout_ms);

        if run == 0 && harness.trace_bytes_count() == 0 {
            return Err(CalibrationError::NoInstrumentation);
        }

        let cksum = harness.trace_hash32();
        if let Some(prev) = prev_cksum {
            if prev != cksum {
                var_behavior = true;
            }
        }
        prev_cksum = Some(cksum);
    }
    let elapsed_us = start.elapsed().as_micros() as f64;

    let exec_us = elapsed_us / STAGE_MAX as f64;
    let bitmap_size = harness.trace_bytes_count();

    test_case.cksum = prev_cksum.expect("STAGE_MAX >= 1 guarantees at least one run");
    test_case.trace_mini_hash = harness.trace_min_hash32();
    test_case.bitmap_size = bitmap_size;
    test_case.exec_us = exec_us;
    test_case.var_behavior = var_behavior;
    test_case.handicap = current_queue_cycle;

    stats.record(exec_us, bitmap_size);

    Ok(FaultCode::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protofuzz_harness::MockHarness;

    fn tc() -> TestCase {
        TestCase::new(None, vec![b"hello world".to_vec()])
    }

    #[test]
    fn calibration_sets_metadata_and_clears_uncalibrated_marker() {
        let mut h = MockHarness::new(1000);
        let mut t = tc();
        let mut stats = CalibrationStats::default();
        assert!(!t.is_calibrated());

        let fault = calibrate(&mut h, &mut t, 3, &mut stats).unwrap();

        assert_eq!(fault, FaultCode::None);
        assert!(t.is_calibrated());
        assert!(t.exec_us > 0.0);
        assert_eq!(t.handicap, 3);
        assert!(!t.var_behavior);
        assert_eq!(stats.cal_cycles, 1);
        assert_eq!(stats.total_bitmap_entries, 1);
    }

    #[test]
    fn noinst_target_is_rejected() {
        let mut h = MockHarness::new(1000);
        h.noinst = true;
        let mut t = tc();
        let mut stats = CalibrationStats::default();

        let err = calibrate(&mut h, &mut t, 0, &mut stats).unwrap_err();
        assert_eq!(err, CalibrationError::NoInstrumentation);
        assert!(!t.is_calibrated());
    }

    #[test]
    fn crash_during_calibration_still_completes_and_records_metadata() {
        let mut h = MockHarness::new(1000);
        h.crash_trigger = Some(b"hello".to_vec());
        let mut t = tc();
        let mut stats = CalibrationStats::default();

        let fault = calibrate(&mut h, &mut t, 0, &mut stats).unwrap();
        assert_eq!(fault, FaultCode::None);
        assert!(t.is_calibrated());
        assert_eq!(stats.cal_cycles, 1);
    }

    /// A harness whose bitmap hash alternates between two values from run to
    /// run, so calibration observes differing cksums across `STAGE_MAX` runs.
    struct FlakyHarness {
        calls: u32,
    }

    impl Harness for FlakyHarness {
        fn exec_tmout_ms(&self) -> u64 {
            1000
        }
        fn pre_run_target(&mut self, _timeout_ms: u64) {}
        fn run_target(&mut self, _message: &[u8]) {
            self.calls += 1;
        }
        fn post_run_target(&mut self, _timeout_ms: u64) -> FaultCode {
            FaultCode::None
        }
        fn response_buff(&self) -> &[u8] {
            &[]
        }
        fn trace_bytes_count(&self) -> u32 {
            1
        }
        fn trace_hash32(&self) -> u32 {
            self.calls % 2
        }
        fn trace_min_hash32(&self) -> u32 {
            1
        }
        fn has_new_bit(&mut self) -> u8 {
            0
        }
        fn tmout_has_new_bit(&mut self) -> bool {
            false
        }
        fn simplify_trace_bits(&mut self) {}
    }

    #[test]
    fn differing_cksums_across_runs_set_var_behavior() {
        let mut h = FlakyHarness { calls: 0 };
        let mut t = tc();
        let mut stats = CalibrationStats::default();

        calibrate(&mut h, &mut t, 0, &mut stats).unwrap();
        assert!(t.var_behavior);
    }
}
