//! Interesting-Case Classifier (spec §4.7, C9): decides whether an executed
//! message sequence is worth keeping, and if so, enqueues/persists it.
//!
//! Grounded in `original_source/Fuzzer.py::save_if_interesting`.

use std::path::Path;

use protofuzz_harness::{FaultCode, Harness};
use thiserror::Error;
use tracing::{info, warn};

use crate::calibrator::{self, CalibrationError};
use crate::cull::{self, TopRated};
use crate::persist::{self, PersistError};
use crate::stats::Stats;
use crate::testcase::{Message, TestCase};

pub const KEEP_UNIQUE_HANG: u64 = 500;
pub const KEEP_UNIQUE_CRASH: u64 = 5000;
pub const HANG_TMOUT_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("target is unexecutable (ERROR fault)")]
    FatalTarget,
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Debug, Default)]
pub struct ClassifyOutcome {
    pub kept: bool,
}

/// Re-run `messages` through `harness` with an explicit timeout, used for
/// hang re-validation. The two-argument form is authoritative (SPEC_FULL.md
/// §9 resolves the original's inconsistent call sites in its favor).
pub fn run_target_fast<H: Harness>(
    harness: &mut H,
    messages: &[Message],
    timeout_ms: u64,
) -> FaultCode {
    harness.pre_run_target(timeout_ms);
    for message in messages {
        harness.run_target(message);
    }
    harness.post_run_target(timeout_ms)
}

/// Classify the outcome of running `messages` against `harness`, which
/// yielded `fault`. `parent_depth` is the depth of the case that was mutated
/// to produce `messages`; `queue_cycle` is the scheduler's current cycle
/// count, used as the `handicap` for newly-enqueued cases.
#[allow(clippy::too_many_arguments)]
pub fn classify<H: Harness>(
    harness: &mut H,
    messages: Vec<Message>,
    fault: FaultCode,
    parent_depth: u32,
    queue: &mut Vec<TestCase>,
    top_rated: &mut TopRated,
    stats: &mut Stats,
    output_dir: &Path,
    queue_cycle: u64,
) -> Result<ClassifyOutcome, ClassifyError> {
    match fault {
        FaultCode::None => classify_none(
            harness,
            messages,
            parent_depth,
            queue,
            top_rated,
            stats,
            output_dir,
            queue_cycle,
        ),
        FaultCode::Tmout => classify_tmout(harness, messages, stats, output_dir),
        FaultCode::Crash => classify_crash(harness, &messages, stats, output_dir),
        FaultCode::Error => {
            warn!("target reported ERROR fault; aborting run");
            Err(ClassifyError::FatalTarget)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn classify_none<H: Harness>(
    harness: &mut H,
    messages: Vec<Message>,
    parent_depth: u32,
    queue: &mut Vec<TestCase>,
    top_rated: &mut TopRated,
    stats: &mut Stats,
    output_dir: &Path,
    queue_cycle: u64,
) -> Result<ClassifyOutcome, ClassifyError> {
    let new_bit = harness.has_new_bit();
    if new_bit == 0 {
        return Ok(ClassifyOutcome { kept: false });
    }

    let queue_index = queue.len() as u64;
    persist::save_to_queue(output_dir, queue_index, &messages)?;

    let mut new_case = TestCase::new(None, messages);
    new_case.depth = parent_depth + 1;
    new_case.has_new_cov = new_bit == 2;

    match calibrator::calibrate(harness, &mut new_case, queue_cycle as u32, &mut stats.calibration) {
        Ok(FaultCode::None) => {}
        Ok(other) => {
            warn!(?other, "newly-interesting case faulted during calibration; discarding");
            return Ok(ClassifyOutcome { kept: false });
        }
        Err(CalibrationError::NoInstrumentation) => {
            warn!("newly-interesting case produced NOINST during calibration; discarding");
            return Ok(ClassifyOutcome { kept: false });
        }
    }

    queue.push(new_case);
    let new_idx = queue.len() - 1;
    stats.queued_with_cov += 1;

    let became_favored = cull::cull_queue(queue, new_idx, top_rated, stats);
    if became_favored {
        let favor_index = stats.favor_paths - 1;
        persist::save_to_favor(output_dir, favor_index, &queue[new_idx].messages)?;
    }

    info!(new_idx, became_favored, "enqueued new-coverage test case");
    Ok(ClassifyOutcome { kept: true })
}

fn classify_tmout<H: Harness>(
    harness: &mut H,
    messages: Vec<Message>,
    stats: &mut Stats,
    output_dir: &Path,
) -> Result<ClassifyOutcome, ClassifyError> {
    stats.total_tmouts += 1;
    if stats.unique_hangs >= KEEP_UNIQUE_HANG {
        return Ok(ClassifyOutcome { kept: false });
    }

    harness.simplify_trace_bits();
    if !harness.tmout_has_new_bit() {
        return Ok(ClassifyOutcome { kept: false });
    }
    stats.unique_tmouts += 1;

    let exec_tmout_ms = harness.exec_tmout_ms();
    let confirmed = if exec_tmout_ms < HANG_TMOUT_MS {
        match run_target_fast(harness, &messages, HANG_TMOUT_MS) {
            FaultCode::Crash => {
                return classify_crash(harness, &messages, stats, output_dir);
            }
            FaultCode::Tmout => true,
            FaultCode::None | FaultCode::Error => false,
        }
    } else {
        true
    };

    if !confirmed {
        return Ok(ClassifyOutcome { kept: false });
    }

    persist::save_to_tmout(output_dir, stats.unique_hangs, &messages)?;
    stats.unique_hangs += 1;
    stats.last_hang_time = Some(std::time::Instant::now());
    info!(unique_hangs = stats.unique_hangs, "confirmed unique hang");
    Ok(ClassifyOutcome { kept: true })
}

fn classify_crash<H: Harness>(
    harness: &mut H,
    messages: &[Message],
    stats: &mut Stats,
    output_dir: &Path,
) -> Result<ClassifyOutcome, ClassifyError> {
    stats.total_crashes += 1;
    if stats.unique_crashes >= KEEP_UNIQUE_CRASH {
        return Ok(ClassifyOutcome { kept: false });
    }

    harness.simplify_trace_bits();
    if !harness.tmout_has_new_bit() {
        return Ok(ClassifyOutcome { kept: false });
    }

    persist::save_to_crash(output_dir, stats.unique_crashes, messages)?;
    stats.unique_crashes += 1;
    info!(unique_crashes = stats.unique_crashes, "confirmed unique crash");
    Ok(ClassifyOutcome { kept: true })
}

#[cfg(test)]
mod tests {
    use super::*;
    use protofuzz_harness::MockHarness;

    fn setup() -> (MockHarness, Vec<TestCase>, TopRated, Stats, tempfile::TempDir) {
        (
            MockHarness::new(1000),
            Vec::new(),
            TopRated::new(),
            Stats::new(),
            tempfile::tempdir().unwrap(),
        )
    }

    #[test]
    fn new_coverage_enqueues_and_persists_scenario_6() {
        let (mut h, mut queue, mut top_rated, mut stats, dir) = setup();
        h.pre_run_target(1000);
        h.run_target(b"first message triggers fresh edges");
        let fault = h.post_run_target(1000);

        let outcome = classify(
            &mut h,
            vec![b"first message triggers fresh edges".to_vec()],
            fault,
            0,
            &mut queue,
            &mut top_rated,
            &mut stats,
            dir.path(),
            0,
        )
        .unwrap();

        assert!(outcome.kept);
        assert_eq!(queue.len(), 1);
        assert_eq!(stats.queued_with_cov, 1);
        assert!(dir.path().join("queue/id:000000.raw").exists());
    }

    #[test]
    fn no_new_bits_is_discarded() {
        let (mut h, mut queue, mut top_rated, mut stats, dir) = setup();
        // Warm the virgin map first so the second identical run reports nothing new.
        h.pre_run_target(1000);
        h.run_target(b"repeat me");
        h.post_run_target(1000);
        h.has_new_bit();

        h.pre_run_target(1000);
        h.run_target(b"repeat me");
        let fault = h.post_run_target(1000);

        let outcome = classify(
            &mut h,
            vec![b"repeat me".to_vec()],
            fault,
            0,
            &mut queue,
            &mut top_rated,
            &mut stats,
            dir.path(),
            0,
        )
        .unwrap();

        assert!(!outcome.kept);
        assert!(queue.is_empty());
    }

    #[test]
    fn crash_is_persisted_and_counted() {
        let (mut h, mut queue, mut top_rated, mut stats, dir) = setup();
        h.crash_trigger = Some(b"BOOM".to_vec());
        h.pre_run_target(1000);
        h.run_target(b"prefix BOOM suffix");
        let fault = h.post_run_target(1000);
        assert_eq!(fault, FaultCode::Crash);

        let outcome = classify(
            &mut h,
            vec![b"prefix BOOM suffix".to_vec()],
            fault,
            0,
            &mut queue,
            &mut top_rated,
            &mut stats,
            dir.path(),
            0,
        )
        .unwrap();

        assert!(outcome.kept);
        assert_eq!(stats.total_crashes, 1);
        assert_eq!(stats.unique_crashes, 1);
        assert!(dir.path().join("crash_test_cases/id:000000.raw").exists());
    }

    #[test]
    fn error_fault_is_fatal() {
        let (mut h, mut queue, mut top_rated, mut stats, dir) = setup();
        let err = classify(
            &mut h,
            vec![b"whatever".to_vec()],
            FaultCode::Error,
            0,
            &mut queue,
            &mut top_rated,
            &mut stats,
            dir.path(),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ClassifyError::FatalTarget));
    }
}
