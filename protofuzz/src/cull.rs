//! Top-Rated / Cull Engine (spec §4.5, C7).
//!
//! The queue is the arena; Top-Rated stores indices into it rather than
//! owning copies, per spec §9's "cyclic ownership" design note.
//!
//! Grounded in `original_source/Fuzzer.py::cull_queue`.

use std::collections::HashMap;

use crate::stats::Stats;
use crate::testcase::TestCase;

pub type TopRated = HashMap<u32, usize>;

/// Register `queue[new_idx]` (freshly calibrated) with the Top-Rated map.
///
/// Returns whether the Top-Rated entry for its `trace_mini_hash` changed
/// (used by the caller to decide whether to persist a `favor_test_cases/`
/// copy). The former winner's `favored` flag is intentionally left set when
/// replaced — see SPEC_FULL.md §9.
pub fn cull_queue(
    queue: &mut [TestCase],
    new_idx: usize,
    top_rated: &mut TopRated,
    stats: &mut Stats,
) -> bool {
    let trace_mini_hash = queue[new_idx].trace_mini_hash;

    match top_rated.get(&trace_mini_hash).copied() {
        None => {
            queue[new_idx].favored = true;
            top_rated.insert(trace_mini_hash, new_idx);
            stats.favor_paths += 1;
            if !queue[new_idx].was_fuzzed {
                stats.pending_favored += 1;
            }
            true
        }
        Some(prev_idx) => {
            let new_factor = queue[new_idx].favor_factor();
            let prev_factor = queue[prev_idx].favor_factor();
            if new_factor < prev_factor {
                queue[new_idx].favored = true;
                top_rated.insert(trace_mini_hash, new_idx);
                if !queue[new_idx].was_fuzzed {
                    stats.pending_favored += 1;
                }
                true
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(exec_us: f64, messages_len: usize, trace_mini_hash: u32) -> TestCase {
        let mut tc = TestCase::new(None, vec![vec![0u8; 4]; messages_len]);
        tc.exec_us = exec_us;
        tc.cksum = 1;
        tc.trace_mini_hash = trace_mini_hash;
        tc
    }

    #[test]
    fn first_case_for_a_fingerprint_is_always_favored() {
        let mut queue = vec![case(1000.0, 5, 0xABCD)];
        let mut top_rated = TopRated::new();
        let mut stats = Stats::new();

        let changed = cull_queue(&mut queue, 0, &mut top_rated, &mut stats);
        assert!(changed);
        assert!(queue[0].favored);
        assert_eq!(top_rated[&0xABCD], 0);
        assert_eq!(stats.favor_paths, 1);
        assert_eq!(stats.pending_favored, 1);
    }

    #[test]
    fn cheaper_case_replaces_the_top_rated_winner_scenario_4() {
        let fingerprint = 0xABCD;
        let mut queue = vec![case(1000.0, 5, fingerprint), case(400.0, 5, fingerprint)];
        let mut top_rated = TopRated::new();
        let mut stats = Stats::new();

        cull_queue(&mut queue, 0, &mut top_rated, &mut stats);
        let changed = cull_queue(&mut queue, 1, &mut top_rated, &mut stats);

        assert!(changed);
        assert_eq!(top_rated[&fingerprint], 1);
        // A's favored flag is not cleared on replacement (SPEC_FULL.md §9).
        assert!(queue[0].favored);
        assert!(queue[1].favored);
    }

    #[test]
    fn more_expensive_case_does_not_replace_the_winner() {
        let fingerprint = 0x1111;
        let mut queue = vec![case(400.0, 5, fingerprint), case(1000.0, 5, fingerprint)];
        let mut top_rated = TopRated::new();
        let mut stats = Stats::new();

        cull_queue(&mut queue, 0, &mut top_rated, &mut stats);
        let changed = cull_queue(&mut queue, 1, &mut top_rated, &mut stats);

        assert!(!changed);
        assert_eq!(top_rated[&fingerprint], 0);
        assert!(!queue[1].favored);
    }
}
