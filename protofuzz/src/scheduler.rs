//! Scheduler & Performance Scorer (spec §4.6, C8): round-robin queue
//! traversal, the skip-to-new-coverage probability, and the havoc-budget
//! performance score.
//!
//! Grounded in `original_source/Fuzzer.py::choose_test_case` and
//! `calculate_score`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::testcase::TestCase;

pub const SKIP_TO_NEW_PROB: u32 = 99;
pub const HAVOC_MAX_MULT: u32 = 16;
pub const HAVOC_CYCLES_INIT: u32 = 1024;

/// Number of havoc mutation rounds `S` a `fuzz_one` stage runs, derived from
/// the case's performance score (spec §4.3/§4.8).
pub fn havoc_rounds(perf_score: u32) -> u32 {
    (HAVOC_CYCLES_INIT as f64 * perf_score as f64 / 100.0).ceil() as u32
}

/// Round-robin cursor over the queue, tracking full-wrap cycle counts.
pub struct Scheduler {
    cursor: usize,
    queue_cycle: u64,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(seed: u64) -> Self {
        Scheduler {
            cursor: 0,
            queue_cycle: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn queue_cycle(&self) -> u64 {
        self.queue_cycle
    }

    /// Advance the cursor and return the index of the next case to
    /// consider. Wrapping increments `queue_cycle`.
    pub fn choose_next(&mut self, queue_len: usize) -> usize {
        assert!(queue_len > 0, "cannot schedule over an empty queue");
        let idx = self.cursor;
        self.cursor += 1;
        if self.cursor >= queue_len {
            self.cursor = 0;
            self.queue_cycle += 1;
        }
        idx
    }

    /// True if this round should skip fuzzing the currently-selected case:
    /// there is at least one favored case not yet fuzzed, the current case
    /// has already been fuzzed once, and an independent `SKIP_TO_NEW_PROB`%
    /// coin lands in favor of skipping.
    pub fn should_skip(&mut self, pending_favored: u64, current_was_fuzzed: bool) -> bool {
        if pending_favored > 0 && current_was_fuzzed {
            self.rng.gen_bool(SKIP_TO_NEW_PROB as f64 / 100.0)
        } else {
            false
        }
    }
}

/// Compute the performance score for `test_case` against the running
/// averages, clamped to `[1, HAVOC_MAX_MULT * 100]`. `test_case.handicap` is
/// consumed (decremented) as part of the boost, matching the original's
/// one-shot "catch up" semantics.
pub fn calculate_score(test_case: &mut TestCase, avg_exec_us: f64, avg_bitmap_size: f64) -> u32 {
    let exec_us = test_case.exec_us;
    let bitmap_size = test_case.bitmap_size as f64;

    let mut score: f64 = if exec_us * 0.1 > avg_exec_us {
        10.0
    } else if exec_us * 0.25 > avg_exec_us {
        25.0
    } else if exec_us * 0.5 > avg_exec_us {
        50.0
    } else if exec_us * 0.75 > avg_exec_us {
        75.0
    } else if exec_us * 4.0 < avg_exec_us {
        300.0
    } else if exec_us * 3.0 < avg_exec_us {
        200.0
    } else if exec_us * 2.0 < avg_exec_us {
        150.0
    } else {
        100.0
    };

    let bitmap_factor: f64 = if bitmap_size * 0.3 > avg_bitmap_size {
        3.0
    } else if bitmap_size * 0.5 > avg_bitmap_size {
        2.0
    } else if bitmap_size * 0.75 > avg_bitmap_size {
        1.5
    } else if bitmap_size * 3.0 < avg_bitmap_size {
        0.25
    } else if bitmap_size * 2.0 < avg_bitmap_size {
        0.5
    } else if bitmap_size * 1.5 < avg_bitmap_size {
        0.75
    } else {
        1.0
    };
    score *= bitmap_factor;

    if test_case.handicap >= 4 {
        score *= 4.0;
        test_case.handicap -= 4;
    } else if test_case.handicap > 0 {
        score *= 2.0;
        test_case.handicap -= 1;
    }

    if avg_exec_us > 50_000.0 {
        score /= 10.0;
    } else if avg_exec_us > 20_000.0 {
        score /= 5.0;
    } else if avg_exec_us > 10_000.0 {
        score /= 2.0;
    }

    let cap = (HAVOC_MAX_MULT * 100) as f64;
    score.clamp(1.0, cap) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(exec_us: f64, bitmap_size: u32, handicap: u32) -> TestCase {
        let mut tc = TestCase::new(None, vec![vec![0u8; 4]]);
        tc.exec_us = exec_us;
        tc.bitmap_size = bitmap_size;
        tc.handicap = handicap;
        tc
    }

    #[test]
    fn choose_next_wraps_and_counts_cycles() {
        let mut s = Scheduler::new(1);
        assert_eq!(s.choose_next(3), 0);
        assert_eq!(s.choose_next(3), 1);
        assert_eq!(s.queue_cycle(), 0);
        assert_eq!(s.choose_next(3), 2);
        assert_eq!(s.queue_cycle(), 1);
        assert_eq!(s.choose_next(3), 0);
    }

    #[test]
    fn skip_probability_matches_scenario_5_within_one_percent() {
        let mut s = Scheduler::new(42);
        let mut skips = 0u32;
        const TRIALS: u32 = 10_000;
        for _ in 0..TRIALS {
            if s.should_skip(1, true) {
                skips += 1;
            }
        }
        let rate = skips as f64 / TRIALS as f64;
        assert!((rate - 0.99).abs() < 0.01, "observed skip rate {rate}");
    }

    #[test]
    fn skip_never_happens_without_pending_favored_or_unfuzzed_current() {
        let mut s = Scheduler::new(1);
        assert!(!s.should_skip(0, true));
        assert!(!s.should_skip(1, false));
    }

    #[test]
    fn score_is_always_within_bounds() {
        let avg_exec_us_values = [1.0, 100.0, 10_000.0, 60_000.0];
        let avg_bitmap_values = [1.0, 50.0, 500.0];
        for avg_exec_us in avg_exec_us_values {
            for avg_bitmap_size in avg_bitmap_values {
                for exec_us in [1.0, 1000.0, 100_000.0] {
                    for bitmap_size in [1u32, 50, 1000] {
                        for handicap in [0u32, 2, 10] {
                            let mut tc = case(exec_us, bitmap_size, handicap);
                            let score = calculate_score(&mut tc, avg_exec_us, avg_bitmap_size);
                            assert!(score >= 1 && score <= HAVOC_MAX_MULT * 100);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn score_improves_as_exec_us_shrinks_below_average() {
        let avg = 1000.0;
        let mut slow = case(900.0, 10, 0);
        let mut fast = case(200.0, 10, 0);
        let slow_score = calculate_score(&mut slow, avg, 10.0);
        let fast_score = calculate_score(&mut fast, avg, 10.0);
        assert!(fast_score > slow_score);
    }

    #[test]
    fn havoc_rounds_scales_with_perf_score() {
        assert_eq!(havoc_rounds(100), 1024);
        assert_eq!(havoc_rounds(1600), 1024 * 16);
    }
}
