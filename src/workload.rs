// MIT License
//
// Copyright (c) 2020 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Per-thread workload generation.
//!
//! Each benchmark worker owns one [`WorkloadGen`]: a small private RNG plus
//! the key distribution and read/write mix it draws from. Nothing here is
//! shared between threads; contention belongs to the table under test, not
//! to the generator. Given the same seed, thread id, and parameters, a
//! generator reproduces the same sequence of draws.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// How read keys are drawn from the populated key space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KeyDist {
    /// Independent uniform draws over `[0, universe)`.
    Uniform { universe: u64 },
    /// A hot fraction of the key space receives most accesses: with
    /// probability `p_hot` draw uniformly from `[0, hot_n)`, otherwise from
    /// `[hot_n, universe)`.
    Hotset {
        universe: u64,
        hot_n: u64,
        p_hot: f64,
    },
}

impl KeyDist {
    /// Hot-set distribution over `universe` keys with a hot set of
    /// `hot_frac * universe` keys (at least one) receiving `p_hot` of the
    /// accesses.
    pub fn hotset(universe: u64, hot_frac: f64, p_hot: f64) -> Self {
        let hot_n = ((universe as f64 * hot_frac) as u64).clamp(1, universe.max(1));

        KeyDist::Hotset {
            universe,
            hot_n,
            p_hot,
        }
    }
}

/// A per-thread generator of keys and read/write coin flips.
pub struct WorkloadGen {
    rng: SmallRng,
    dist: KeyDist,
    read_ratio: f64,
}

impl WorkloadGen {
    /// Creates the generator for worker `thread_id`, seeded so that distinct
    /// workers draw independent sequences and reruns reproduce them.
    pub fn new(base_seed: u64, thread_id: usize, dist: KeyDist, read_ratio: f64) -> Self {
        let seed = base_seed ^ (thread_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);

        Self {
            rng: SmallRng::seed_from_u64(seed),
            dist,
            read_ratio: read_ratio.clamp(0.0, 1.0),
        }
    }

    /// Flips the biased read/write coin.
    pub fn is_read(&mut self) -> bool {
        self.rng.gen::<f64>() < self.read_ratio
    }

    /// Draws a key from the configured distribution.
    pub fn draw_key(&mut self) -> u64 {
        match self.dist {
            KeyDist::Uniform { universe } => {
                if universe == 0 {
                    0
                } else {
                    self.rng.gen_range(0..universe)
                }
            }
            KeyDist::Hotset {
                universe,
                hot_n,
                p_hot,
            } => {
                if universe == 0 {
                    return 0;
                }

                let hot_n = hot_n.clamp(1, universe);

                if hot_n == universe || self.rng.gen::<f64>() < p_hot {
                    self.rng.gen_range(0..hot_n)
                } else {
                    self.rng.gen_range(hot_n..universe)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_reproduces_sequence() {
        let dist = KeyDist::hotset(10_000, 0.1, 0.9);

        let mut first = WorkloadGen::new(0xC0FFEE, 3, dist, 0.8);
        let mut second = WorkloadGen::new(0xC0FFEE, 3, dist, 0.8);

        for _ in 0..10_000 {
            assert_eq!(first.is_read(), second.is_read());
            assert_eq!(first.draw_key(), second.draw_key());
        }
    }

    #[test]
    fn distinct_threads_draw_distinct_sequences() {
        let dist = KeyDist::Uniform { universe: 1 << 20 };

        let mut first = WorkloadGen::new(0xC0FFEE, 0, dist, 0.5);
        let mut second = WorkloadGen::new(0xC0FFEE, 1, dist, 0.5);

        let a: Vec<u64> = (0..64).map(|_| first.draw_key()).collect();
        let b: Vec<u64> = (0..64).map(|_| second.draw_key()).collect();

        assert_ne!(a, b);
    }

    #[test]
    fn uniform_draws_stay_in_range() {
        let mut gen = WorkloadGen::new(1, 0, KeyDist::Uniform { universe: 100 }, 0.5);

        for _ in 0..10_000 {
            assert!(gen.draw_key() < 100);
        }
    }

    #[test]
    fn hotset_concentrates_accesses() {
        let universe = 10_000;
        let dist = KeyDist::hotset(universe, 0.1, 0.9);
        let mut gen = WorkloadGen::new(42, 0, dist, 0.8);

        let draws = 100_000;
        let hot_hits = (0..draws)
            .filter(|_| gen.draw_key() < universe / 10)
            .count();

        // Bernoulli(0.9) over 100k draws; give the bound generous slack.
        let fraction = hot_hits as f64 / draws as f64;
        assert!(fraction > 0.85 && fraction < 0.95, "hot fraction {fraction}");
    }

    #[test]
    fn single_hot_key() {
        let dist = KeyDist::hotset(1_000_000, 0.000_000_1, 1.0);
        let mut gen = WorkloadGen::new(7, 0, dist, 0.0);

        for _ in 0..1000 {
            assert_eq!(gen.draw_key(), 0);
        }
    }

    #[test]
    fn read_ratio_extremes() {
        let dist = KeyDist::Uniform { universe: 10 };

        let mut all_reads = WorkloadGen::new(9, 0, dist, 1.0);
        let mut all_writes = WorkloadGen::new(9, 0, dist, 0.0);

        for _ in 0..1000 {
            assert!(all_reads.is_read());
            assert!(!all_writes.is_read());
        }
    }

    #[test]
    fn degenerate_universe() {
        let mut gen = WorkloadGen::new(3, 0, KeyDist::Uniform { universe: 0 }, 0.5);

        assert_eq!(gen.draw_key(), 0);

        let mut gen = WorkloadGen::new(3, 0, KeyDist::hotset(1, 0.5, 0.9), 0.5);

        assert_eq!(gen.draw_key(), 0);
    }
}
