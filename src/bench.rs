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

//! The scaling benchmark kernel.
//!
//! Every configuration runs the same two-phase workload. The build phase
//! pre-inserts keys `0..ops/2` with value `2·key` across all workers and is
//! treated as warm-up. The mixed phase is the timed region: each worker
//! walks its contiguous share of the remaining operation indices, flipping
//! a biased coin per index to either read a generated key or insert a fresh
//! key disjoint from the build range. Throughput is operations over the
//! mixed-phase wall clock; speedup divides by a sequential baseline of the
//! same configuration.
//!
//! Baselines are memoized per `(mode, read ratio, distribution, bucket
//! count, p_hot, ops)` so a sweep never reuses a baseline across mixes or
//! distributions, and never reruns one it already measured.

use std::collections::HashMap;
use std::fmt;
use std::hint::black_box;
use std::io::{self, Write};
use std::time::Instant;

use clap::ValueEnum;
use crossbeam_utils::thread;
use fxhash::FxBuildHasher;

use crate::adaptive::{self, AdaptiveTable};
use crate::coarse::{CoarseTable, PaddedCoarseTable};
use crate::fine::{FineTable, PaddedFineTable};
use crate::lockfree::LockFreeTable;
use crate::segment::{self, SegmentTable};
use crate::sequential::SequentialTable;
use crate::striped::StripedTable;
use crate::table::ConcurrentTable;
use crate::workload::{KeyDist, WorkloadGen};

/// How total work relates to the worker count.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Mode {
    /// Fixed total operations split across workers.
    Strong,
    /// Fixed operations per worker; total grows with the worker count.
    Weak,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Strong => "strong",
            Mode::Weak => "weak",
        })
    }
}

/// Key distribution for the mixed phase's reads.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Dist {
    Uniform,
    Skew,
}

impl fmt::Display for Dist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Dist::Uniform => "uniform",
            Dist::Skew => "skew",
        })
    }
}

/// The table variant a benchmark process exercises.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ImplChoice {
    Coarse,
    CoarsePadded,
    Fine,
    FinePadded,
    Segment,
    Striped,
    Lockfree,
    Agh,
}

impl ImplChoice {
    /// Constructs the chosen variant with `bucket_count` buckets and the
    /// sweep's tuning parameters.
    ///
    /// Tables are built with a fixed-seed hasher so bucket layouts are
    /// identical from run to run.
    pub fn build(
        self,
        cfg: &BenchConfig,
        bucket_count: usize,
    ) -> Box<dyn ConcurrentTable<u64, u64>> {
        let hasher = FxBuildHasher::default;

        match self {
            ImplChoice::Coarse => Box::new(CoarseTable::with_hasher(bucket_count, hasher())),
            ImplChoice::CoarsePadded => {
                Box::new(PaddedCoarseTable::with_hasher(bucket_count, hasher()))
            }
            ImplChoice::Fine => Box::new(FineTable::with_hasher(bucket_count, hasher())),
            ImplChoice::FinePadded => {
                Box::new(PaddedFineTable::with_hasher(bucket_count, hasher()))
            }
            ImplChoice::Segment => Box::new(SegmentTable::with_num_segments_and_hasher(
                bucket_count,
                cfg.segments.unwrap_or(segment::DEFAULT_SEGMENTS),
                hasher(),
            )),
            ImplChoice::Striped => Box::new(StripedTable::with_num_locks_and_hasher(
                bucket_count,
                cfg.num_locks,
                hasher(),
            )),
            ImplChoice::Lockfree => Box::new(LockFreeTable::with_hasher(bucket_count, hasher())),
            ImplChoice::Agh => Box::new(AdaptiveTable::with_tuning_and_hasher(
                bucket_count,
                cfg.segments.unwrap_or(adaptive::DEFAULT_SEGMENTS),
                cfg.expected_threads,
                cfg.stripe_factor,
                hasher(),
            )),
        }
    }
}

/// The full sweep matrix one benchmark process walks.
#[derive(Clone, Debug)]
pub struct BenchConfig {
    pub threads: Vec<usize>,
    pub strong_ops: usize,
    pub weak_ops_per_thread: usize,
    pub mixes: Vec<f64>,
    pub buckets: Vec<usize>,
    pub p_hots: Vec<f64>,
    pub hot_frac: f64,
    /// Segment count for the segmented variants; `None` keeps each
    /// variant's own default.
    pub segments: Option<usize>,
    pub num_locks: usize,
    /// Expected thread count for adaptive striping; zero sizes for the
    /// machine.
    pub expected_threads: usize,
    pub stripe_factor: usize,
    pub modes: Vec<Mode>,
    pub seed: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            threads: vec![1, 2, 4, 8, 16],
            strong_ops: 2_000_000,
            weak_ops_per_thread: 250_000,
            mixes: vec![0.8, 0.5],
            buckets: vec![16_384, 65_536, 262_144, 1_048_576],
            p_hots: vec![0.7, 0.9, 0.99],
            hot_frac: 0.10,
            segments: None,
            num_locks: crate::striped::DEFAULT_LOCKS,
            expected_threads: 0,
            stripe_factor: adaptive::DEFAULT_STRIPE_FACTOR,
            modes: vec![Mode::Strong, Mode::Weak],
            seed: 0xC0FFEE,
        }
    }
}

impl BenchConfig {
    /// A matrix small enough for smoke runs and CI.
    pub fn quick() -> Self {
        Self {
            threads: vec![1, 2, 4],
            strong_ops: 200_000,
            weak_ops_per_thread: 50_000,
            mixes: vec![0.8],
            buckets: vec![16_384],
            p_hots: vec![0.9],
            ..Self::default()
        }
    }

    /// Rejects configurations no run could satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.threads.is_empty() {
            return Err("at least one thread count is required".to_owned());
        }

        if self.threads.iter().any(|&t| t == 0) {
            return Err("thread counts must be at least 1".to_owned());
        }

        if self.strong_ops < 2 || self.weak_ops_per_thread < 2 {
            return Err("operation counts must be at least 2".to_owned());
        }

        if self.buckets.is_empty() || self.buckets.iter().any(|&n| n == 0) {
            return Err("bucket counts must be at least 1".to_owned());
        }

        if self.mixes.is_empty() || self.mixes.iter().any(|&m| !(0.0..=1.0).contains(&m)) {
            return Err("read ratios must lie in [0, 1]".to_owned());
        }

        if self.p_hots.iter().any(|&p| !(0.0..=1.0).contains(&p)) {
            return Err("p_hot values must lie in [0, 1]".to_owned());
        }

        if !(self.hot_frac > 0.0 && self.hot_frac <= 1.0) {
            return Err("hot_frac must lie in (0, 1]".to_owned());
        }

        if self.stripe_factor == 0 {
            return Err("stripe factor must be at least 1".to_owned());
        }

        Ok(())
    }
}

/// One emitted CSV row.
#[derive(Clone, Debug)]
struct Row {
    impl_name: String,
    mode: Mode,
    mix: String,
    dist: Dist,
    threads: usize,
    ops: usize,
    bucket_count: usize,
    read_ratio: f64,
    p_hot: f64,
    time_s: f64,
    throughput_mops: f64,
    speedup: f64,
    seq_baseline_s: f64,
}

#[derive(Debug)]
enum RowError {
    SizeMismatch { expected: usize, actual: usize },
    NonFiniteTime,
    WorkerPanic,
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowError::SizeMismatch { expected, actual } => {
                write!(f, "table held {actual} entries after build, expected {expected}")
            }
            RowError::NonFiniteTime => f.write_str("measured time was not finite"),
            RowError::WorkerPanic => f.write_str("a worker thread panicked"),
        }
    }
}

/// Memoization key for sequential baselines.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct BaselineKey {
    mode: Mode,
    read_ratio_bits: u64,
    dist: Dist,
    bucket_count: usize,
    p_hot_bits: u64,
    ops: usize,
}

struct BaselineCache {
    entries: HashMap<BaselineKey, f64>,
    misses: usize,
}

impl BaselineCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            misses: 0,
        }
    }

    fn get_or_compute(&mut self, key: BaselineKey, compute: impl FnOnce() -> f64) -> f64 {
        if let Some(&time) = self.entries.get(&key) {
            return time;
        }

        let time = compute();
        self.misses += 1;
        self.entries.insert(key, time);

        time
    }
}

/// Contiguous per-worker index ranges covering `0..total`.
fn split_range(total: usize, parts: usize) -> Vec<(usize, usize)> {
    let parts = parts.max(1);
    let base = total / parts;
    let rem = total % parts;

    let mut ranges = Vec::with_capacity(parts);
    let mut lo = 0;

    for i in 0..parts {
        let hi = lo + base + usize::from(i < rem);
        ranges.push((lo, hi));
        lo = hi;
    }

    ranges
}

fn key_dist(dist: Dist, initial: usize, p_hot: f64, hot_frac: f64) -> KeyDist {
    match dist {
        Dist::Uniform => KeyDist::Uniform {
            universe: initial as u64,
        },
        Dist::Skew => KeyDist::hotset(initial as u64, hot_frac, p_hot),
    }
}

/// Runs one build+mixed workload against `table`, returning the mixed-phase
/// wall clock in seconds.
#[allow(clippy::too_many_arguments)]
fn run_workload(
    table: &dyn ConcurrentTable<u64, u64>,
    threads: usize,
    ops: usize,
    read_ratio: f64,
    dist: Dist,
    p_hot: f64,
    hot_frac: f64,
    seed: u64,
) -> Result<f64, RowError> {
    let initial = ops / 2;
    let mixed = ops - initial;

    thread::scope(|s| {
        for (lo, hi) in split_range(initial, threads) {
            s.spawn(move |_| {
                for key in lo..hi {
                    table.insert(key as u64, 2 * key as u64);
                }
            });
        }
    })
    .map_err(|_| RowError::WorkerPanic)?;

    if table.len() != initial {
        return Err(RowError::SizeMismatch {
            expected: initial,
            actual: table.len(),
        });
    }

    let dist = key_dist(dist, initial, p_hot, hot_frac);

    let start = Instant::now();

    thread::scope(|s| {
        for (tid, (lo, hi)) in split_range(mixed, threads).into_iter().enumerate() {
            s.spawn(move |_| {
                let mut gen = WorkloadGen::new(seed, tid, dist, read_ratio);

                for i in lo..hi {
                    if gen.is_read() {
                        black_box(table.get(&gen.draw_key()));
                    } else {
                        // Fresh keys are disjoint from the build range, so
                        // the element count trajectory is predictable.
                        table.insert((initial + i) as u64, i as u64);
                    }
                }
            });
        }
    })
    .map_err(|_| RowError::WorkerPanic)?;

    let time = start.elapsed().as_secs_f64();

    if !time.is_finite() {
        return Err(RowError::NonFiniteTime);
    }

    Ok(time)
}

/// The single-threaded twin of [`run_workload`] on the sequential table.
fn run_sequential(
    ops: usize,
    read_ratio: f64,
    dist: Dist,
    p_hot: f64,
    hot_frac: f64,
    bucket_count: usize,
    seed: u64,
) -> f64 {
    let mut table = SequentialTable::with_hasher(bucket_count, FxBuildHasher::default());

    let initial = ops / 2;
    let mixed = ops - initial;

    for key in 0..initial {
        table.insert(key as u64, 2 * key as u64);
    }

    let mut gen = WorkloadGen::new(seed, 0, key_dist(dist, initial, p_hot, hot_frac), read_ratio);

    let start = Instant::now();

    for i in 0..mixed {
        if gen.is_read() {
            let key = gen.draw_key();
            black_box(table.get(&key));
        } else {
            table.insert((initial + i) as u64, i as u64);
        }
    }

    start.elapsed().as_secs_f64()
}

/// `80/20`-style label for a read ratio.
fn mix_label(read_ratio: f64) -> String {
    let reads = (read_ratio * 100.0).round() as u32;

    format!("{}/{}", reads, 100 - reads)
}

/// Applies the wall-clock sanity bound: a run slower than ten times its
/// baseline keeps its time but reports zero throughput and speedup, so the
/// CSV stays complete for plotting.
fn throughput_and_speedup(ops: usize, time_s: f64, baseline_s: f64) -> (f64, f64) {
    if time_s > 10.0 * baseline_s {
        (0.0, 0.0)
    } else {
        (ops as f64 / time_s / 1e6, baseline_s / time_s)
    }
}

#[allow(clippy::too_many_arguments)]
fn run_config(
    choice: ImplChoice,
    cfg: &BenchConfig,
    baselines: &mut BaselineCache,
    mode: Mode,
    read_ratio: f64,
    dist: Dist,
    p_hot: f64,
    bucket_count: usize,
    threads: usize,
) -> Option<Row> {
    let ops = match mode {
        Mode::Strong => cfg.strong_ops,
        Mode::Weak => cfg.weak_ops_per_thread * threads,
    };
    let row_p_hot = if dist == Dist::Skew { p_hot } else { 0.0 };

    let baseline_s = baselines.get_or_compute(
        BaselineKey {
            mode,
            read_ratio_bits: read_ratio.to_bits(),
            dist,
            bucket_count,
            p_hot_bits: row_p_hot.to_bits(),
            ops,
        },
        || run_sequential(ops, read_ratio, dist, p_hot, cfg.hot_frac, bucket_count, cfg.seed),
    );

    let table = choice.build(cfg, bucket_count);
    let impl_name = table.name();

    let time_s = match run_workload(
        &*table,
        threads,
        ops,
        read_ratio,
        dist,
        p_hot,
        cfg.hot_frac,
        cfg.seed,
    ) {
        Ok(time) => time,
        Err(err) => {
            eprintln!(
                "skipping {impl_name} {mode} {} {dist} T={threads} buckets={bucket_count}: {err}",
                mix_label(read_ratio),
            );

            return None;
        }
    };

    let (throughput_mops, speedup) = throughput_and_speedup(ops, time_s, baseline_s);

    println!(
        "{:<16} {:>6} {:>6} {:>7}  T={:<2} ops={:<9} buckets={:<8} p_hot={:.2}  time={:.4}  thr={:.2} Mops  speedup={:.2}",
        impl_name,
        mode.to_string(),
        mix_label(read_ratio),
        dist.to_string(),
        threads,
        ops,
        bucket_count,
        row_p_hot,
        time_s,
        throughput_mops,
        speedup,
    );

    Some(Row {
        impl_name,
        mode,
        mix: mix_label(read_ratio),
        dist,
        threads,
        ops,
        bucket_count,
        read_ratio,
        p_hot: row_p_hot,
        time_s,
        throughput_mops,
        speedup,
        seq_baseline_s: baseline_s,
    })
}

/// Walks the whole sweep matrix for one variant and writes the CSV block to
/// `csv_out`.
///
/// Failed configurations are reported on stderr and skipped; the sweep
/// continues with the next one.
pub fn run_matrix(
    choice: ImplChoice,
    cfg: &BenchConfig,
    csv_out: &mut dyn Write,
) -> io::Result<()> {
    let mut rows = Vec::new();
    let mut baselines = BaselineCache::new();

    for &mode in &cfg.modes {
        for &read_ratio in &cfg.mixes {
            for &bucket_count in &cfg.buckets {
                for &threads in &cfg.threads {
                    rows.extend(run_config(
                        choice,
                        cfg,
                        &mut baselines,
                        mode,
                        read_ratio,
                        Dist::Uniform,
                        0.0,
                        bucket_count,
                        threads,
                    ));
                }

                for &p_hot in &cfg.p_hots {
                    for &threads in &cfg.threads {
                        rows.extend(run_config(
                            choice,
                            cfg,
                            &mut baselines,
                            mode,
                            read_ratio,
                            Dist::Skew,
                            p_hot,
                            bucket_count,
                            threads,
                        ));
                    }
                }
            }
        }
    }

    emit_csv(&rows, csv_out)
}

const CSV_HEADER: &str =
    "impl,mode,mix,dist,threads,ops,bucket_count,read_ratio,p_hot,time_s,throughput_mops,speedup,seq_baseline_s";

fn emit_csv(rows: &[Row], out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "CSV_RESULTS_BEGIN")?;
    writeln!(out, "{CSV_HEADER}")?;

    for row in rows {
        writeln!(
            out,
            "{},{},{},{},{},{},{},{:.2},{:.2},{:.6},{:.3},{:.3},{:.6}",
            row.impl_name,
            row.mode,
            row.mix,
            row.dist,
            row.threads,
            row.ops,
            row.bucket_count,
            row.read_ratio,
            row.p_hot,
            row.time_s,
            row.throughput_mops,
            row.speedup,
            row.seq_baseline_s,
        )?;
    }

    writeln!(out, "CSV_RESULTS_END")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_range_covers_everything() {
        for &(total, parts) in &[(10, 3), (0, 4), (7, 7), (1000, 16), (5, 1)] {
            let ranges = split_range(total, parts);

            assert_eq!(ranges.len(), parts);
            assert_eq!(ranges.first().map(|r| r.0), Some(0));
            assert_eq!(ranges.last().map(|r| r.1), Some(total));

            for pair in ranges.windows(2) {
                assert_eq!(pair[0].1, pair[1].0);
            }

            let sum: usize = ranges.iter().map(|(lo, hi)| hi - lo).sum();
            assert_eq!(sum, total);
        }
    }

    #[test]
    fn mix_labels() {
        assert_eq!(mix_label(0.8), "80/20");
        assert_eq!(mix_label(0.5), "50/50");
        assert_eq!(mix_label(0.95), "95/5");
        assert_eq!(mix_label(0.0), "0/100");
        assert_eq!(mix_label(1.0), "100/0");
    }

    #[test]
    fn sanity_bound_zeroes_slow_rows() {
        let (thr, spd) = throughput_and_speedup(1_000_000, 0.5, 1.0);
        assert!(thr > 0.0 && spd > 0.0);

        let (thr, spd) = throughput_and_speedup(1_000_000, 11.0, 1.0);
        assert_eq!((thr, spd), (0.0, 0.0));
    }

    #[test]
    fn baselines_memoize_per_configuration() {
        let mut cache = BaselineCache::new();

        let key = |dist: Dist, ratio: f64, ops: usize| BaselineKey {
            mode: Mode::Strong,
            read_ratio_bits: ratio.to_bits(),
            dist,
            bucket_count: 1024,
            p_hot_bits: 0.0f64.to_bits(),
            ops,
        };

        assert_eq!(cache.get_or_compute(key(Dist::Uniform, 0.8, 1000), || 1.0), 1.0);
        assert_eq!(cache.get_or_compute(key(Dist::Uniform, 0.8, 1000), || 2.0), 1.0);
        assert_eq!(cache.misses, 1);

        // Different mix and distribution must not reuse the first baseline.
        assert_eq!(cache.get_or_compute(key(Dist::Uniform, 0.5, 1000), || 3.0), 3.0);
        assert_eq!(cache.get_or_compute(key(Dist::Skew, 0.8, 1000), || 4.0), 4.0);
        assert_eq!(cache.get_or_compute(key(Dist::Uniform, 0.8, 2000), || 5.0), 5.0);
        assert_eq!(cache.misses, 4);
    }

    #[test]
    fn workload_fills_and_times() {
        let table = CoarseTable::with_hasher(256, FxBuildHasher::default());

        let time = run_workload(&table, 2, 2000, 0.8, Dist::Uniform, 0.0, 0.1, 7)
            .expect("workload should succeed");

        assert!(time >= 0.0);
        // Build phase inserted ops/2 keys; the mixed phase only adds fresh
        // ones, so the table can never shrink below the build footprint.
        assert!(table.len() >= 1000);
    }

    #[test]
    fn csv_block_has_exact_shape() {
        let cfg = BenchConfig {
            threads: vec![1, 2],
            strong_ops: 2000,
            weak_ops_per_thread: 500,
            mixes: vec![0.8],
            buckets: vec![64],
            p_hots: vec![0.9],
            modes: vec![Mode::Strong],
            ..BenchConfig::default()
        };

        let mut out = Vec::new();
        run_matrix(ImplChoice::Lockfree, &cfg, &mut out).expect("writing to a Vec cannot fail");

        let text = String::from_utf8(out).expect("csv output is utf-8");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.first(), Some(&"CSV_RESULTS_BEGIN"));
        assert_eq!(lines.get(1), Some(&CSV_HEADER));
        assert_eq!(lines.last(), Some(&"CSV_RESULTS_END"));

        // 1 uniform + 1 skew config per thread count.
        let data_rows = &lines[2..lines.len() - 1];
        assert_eq!(data_rows.len(), 4);

        for row in data_rows {
            assert_eq!(row.split(',').count(), 13);
            assert!(row.starts_with("lockfree,strong,80/20,"));
        }
    }

    #[test]
    fn every_impl_choice_builds() {
        let cfg = BenchConfig::default();

        for choice in [
            ImplChoice::Coarse,
            ImplChoice::CoarsePadded,
            ImplChoice::Fine,
            ImplChoice::FinePadded,
            ImplChoice::Segment,
            ImplChoice::Striped,
            ImplChoice::Lockfree,
            ImplChoice::Agh,
        ] {
            let table = choice.build(&cfg, 1024);

            assert_eq!(table.insert(1, 10), crate::table::InsertResult::Inserted);
            assert_eq!(table.get(&1), Some(10));
            assert_eq!(table.len(), 1);
            assert!(!table.name().is_empty());
        }
    }

    #[test]
    fn names_carry_tuning() {
        let cfg = BenchConfig {
            segments: Some(64),
            expected_threads: 16,
            stripe_factor: 2,
            ..BenchConfig::default()
        };

        assert_eq!(ImplChoice::Segment.build(&cfg, 16_384).name(), "segment-s64");
        assert_eq!(ImplChoice::Agh.build(&cfg, 16_384).name(), "agh-s64-k8-f2");
        assert_eq!(ImplChoice::Striped.build(&cfg, 16_384).name(), "striped-m256");
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut cfg = BenchConfig::default();
        cfg.threads.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = BenchConfig::default();
        cfg.mixes = vec![1.5];
        assert!(cfg.validate().is_err());

        let mut cfg = BenchConfig::default();
        cfg.hot_frac = 0.0;
        assert!(cfg.validate().is_err());

        assert!(BenchConfig::default().validate().is_ok());
        assert!(BenchConfig::quick().validate().is_ok());
    }
}
