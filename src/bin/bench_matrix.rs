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

//! Runs the full scaling sweep for one table variant and prints a CSV block
//! on stdout.

use std::io;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use lockgrain::bench::{self, BenchConfig, ImplChoice, Mode};

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum SweepMode {
    Strong,
    Weak,
    Both,
}

#[derive(Debug, Parser)]
#[command(
    name = "bench_matrix",
    about = "Scaling benchmark matrix for the hash table variants"
)]
struct Args {
    /// Table variant to exercise.
    #[arg(long = "impl", value_enum)]
    implementation: ImplChoice,

    /// Comma-separated worker counts to sweep.
    #[arg(long, value_delimiter = ',')]
    threads: Option<Vec<usize>>,

    /// Total operations per strong-scaling run.
    #[arg(long)]
    strong_ops: Option<usize>,

    /// Operations per worker per weak-scaling run.
    #[arg(long)]
    weak_ops: Option<usize>,

    /// Comma-separated bucket counts to sweep.
    #[arg(long, value_delimiter = ',')]
    buckets: Option<Vec<usize>>,

    /// Comma-separated read ratios to sweep.
    #[arg(long, value_delimiter = ',')]
    mixes: Option<Vec<f64>>,

    /// Segment count for the segmented variants.
    #[arg(long)]
    segments: Option<usize>,

    /// Lock count for the striped variant.
    #[arg(long)]
    num_locks: Option<usize>,

    /// Expected thread count for adaptive striping (0 = machine size).
    #[arg(long)]
    expected_threads: Option<usize>,

    /// Stripe factor for adaptive striping.
    #[arg(long)]
    stripe_factor: Option<usize>,

    /// Hot-set size as a fraction of the populated keys.
    #[arg(long)]
    hot_frac: Option<f64>,

    /// Scaling mode to sweep (defaults to both).
    #[arg(long, value_enum)]
    mode: Option<SweepMode>,

    /// Base seed for the per-thread workload generators.
    #[arg(long)]
    seed: Option<u64>,

    /// Run a reduced matrix suitable for smoke tests.
    #[arg(long)]
    quick: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Echo any thread-binding hints so runs under a pinning wrapper are
    // reproducible from the log alone.
    for var in ["PROC_BIND", "PLACES"] {
        match std::env::var(var) {
            Ok(value) => eprintln!("{var}={value}"),
            Err(_) => eprintln!("{var}=(null)"),
        }
    }

    let mut cfg = if args.quick {
        BenchConfig::quick()
    } else {
        BenchConfig::default()
    };

    if let Some(threads) = args.threads {
        cfg.threads = threads;
    }

    if let Some(strong_ops) = args.strong_ops {
        cfg.strong_ops = strong_ops;
    }

    if let Some(weak_ops) = args.weak_ops {
        cfg.weak_ops_per_thread = weak_ops;
    }

    if let Some(buckets) = args.buckets {
        cfg.buckets = buckets;
    }

    if let Some(mixes) = args.mixes {
        cfg.mixes = mixes;
    }

    if args.segments.is_some() {
        cfg.segments = args.segments;
    }

    if let Some(num_locks) = args.num_locks {
        cfg.num_locks = num_locks;
    }

    if let Some(expected_threads) = args.expected_threads {
        cfg.expected_threads = expected_threads;
    }

    if let Some(stripe_factor) = args.stripe_factor {
        cfg.stripe_factor = stripe_factor;
    }

    if let Some(hot_frac) = args.hot_frac {
        cfg.hot_frac = hot_frac;
    }

    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }

    cfg.modes = match args.mode.unwrap_or(SweepMode::Both) {
        SweepMode::Strong => vec![Mode::Strong],
        SweepMode::Weak => vec![Mode::Weak],
        SweepMode::Both => vec![Mode::Strong, Mode::Weak],
    };

    if let Err(err) = cfg.validate() {
        eprintln!("error: {err}");

        return ExitCode::from(2);
    }

    match bench::run_matrix(args.implementation, &cfg, &mut io::stdout().lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");

            ExitCode::FAILURE
        }
    }
}
