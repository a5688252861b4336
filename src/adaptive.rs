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

//! Adaptive-stripe segmented hash tables.
//!
//! Like the segment table, the bucket array is split exactly across a small
//! fixed number of segments. Within each segment, `K` stripe locks multiply
//! write concurrency without growing the lock table with the bucket count.
//! `K` is chosen once at construction from the thread count the table is
//! expected to serve: `next_pow2(expected_threads / factor)`, clamped by a
//! ceiling and by the segment's own bucket count.
//!
//! The stripe for a bucket is `bucket_in_segment & (K - 1)`. Deriving it
//! from the bucket index rather than the raw hash means a bucket maps to
//! exactly one stripe, so two operations on the same bucket always take the
//! same lock. Stripe mappings never change mid-run.

use std::cell::UnsafeCell;
use std::hash::{BuildHasher, Hash};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::common::chain::Chain;
use crate::common::layout;
use crate::table::{ConcurrentTable, IncrementResult, InsertResult};
use crate::DefaultHashBuilder;

/// Default segment count, matching the reference tuning.
pub const DEFAULT_SEGMENTS: usize = 128;

/// Ceiling on stripes per segment.
pub const MAX_STRIPES: usize = 32;

/// Default divisor applied to the expected thread count when sizing stripes.
pub const DEFAULT_STRIPE_FACTOR: usize = 2;

struct Segment<K, V> {
    stripes: Box<[CachePadded<Mutex<()>>]>,
    // Invariant: chains[i] is only touched while holding
    // stripes[i & stripe_mask].
    chains: Box<[UnsafeCell<Chain<K, V>>]>,
    stripe_mask: usize,
    buckets_per_segment: usize,
}

impl<K: Eq, V> Segment<K, V> {
    fn with_bucket_count(buckets_per_segment: usize, num_stripes: usize) -> Self {
        Self {
            stripes: (0..num_stripes)
                .map(|_| CachePadded::new(Mutex::new(())))
                .collect(),
            chains: (0..buckets_per_segment)
                .map(|_| UnsafeCell::new(Chain::new()))
                .collect(),
            stripe_mask: num_stripes - 1,
            buckets_per_segment,
        }
    }
}

/// A segmented hash table with `K` stripe locks per segment, sized from the
/// expected thread count.
pub struct AdaptiveTable<K, V, S = DefaultHashBuilder> {
    segments: Box<[CachePadded<Segment<K, V>>]>,
    build_hasher: S,
    len: AtomicUsize,
    bucket_count: usize,
    stripes_per_segment: usize,
    stripe_factor: usize,
}

// SAFETY: chains are owned data reached only under the stripe lock derived
// from the same bucket index, so no two threads alias a chain mutably.
unsafe impl<K: Send, V: Send, S: Send> Send for AdaptiveTable<K, V, S> {}
unsafe impl<K: Send, V: Send, S: Sync> Sync for AdaptiveTable<K, V, S> {}

#[cfg(feature = "num-cpus")]
impl<K: Hash + Eq, V> AdaptiveTable<K, V, DefaultHashBuilder> {
    /// Creates a table with [`DEFAULT_SEGMENTS`] segments, stripes sized for
    /// as many threads as the system has CPUs.
    pub fn new(bucket_count: usize) -> Self {
        Self::with_tuning(bucket_count, DEFAULT_SEGMENTS, 0, DEFAULT_STRIPE_FACTOR)
    }
}

impl<K: Hash + Eq, V> AdaptiveTable<K, V, DefaultHashBuilder> {
    /// Creates a table with explicit tuning.
    ///
    /// `expected_threads == 0` means "size for this machine": the CPU count
    /// when the `num-cpus` feature is enabled, one otherwise.
    pub fn with_tuning(
        bucket_count: usize,
        num_segments: usize,
        expected_threads: usize,
        stripe_factor: usize,
    ) -> Self {
        Self::with_tuning_and_hasher(
            bucket_count,
            num_segments,
            expected_threads,
            stripe_factor,
            DefaultHashBuilder::default(),
        )
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> AdaptiveTable<K, V, S> {
    /// Creates a table with explicit tuning that hashes keys with
    /// `build_hasher`.
    pub fn with_tuning_and_hasher(
        bucket_count: usize,
        num_segments: usize,
        expected_threads: usize,
        stripe_factor: usize,
        build_hasher: S,
    ) -> Self {
        let bucket_count = bucket_count.max(1);
        let num_segments = num_segments.clamp(1, bucket_count);
        let expected_threads = if expected_threads == 0 {
            default_expected_threads()
        } else {
            expected_threads
        };
        let stripe_factor = stripe_factor.max(1);

        let segments: Box<[_]> = layout::segment_sizes(bucket_count, num_segments)
            .into_iter()
            .map(|bps| {
                let stripes = layout::choose_stripes(bps, expected_threads, stripe_factor, MAX_STRIPES);

                CachePadded::new(Segment::with_bucket_count(bps, stripes))
            })
            .collect();

        let stripes_per_segment = segments
            .first()
            .map(|segment| segment.stripes.len())
            .unwrap_or(1);

        Self {
            segments,
            build_hasher,
            len: AtomicUsize::new(0),
            bucket_count,
            stripes_per_segment,
            stripe_factor,
        }
    }

    /// Returns the number of segments fixed at construction.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Returns the stripe count chosen at construction for full-size
    /// segments.
    pub fn stripes_per_segment(&self) -> usize {
        self.stripes_per_segment
    }

    /// Returns the total bucket count requested at construction.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn insert(&self, key: K, value: V) -> InsertResult {
        let result = self.with_chain_mut(layout::hash_key(&self.build_hasher, &key), |chain| {
            chain.insert(key, value)
        });

        if result == InsertResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn increment(&self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let result = self.with_chain_mut(layout::hash_key(&self.build_hasher, &key), |chain| {
            chain.increment(key, delta)
        });

        if result == IncrementResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.with_chain_mut(layout::hash_key(&self.build_hasher, key), |chain| {
            chain.get(key)
        })
    }

    pub fn remove(&self, key: &K) -> bool {
        let removed = self.with_chain_mut(layout::hash_key(&self.build_hasher, key), |chain| {
            chain.remove(key)
        });

        if removed {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_chain_mut<R>(&self, hash: u64, f: impl FnOnce(&mut Chain<K, V>) -> R) -> R {
        let segment = &*self.segments[layout::segment_index(hash, self.segments.len())];
        let bucket_idx =
            layout::bucket_in_segment(hash, self.segments.len(), segment.buckets_per_segment);
        let stripe_idx = bucket_idx & segment.stripe_mask;

        let _guard = segment.stripes[stripe_idx].lock();

        // SAFETY: the stripe lock for this bucket is held for the whole
        // closure call; see the invariant on `Segment::chains`.
        let chain = unsafe { &mut *segment.chains[bucket_idx].get() };

        f(chain)
    }
}

fn default_expected_threads() -> usize {
    #[cfg(feature = "num-cpus")]
    {
        num_cpus::get()
    }
    #[cfg(not(feature = "num-cpus"))]
    {
        1
    }
}

impl<K, V, S> ConcurrentTable<K, V> for AdaptiveTable<K, V, S>
where
    K: Hash + Eq + Send,
    V: Clone + AddAssign + Send,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> InsertResult {
        AdaptiveTable::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<V> {
        AdaptiveTable::get(self, key)
    }

    fn remove(&self, key: &K) -> bool {
        AdaptiveTable::remove(self, key)
    }

    fn increment(&self, key: K, delta: V) -> IncrementResult {
        AdaptiveTable::increment(self, key, delta)
    }

    fn len(&self) -> usize {
        AdaptiveTable::len(self)
    }

    fn name(&self) -> String {
        format!(
            "agh-s{}-k{}-f{}",
            self.segments.len(),
            self.stripes_per_segment,
            self.stripe_factor
        )
    }
}
