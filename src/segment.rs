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

//! Segmented hash tables.
//!
//! The bucket array is divided into a fixed number of segments, each guarded
//! by one mutex. The lock count is therefore a small constant independent of
//! the bucket count: lock-table memory stays bounded and the locks warm up
//! quickly, at the cost of capping write concurrency at the segment count.
//!
//! Segment selection consumes the low bits of the hash and bucket-in-segment
//! selection consumes the remaining high bits, so bucket distribution inside
//! a segment is independent of which segment was picked. Each segment is
//! aligned to its own cache line.

use std::hash::{BuildHasher, Hash};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::common::chain::Chain;
use crate::common::layout;
use crate::table::{ConcurrentTable, IncrementResult, InsertResult};
use crate::DefaultHashBuilder;

/// Default segment count, matching the reference configuration.
pub const DEFAULT_SEGMENTS: usize = 16;

struct Segment<K, V> {
    buckets_per_segment: usize,
    chains: Mutex<Box<[Chain<K, V>]>>,
}

impl<K: Eq, V> Segment<K, V> {
    fn with_bucket_count(buckets_per_segment: usize) -> Self {
        Self {
            buckets_per_segment,
            chains: Mutex::new((0..buckets_per_segment).map(|_| Chain::new()).collect()),
        }
    }
}

/// A chained hash table with one mutex per segment of buckets.
pub struct SegmentTable<K, V, S = DefaultHashBuilder> {
    segments: Box<[CachePadded<Segment<K, V>>]>,
    build_hasher: S,
    len: AtomicUsize,
    bucket_count: usize,
}

impl<K: Hash + Eq, V> SegmentTable<K, V, DefaultHashBuilder> {
    /// Creates a table with `bucket_count` buckets over
    /// [`DEFAULT_SEGMENTS`] segments.
    pub fn new(bucket_count: usize) -> Self {
        Self::with_num_segments(bucket_count, DEFAULT_SEGMENTS)
    }

    /// Creates a table with `bucket_count` buckets over `num_segments`
    /// segments (clamped to `1..=bucket_count`).
    pub fn with_num_segments(bucket_count: usize, num_segments: usize) -> Self {
        Self::with_num_segments_and_hasher(
            bucket_count,
            num_segments,
            DefaultHashBuilder::default(),
        )
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> SegmentTable<K, V, S> {
    /// Creates a table with `num_segments` segments that hashes keys with
    /// `build_hasher`.
    ///
    /// Buckets are distributed exactly: segment sizes differ by at most one
    /// and sum to `bucket_count`.
    pub fn with_num_segments_and_hasher(
        bucket_count: usize,
        num_segments: usize,
        build_hasher: S,
    ) -> Self {
        let bucket_count = bucket_count.max(1);
        let num_segments = num_segments.clamp(1, bucket_count);

        let segments = layout::segment_sizes(bucket_count, num_segments)
            .into_iter()
            .map(|bps| CachePadded::new(Segment::with_bucket_count(bps)))
            .collect();

        Self {
            segments,
            build_hasher,
            len: AtomicUsize::new(0),
            bucket_count,
        }
    }

    /// Returns the number of segments fixed at construction.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Returns the total bucket count requested at construction.
    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn insert(&self, key: K, value: V) -> InsertResult {
        let (segment, idx) = self.locate(&key);
        let result = segment.chains.lock()[idx].insert(key, value);

        if result == InsertResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn increment(&self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let (segment, idx) = self.locate(&key);
        let result = segment.chains.lock()[idx].increment(key, delta);

        if result == IncrementResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let (segment, idx) = self.locate(key);

        segment.chains.lock()[idx].get(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let (segment, idx) = self.locate(key);
        let removed = segment.chains.lock()[idx].remove(key);

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

    fn locate(&self, key: &K) -> (&Segment<K, V>, usize) {
        let hash = layout::hash_key(&self.build_hasher, key);
        let segment = &*self.segments[layout::segment_index(hash, self.segments.len())];
        let idx = layout::bucket_in_segment(hash, self.segments.len(), segment.buckets_per_segment);

        (segment, idx)
    }
}

impl<K, V, S> ConcurrentTable<K, V> for SegmentTable<K, V, S>
where
    K: Hash + Eq + Send,
    V: Clone + AddAssign + Send,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> InsertResult {
        SegmentTable::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<V> {
        SegmentTable::get(self, key)
    }

    fn remove(&self, key: &K) -> bool {
        SegmentTable::remove(self, key)
    }

    fn increment(&self, key: K, delta: V) -> IncrementResult {
        SegmentTable::increment(self, key, delta)
    }

    fn len(&self) -> usize {
        SegmentTable::len(self)
    }

    fn name(&self) -> String {
        format!("segment-s{}", self.segments.len())
    }
}
