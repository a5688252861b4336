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

//! Fine-grained locked hash tables: one mutex per bucket.
//!
//! Operations on distinct buckets never contend. The element counter is a
//! relaxed atomic; the per-bucket critical sections order the structural
//! state, so the counter needs no ordering of its own.
//!
//! In the unpadded table, neighboring bucket locks share cache lines, so
//! threads hammering adjacent buckets still ping the same line back and
//! forth. [`PaddedFineTable`] aligns each bucket cell to its own cache line
//! to take that false sharing off the table.

use std::hash::{BuildHasher, Hash};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::common::chain::Chain;
use crate::common::layout;
use crate::table::{ConcurrentTable, IncrementResult, InsertResult};
use crate::DefaultHashBuilder;

/// A chained hash table with one mutex per bucket.
pub struct FineTable<K, V, S = DefaultHashBuilder> {
    buckets: Box<[Mutex<Chain<K, V>>]>,
    build_hasher: S,
    len: AtomicUsize,
}

impl<K: Hash + Eq, V> FineTable<K, V, DefaultHashBuilder> {
    /// Creates a table with `bucket_count` buckets (clamped to at least one).
    pub fn new(bucket_count: usize) -> Self {
        Self::with_hasher(bucket_count, DefaultHashBuilder::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> FineTable<K, V, S> {
    /// Creates a table that hashes keys with `build_hasher`.
    pub fn with_hasher(bucket_count: usize, build_hasher: S) -> Self {
        let bucket_count = bucket_count.max(1);

        Self {
            buckets: (0..bucket_count).map(|_| Mutex::new(Chain::new())).collect(),
            build_hasher,
            len: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, key: K, value: V) -> InsertResult {
        let idx = self.index(&key);
        let result = self.buckets[idx].lock().insert(key, value);

        if result == InsertResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn increment(&self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let idx = self.index(&key);
        let result = self.buckets[idx].lock().increment(key, delta);

        if result == IncrementResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.buckets[self.index(key)].lock().get(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let idx = self.index(key);
        let removed = self.buckets[idx].lock().remove(key);

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

    fn index(&self, key: &K) -> usize {
        layout::flat_index(
            layout::hash_key(&self.build_hasher, key),
            self.buckets.len(),
        )
    }
}

impl<K, V, S> ConcurrentTable<K, V> for FineTable<K, V, S>
where
    K: Hash + Eq + Send,
    V: Clone + AddAssign + Send,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> InsertResult {
        FineTable::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<V> {
        FineTable::get(self, key)
    }

    fn remove(&self, key: &K) -> bool {
        FineTable::remove(self, key)
    }

    fn increment(&self, key: K, delta: V) -> IncrementResult {
        FineTable::increment(self, key, delta)
    }

    fn len(&self) -> usize {
        FineTable::len(self)
    }

    fn name(&self) -> String {
        "fine".to_owned()
    }
}

/// [`FineTable`] with each bucket cell aligned to its own cache line.
pub struct PaddedFineTable<K, V, S = DefaultHashBuilder> {
    buckets: Box<[CachePadded<Mutex<Chain<K, V>>>]>,
    build_hasher: S,
    len: AtomicUsize,
}

impl<K: Hash + Eq, V> PaddedFineTable<K, V, DefaultHashBuilder> {
    /// Creates a table with `bucket_count` buckets (clamped to at least one).
    pub fn new(bucket_count: usize) -> Self {
        Self::with_hasher(bucket_count, DefaultHashBuilder::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> PaddedFineTable<K, V, S> {
    /// Creates a table that hashes keys with `build_hasher`.
    pub fn with_hasher(bucket_count: usize, build_hasher: S) -> Self {
        let bucket_count = bucket_count.max(1);

        Self {
            buckets: (0..bucket_count)
                .map(|_| CachePadded::new(Mutex::new(Chain::new())))
                .collect(),
            build_hasher,
            len: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, key: K, value: V) -> InsertResult {
        let idx = self.index(&key);
        let result = self.buckets[idx].lock().insert(key, value);

        if result == InsertResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn increment(&self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let idx = self.index(&key);
        let result = self.buckets[idx].lock().increment(key, delta);

        if result == IncrementResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.buckets[self.index(key)].lock().get(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let idx = self.index(key);
        let removed = self.buckets[idx].lock().remove(key);

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

    fn index(&self, key: &K) -> usize {
        layout::flat_index(
            layout::hash_key(&self.build_hasher, key),
            self.buckets.len(),
        )
    }
}

impl<K, V, S> ConcurrentTable<K, V> for PaddedFineTable<K, V, S>
where
    K: Hash + Eq + Send,
    V: Clone + AddAssign + Send,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> InsertResult {
        PaddedFineTable::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<V> {
        PaddedFineTable::get(self, key)
    }

    fn remove(&self, key: &K) -> bool {
        PaddedFineTable::remove(self, key)
    }

    fn increment(&self, key: K, delta: V) -> IncrementResult {
        PaddedFineTable::increment(self, key, delta)
    }

    fn len(&self) -> usize {
        PaddedFineTable::len(self)
    }

    fn name(&self) -> String {
        "fine-padded".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Barrier};
    use std::thread::{self, JoinHandle};

    #[test]
    fn basic_operations() {
        let table = FineTable::new(128);

        assert_eq!(table.insert(1, 100), InsertResult::Inserted);
        assert_eq!(table.insert(2, 200), InsertResult::Inserted);
        assert_eq!(table.insert(1, 150), InsertResult::Replaced);
        assert!(table.remove(&1));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&2), Some(200));
        assert_eq!(table.get(&99), None);
    }

    #[test]
    fn padded_cells_span_cache_lines() {
        assert!(std::mem::align_of::<CachePadded<Mutex<Chain<u64, u64>>>>() >= 64);
    }

    #[test]
    fn disjoint_concurrent_inserts() {
        const NUM_THREADS: u64 = 4;
        const PER_THREAD: u64 = 1000;

        let table = Arc::new(FineTable::new(1024));
        let barrier = Arc::new(Barrier::new(NUM_THREADS as usize));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|tid| {
                let table = table.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();

                    for key in (tid * PER_THREAD)..(tid * PER_THREAD + PER_THREAD) {
                        assert_eq!(table.insert(key, key * 10), InsertResult::Inserted);
                    }
                })
            })
            .collect();

        for result in threads.into_iter().map(JoinHandle::join) {
            assert!(result.is_ok());
        }

        assert_eq!(table.len(), (NUM_THREADS * PER_THREAD) as usize);

        for key in 0..(NUM_THREADS * PER_THREAD) {
            assert_eq!(table.get(&key), Some(key * 10));
        }
    }

    #[test]
    fn contended_increment() {
        const NUM_THREADS: usize = 8;
        const PER_THREAD: u64 = 10_000;

        let table = Arc::new(PaddedFineTable::new(1024));
        let barrier = Arc::new(Barrier::new(NUM_THREADS));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let table = table.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();

                    for _ in 0..PER_THREAD {
                        table.increment(42u64, 1u64);
                    }
                })
            })
            .collect();

        for result in threads.into_iter().map(JoinHandle::join) {
            assert!(result.is_ok());
        }

        assert_eq!(table.get(&42), Some(NUM_THREADS as u64 * PER_THREAD));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn concurrent_removal_of_disjoint_ranges() {
        const NUM_THREADS: u64 = 4;
        const PER_THREAD: u64 = 500;

        let table = Arc::new(FineTable::new(64));

        for key in 0..(NUM_THREADS * PER_THREAD) {
            table.insert(key, key);
        }

        let barrier = Arc::new(Barrier::new(NUM_THREADS as usize));

        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|tid| {
                let table = table.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    barrier.wait();

                    for key in (tid * PER_THREAD)..(tid * PER_THREAD + PER_THREAD) {
                        assert!(table.remove(&key));
                    }
                })
            })
            .collect();

        for result in threads.into_iter().map(JoinHandle::join) {
            assert!(result.is_ok());
        }

        assert!(table.is_empty());
    }

    #[test]
    fn single_bucket_collides_everything() {
        let table = FineTable::new(1);

        for i in 0..100 {
            table.insert(i, i);
        }

        assert_eq!(table.len(), 100);
        assert_eq!(table.get(&42), Some(42));
    }
}
