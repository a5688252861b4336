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

//! Coarse-grained locked hash tables.
//!
//! One mutex guards the entire table. Every operation acquires it before
//! touching any bucket, so all mutations are serialized and the element
//! counter can be a plain integer living behind the same lock. This is the
//! simplest concurrent variant and the natural floor for scaling
//! comparisons.

use std::hash::{BuildHasher, Hash};
use std::ops::AddAssign;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

use crate::common::chain::Chain;
use crate::common::layout;
use crate::table::{ConcurrentTable, IncrementResult, InsertResult};
use crate::DefaultHashBuilder;

struct State<K, V> {
    chains: Box<[Chain<K, V>]>,
    len: usize,
}

impl<K: Eq, V> State<K, V> {
    fn with_bucket_count(bucket_count: usize) -> Self {
        Self {
            chains: (0..bucket_count).map(|_| Chain::new()).collect(),
            len: 0,
        }
    }

    fn insert(&mut self, idx: usize, key: K, value: V) -> InsertResult {
        let result = self.chains[idx].insert(key, value);

        if result == InsertResult::Inserted {
            self.len += 1;
        }

        result
    }

    fn increment(&mut self, idx: usize, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let result = self.chains[idx].increment(key, delta);

        if result == IncrementResult::Inserted {
            self.len += 1;
        }

        result
    }

    fn remove(&mut self, idx: usize, key: &K) -> bool {
        let removed = self.chains[idx].remove(key);

        if removed {
            self.len -= 1;
        }

        removed
    }
}

/// A chained hash table guarded by a single global mutex.
///
/// Operations on distinct keys contend on the same lock, so throughput does
/// not scale with threads; the variant exists to quantify exactly how much
/// that costs relative to the finer-grained tables in this crate.
pub struct CoarseTable<K, V, S = DefaultHashBuilder> {
    state: Mutex<State<K, V>>,
    build_hasher: S,
    bucket_count: usize,
}

impl<K: Hash + Eq, V> CoarseTable<K, V, DefaultHashBuilder> {
    /// Creates a table with `bucket_count` buckets (clamped to at least one).
    pub fn new(bucket_count: usize) -> Self {
        Self::with_hasher(bucket_count, DefaultHashBuilder::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> CoarseTable<K, V, S> {
    /// Creates a table that hashes keys with `build_hasher`.
    pub fn with_hasher(bucket_count: usize, build_hasher: S) -> Self {
        let bucket_count = bucket_count.max(1);

        Self {
            state: Mutex::new(State::with_bucket_count(bucket_count)),
            build_hasher,
            bucket_count,
        }
    }

    /// Adds or overwrites the entry for `key`.
    pub fn insert(&self, key: K, value: V) -> InsertResult {
        let idx = self.index(&key);

        self.state.lock().insert(idx, key, value)
    }

    /// Combines `delta` into the entry for `key`, inserting it if absent.
    pub fn increment(&self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let idx = self.index(&key);

        self.state.lock().increment(idx, key, delta)
    }

    /// Copies out the value mapped to `key`, if any.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let idx = self.index(key);

        self.state.lock().chains[idx].get(key)
    }

    /// Unlinks the entry for `key`, reporting whether one existed.
    pub fn remove(&self, key: &K) -> bool {
        let idx = self.index(key);

        self.state.lock().remove(idx, key)
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, key: &K) -> usize {
        layout::flat_index(
            layout::hash_key(&self.build_hasher, key),
            self.bucket_count,
        )
    }
}

impl<K, V, S> ConcurrentTable<K, V> for CoarseTable<K, V, S>
where
    K: Hash + Eq + Send,
    V: Clone + AddAssign + Send,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> InsertResult {
        CoarseTable::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<V> {
        CoarseTable::get(self, key)
    }

    fn remove(&self, key: &K) -> bool {
        CoarseTable::remove(self, key)
    }

    fn increment(&self, key: K, delta: V) -> IncrementResult {
        CoarseTable::increment(self, key, delta)
    }

    fn len(&self) -> usize {
        CoarseTable::len(self)
    }

    fn name(&self) -> String {
        "coarse".to_owned()
    }
}

/// [`CoarseTable`] with the global mutex in its own cache line.
///
/// Keeping the lock word out of the line holding the table header stops
/// reader threads spinning on the mutex from invalidating the line that
/// every operation must read to find the bucket array.
pub struct PaddedCoarseTable<K, V, S = DefaultHashBuilder> {
    state: CachePadded<Mutex<State<K, V>>>,
    build_hasher: S,
    bucket_count: usize,
}

impl<K: Hash + Eq, V> PaddedCoarseTable<K, V, DefaultHashBuilder> {
    /// Creates a table with `bucket_count` buckets (clamped to at least one).
    pub fn new(bucket_count: usize) -> Self {
        Self::with_hasher(bucket_count, DefaultHashBuilder::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> PaddedCoarseTable<K, V, S> {
    /// Creates a table that hashes keys with `build_hasher`.
    pub fn with_hasher(bucket_count: usize, build_hasher: S) -> Self {
        let bucket_count = bucket_count.max(1);

        Self {
            state: CachePadded::new(Mutex::new(State::with_bucket_count(bucket_count))),
            build_hasher,
            bucket_count,
        }
    }

    pub fn insert(&self, key: K, value: V) -> InsertResult {
        let idx = self.index(&key);

        self.state.lock().insert(idx, key, value)
    }

    pub fn increment(&self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let idx = self.index(&key);

        self.state.lock().increment(idx, key, delta)
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let idx = self.index(key);

        self.state.lock().chains[idx].get(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let idx = self.index(key);

        self.state.lock().remove(idx, key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index(&self, key: &K) -> usize {
        layout::flat_index(
            layout::hash_key(&self.build_hasher, key),
            self.bucket_count,
        )
    }
}

impl<K, V, S> ConcurrentTable<K, V> for PaddedCoarseTable<K, V, S>
where
    K: Hash + Eq + Send,
    V: Clone + AddAssign + Send,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> InsertResult {
        PaddedCoarseTable::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<V> {
        PaddedCoarseTable::get(self, key)
    }

    fn remove(&self, key: &K) -> bool {
        PaddedCoarseTable::remove(self, key)
    }

    fn increment(&self, key: K, delta: V) -> IncrementResult {
        PaddedCoarseTable::increment(self, key, delta)
    }

    fn len(&self) -> usize {
        PaddedCoarseTable::len(self)
    }

    fn name(&self) -> String {
        "coarse-padded".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Barrier};
    use std::thread::{self, JoinHandle};

    #[test]
    fn basic_operations() {
        let table = CoarseTable::new(128);

        assert_eq!(table.insert(1, 100), InsertResult::Inserted);
        assert_eq!(table.insert(2, 200), InsertResult::Inserted);
        assert_eq!(table.insert(1, 150), InsertResult::Replaced);
        assert!(table.remove(&1));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&2), Some(200));
        assert_eq!(table.get(&99), None);
    }

    #[test]
    fn disjoint_concurrent_inserts() {
        const NUM_THREADS: u64 = 4;
        const PER_THREAD: u64 = 1000;

        let table = Arc::new(CoarseTable::new(1024));
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

        let table = Arc::new(PaddedCoarseTable::new(1024));
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
    fn single_bucket_and_single_thread() {
        let table = PaddedCoarseTable::new(1);

        for i in 0..100 {
            table.insert(i, i);
        }

        assert_eq!(table.len(), 100);
        assert!(table.remove(&50));
        assert_eq!(table.insert(50, 500), InsertResult::Inserted);
        assert_eq!(table.get(&50), Some(500));
    }
}
