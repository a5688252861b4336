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

//! Lock-striped hash tables.
//!
//! A fixed array of `M < bucket_count` mutexes guards the bucket array:
//! `bucket = hash mod N`, `lock = bucket mod M`. The lock is a function of
//! the bucket index, never of the raw hash, so one bucket always maps to
//! the same lock even when `M` does not divide `N`. Granularity sits
//! between the coarse and fine tables while keeping lock-table memory
//! bounded by `M` rather than `N`.

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

/// Default stripe count, matching the reference configuration.
pub const DEFAULT_LOCKS: usize = 256;

/// A chained hash table guarded by `M` lock stripes shared across the
/// bucket array.
pub struct StripedTable<K, V, S = DefaultHashBuilder> {
    locks: Box<[CachePadded<Mutex<()>>]>,
    // Invariant: chains[i] is only touched while holding
    // locks[i % locks.len()]. Every operation derives the lock index from
    // the bucket index i itself, so no two lock choices can disagree about
    // the same chain.
    chains: Box<[UnsafeCell<Chain<K, V>>]>,
    build_hasher: S,
    len: AtomicUsize,
}

// SAFETY: the chains are plain owned data; every access computes
// `bucket mod M` from the bucket index and holds that stripe lock for the
// duration of the access (see `with_chain_mut`), so no two threads alias a
// chain mutably.
unsafe impl<K: Send, V: Send, S: Send> Send for StripedTable<K, V, S> {}
unsafe impl<K: Send, V: Send, S: Sync> Sync for StripedTable<K, V, S> {}

impl<K: Hash + Eq, V> StripedTable<K, V, DefaultHashBuilder> {
    /// Creates a table with `bucket_count` buckets and [`DEFAULT_LOCKS`]
    /// stripes.
    pub fn new(bucket_count: usize) -> Self {
        Self::with_num_locks(bucket_count, DEFAULT_LOCKS)
    }

    /// Creates a table with `num_locks` stripes (clamped to
    /// `1..=bucket_count`).
    pub fn with_num_locks(bucket_count: usize, num_locks: usize) -> Self {
        Self::with_num_locks_and_hasher(bucket_count, num_locks, DefaultHashBuilder::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> StripedTable<K, V, S> {
    /// Creates a table that hashes keys with `build_hasher`.
    pub fn with_num_locks_and_hasher(
        bucket_count: usize,
        num_locks: usize,
        build_hasher: S,
    ) -> Self {
        let bucket_count = bucket_count.max(1);
        let num_locks = num_locks.clamp(1, bucket_count);

        Self {
            locks: (0..num_locks)
                .map(|_| CachePadded::new(Mutex::new(())))
                .collect(),
            chains: (0..bucket_count)
                .map(|_| UnsafeCell::new(Chain::new()))
                .collect(),
            build_hasher,
            len: AtomicUsize::new(0),
        }
    }

    /// Returns the number of lock stripes fixed at construction.
    pub fn num_locks(&self) -> usize {
        self.locks.len()
    }

    pub fn insert(&self, key: K, value: V) -> InsertResult {
        let hash = layout::hash_key(&self.build_hasher, &key);
        let result = self.with_chain_mut(hash, |chain| chain.insert(key, value));

        if result == InsertResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn increment(&self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let hash = layout::hash_key(&self.build_hasher, &key);
        let result = self.with_chain_mut(hash, |chain| chain.increment(key, delta));

        if result == IncrementResult::Inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let hash = layout::hash_key(&self.build_hasher, key);

        self.with_chain_mut(hash, |chain| chain.get(key))
    }

    pub fn remove(&self, key: &K) -> bool {
        let hash = layout::hash_key(&self.build_hasher, key);
        let removed = self.with_chain_mut(hash, |chain| chain.remove(key));

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
        let bucket_idx = layout::flat_index(hash, self.chains.len());
        // The lock comes from the bucket index, not the raw hash: when M
        // does not divide N, two hashes can share a bucket without sharing
        // `hash mod M`.
        let lock_idx = bucket_idx % self.locks.len();

        let _guard = self.locks[lock_idx].lock();

        // SAFETY: the stripe lock for this bucket is held for the whole
        // closure call; see the invariant on `chains`.
        let chain = unsafe { &mut *self.chains[bucket_idx].get() };

        f(chain)
    }
}

impl<K, V, S> ConcurrentTable<K, V> for StripedTable<K, V, S>
where
    K: Hash + Eq + Send,
    V: Clone + AddAssign + Send,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> InsertResult {
        StripedTable::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<V> {
        StripedTable::get(self, key)
    }

    fn remove(&self, key: &K) -> bool {
        StripedTable::remove(self, key)
    }

    fn increment(&self, key: K, delta: V) -> IncrementResult {
        StripedTable::increment(self, key, delta)
    }

    fn len(&self) -> usize {
        StripedTable::len(self)
    }

    fn name(&self) -> String {
        format!("striped-m{}", self.locks.len())
    }
}
