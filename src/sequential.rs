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

//! A single-writer chained hash table.
//!
//! This variant carries no synchronization at all: operations take
//! `&mut self` and the element counter is a plain integer. It exists as the
//! correctness oracle the concurrent variants are tested against and as the
//! sequential baseline the benchmark harness divides by to compute speedup.

use std::hash::{BuildHasher, Hash};
use std::ops::AddAssign;

use crate::common::chain::Chain;
use crate::common::layout;
use crate::table::{IncrementResult, InsertResult};
use crate::DefaultHashBuilder;

pub struct SequentialTable<K, V, S = DefaultHashBuilder> {
    chains: Box<[Chain<K, V>]>,
    len: usize,
    build_hasher: S,
}

impl<K: Hash + Eq, V> SequentialTable<K, V, DefaultHashBuilder> {
    /// Creates a table with `bucket_count` buckets (clamped to at least one).
    pub fn new(bucket_count: usize) -> Self {
        Self::with_hasher(bucket_count, DefaultHashBuilder::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> SequentialTable<K, V, S> {
    /// Creates a table that hashes keys with `build_hasher`.
    pub fn with_hasher(bucket_count: usize, build_hasher: S) -> Self {
        let bucket_count = bucket_count.max(1);

        Self {
            chains: (0..bucket_count).map(|_| Chain::new()).collect(),
            len: 0,
            build_hasher,
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> InsertResult {
        let idx = self.index(&key);
        let result = self.chains[idx].insert(key, value);

        if result == InsertResult::Inserted {
            self.len += 1;
        }

        result
    }

    pub fn increment(&mut self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let idx = self.index(&key);
        let result = self.chains[idx].increment(key, delta);

        if result == IncrementResult::Inserted {
            self.len += 1;
        }

        result
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.chains[self.index(key)].get(key)
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let idx = self.index(key);
        let removed = self.chains[idx].remove(key);

        if removed {
            self.len -= 1;
        }

        removed
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn name(&self) -> String {
        "sequential".to_owned()
    }

    fn index(&self, key: &K) -> usize {
        layout::flat_index(
            layout::hash_key(&self.build_hasher, key),
            self.chains.len(),
        )
    }
}
