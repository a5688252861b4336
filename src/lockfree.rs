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

//! A lock-free chained hash table.
//!
//! Each bucket is an atomic pointer to a singly linked chain of nodes whose
//! `next` pointers are themselves atomic. Inserts push at the bucket head
//! with a compare-and-swap; because every insert lands at the head, a
//! successful CAS proves that no entry for the same key appeared since the
//! chain was scanned. Values live in [`AtomicCell`]s so an insert that finds
//! its key can overwrite in place without taking part in the chain
//! protocol.
//!
//! Removal is two-phase. A node is first deleted logically by tagging its
//! `next` pointer, then unlinked physically by swinging the predecessor's
//! `next` (or the bucket head) past it. The tag doubles as a guard on the
//! predecessor: unlinking through a node that was itself deleted fails the
//! CAS, because its `next` no longer compares equal untagged. Traversals
//! treat tagged nodes as absent, and removers unlink any they step over.
//!
//! Reclamation is epoch-based. Unlinked nodes are retired through
//! [`Guard::defer_destroy`](crossbeam_epoch::Guard::defer_destroy) and
//! freed only once every thread that might
//! still hold a reference has unpinned, which also rules out ABA on the
//! head CAS: a node's address cannot be reused while any traversal could
//! still compare against it. Nodes still linked when the table is dropped
//! are freed exactly once by the destructor.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::ops::AddAssign;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use crossbeam_utils::atomic::AtomicCell;

use crate::common::layout;
use crate::table::{ConcurrentTable, IncrementResult, InsertResult};
use crate::DefaultHashBuilder;

const TOMBSTONE_TAG: usize = 1;

struct Node<K, V> {
    key: K,
    value: AtomicCell<V>,
    next: Atomic<Node<K, V>>,
}

/// A chained hash table whose buckets are CAS-linked chains.
///
/// Values must be `Copy` so they can be read and overwritten through an
/// [`AtomicCell`] while other threads traverse the chain.
pub struct LockFreeTable<K, V, S = DefaultHashBuilder> {
    buckets: Box<[Atomic<Node<K, V>>]>,
    build_hasher: S,
    len: AtomicUsize,
}

impl<K: Hash + Eq, V> LockFreeTable<K, V, DefaultHashBuilder> {
    /// Creates a table with `bucket_count` buckets (clamped to at least one).
    pub fn new(bucket_count: usize) -> Self {
        Self::with_hasher(bucket_count, DefaultHashBuilder::default())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> LockFreeTable<K, V, S> {
    /// Creates a table that hashes keys with `build_hasher`.
    pub fn with_hasher(bucket_count: usize, build_hasher: S) -> Self {
        let bucket_count = bucket_count.max(1);

        Self {
            buckets: (0..bucket_count).map(|_| Atomic::null()).collect(),
            build_hasher,
            len: AtomicUsize::new(0),
        }
    }

    /// Adds or overwrites the entry for `key`.
    pub fn insert(&self, key: K, value: V) -> InsertResult
    where
        V: Copy,
    {
        let guard = epoch::pin();
        let bucket = &self.buckets[self.index(&key)];
        let mut new_node = Owned::new(Node {
            key,
            value: AtomicCell::new(value),
            next: Atomic::null(),
        });

        loop {
            let head = bucket.load(Ordering::Acquire, &guard);

            let mut curr = head;
            // SAFETY: curr was loaded from a reachable link under `guard`,
            // so the node it points to cannot be freed while we hold it.
            while let Some(node) = unsafe { curr.as_ref() } {
                let next = node.next.load(Ordering::Acquire, &guard);

                if next.tag() == 0 && node.key == new_node.key {
                    node.value.store(value);

                    return InsertResult::Replaced;
                }

                curr = next.with_tag(0);
            }

            new_node.next.store(head, Ordering::Relaxed);

            match bucket.compare_exchange(
                head,
                new_node,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    self.len.fetch_add(1, Ordering::Relaxed);

                    return InsertResult::Inserted;
                }
                Err(err) => new_node = err.new,
            }
        }
    }

    /// Combines `delta` into the entry for `key`, inserting it if absent.
    pub fn increment(&self, key: K, delta: V) -> IncrementResult
    where
        V: Copy + Eq + AddAssign,
    {
        let guard = epoch::pin();
        let bucket = &self.buckets[self.index(&key)];
        let mut new_node = Owned::new(Node {
            key,
            value: AtomicCell::new(delta),
            next: Atomic::null(),
        });

        loop {
            let head = bucket.load(Ordering::Acquire, &guard);

            let mut curr = head;
            // SAFETY: as in `insert`; `guard` keeps every reachable node
            // alive for the duration of the scan.
            while let Some(node) = unsafe { curr.as_ref() } {
                let next = node.next.load(Ordering::Acquire, &guard);

                if next.tag() == 0 && node.key == new_node.key {
                    let mut current = node.value.load();

                    loop {
                        let mut updated = current;
                        updated += delta;

                        match node.value.compare_exchange(current, updated) {
                            Ok(_) => return IncrementResult::Updated,
                            Err(actual) => current = actual,
                        }
                    }
                }

                curr = next.with_tag(0);
            }

            new_node.next.store(head, Ordering::Relaxed);

            match bucket.compare_exchange(
                head,
                new_node,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    self.len.fetch_add(1, Ordering::Relaxed);

                    return IncrementResult::Inserted;
                }
                Err(err) => new_node = err.new,
            }
        }
    }

    /// Copies out the value mapped to `key`, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
        V: Copy,
    {
        let guard = epoch::pin();
        let mut curr = self.buckets[self.index(key)].load(Ordering::Acquire, &guard);

        // SAFETY: every node reached here was loaded from a reachable link
        // under `guard`.
        while let Some(node) = unsafe { curr.as_ref() } {
            let next = node.next.load(Ordering::Acquire, &guard);

            if next.tag() == 0 && node.key.borrow() == key {
                return Some(node.value.load());
            }

            curr = next.with_tag(0);
        }

        None
    }

    /// Unlinks the entry for `key`, reporting whether one existed.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let guard = epoch::pin();
        let bucket = &self.buckets[self.index(key)];

        'retry: loop {
            // The link whose current value should be `curr`; starts at the
            // bucket head and advances to each live node's `next`.
            let mut prev_link = bucket;
            let mut curr = prev_link.load(Ordering::Acquire, &guard);

            // SAFETY: nodes are pinned by `guard` for the whole scan.
            while let Some(node) = unsafe { curr.as_ref() } {
                let next = node.next.load(Ordering::Acquire, &guard);

                if next.tag() == TOMBSTONE_TAG {
                    // Unlink the logically deleted node before stepping past
                    // it, so dead nodes cannot pile up ahead of us.
                    match prev_link.compare_exchange(
                        curr,
                        next.with_tag(0),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                        &guard,
                    ) {
                        Ok(_) => {
                            // SAFETY: the node is no longer reachable from
                            // the table; the epoch collector frees it after
                            // all current readers unpin.
                            unsafe { guard.defer_destroy(curr) };

                            curr = next.with_tag(0);
                        }
                        Err(_) => continue 'retry,
                    }

                    continue;
                }

                if node.key.borrow() == key {
                    // Logical delete; this CAS is the linearization point.
                    if node
                        .next
                        .compare_exchange(
                            next,
                            next.with_tag(TOMBSTONE_TAG),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                            &guard,
                        )
                        .is_err()
                    {
                        continue 'retry;
                    }

                    self.len.fetch_sub(1, Ordering::Relaxed);

                    // Physical unlink. A failure means a concurrent
                    // operation changed the predecessor; some later remove
                    // passing this bucket will finish the job, and the
                    // destructor frees whatever is still linked.
                    if prev_link
                        .compare_exchange(curr, next, Ordering::AcqRel, Ordering::Acquire, &guard)
                        .is_ok()
                    {
                        // SAFETY: unreachable from the table as of the CAS.
                        unsafe { guard.defer_destroy(curr) };
                    }

                    return true;
                }

                prev_link = &node.next;
                curr = next;
            }

            return false;
        }
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index<Q: ?Sized + Hash>(&self, key: &Q) -> usize {
        layout::flat_index(
            layout::hash_key(&self.build_hasher, key),
            self.buckets.len(),
        )
    }
}

impl<K, V, S> Drop for LockFreeTable<K, V, S> {
    fn drop(&mut self) {
        // `&mut self` proves no operation is in flight; walk each chain and
        // free every still-linked node exactly once. Nodes retired through
        // `defer_destroy` are no longer reachable from the buckets.
        //
        // SAFETY: no concurrent accessors exist, so an unprotected guard is
        // sufficient and every load is quiescent.
        let guard = unsafe { epoch::unprotected() };

        for bucket in self.buckets.iter() {
            let mut curr = bucket.load(Ordering::Relaxed, guard);

            while !curr.is_null() {
                // SAFETY: curr is non-null and owned solely by the table.
                let node = unsafe { curr.into_owned() };
                curr = node.next.load(Ordering::Relaxed, guard).with_tag(0);
            }
        }
    }
}

impl<K, V, S> ConcurrentTable<K, V> for LockFreeTable<K, V, S>
where
    K: Hash + Eq + Send + Sync,
    V: Copy + Eq + AddAssign + Send,
    S: BuildHasher + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> InsertResult {
        LockFreeTable::insert(self, key, value)
    }

    fn get(&self, key: &K) -> Option<V> {
        LockFreeTable::get(self, key)
    }

    fn remove(&self, key: &K) -> bool {
        LockFreeTable::remove(self, key)
    }

    fn increment(&self, key: K, delta: V) -> IncrementResult {
        LockFreeTable::increment(self, key, delta)
    }

    fn len(&self) -> usize {
        LockFreeTable::len(self)
    }

    fn name(&self) -> String {
        "lockfree".to_owned()
    }
}
