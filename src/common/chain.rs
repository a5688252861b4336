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

use std::ops::AddAssign;

use crate::table::{IncrementResult, InsertResult};

/// One entry: an immutable key paired with a mutable value.
#[derive(Clone, Debug)]
pub(crate) struct KeyValue<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
}

struct Node<K, V> {
    kv: KeyValue<K, V>,
    next: Option<Box<Node<K, V>>>,
}

/// An owned, singly linked sequence of entries in insertion order.
///
/// The chain itself carries no synchronization; callers hold whatever lock
/// covers the bucket before touching it. Updates leave the matching node in
/// place, so the relative order of surviving entries never changes.
pub(crate) struct Chain<K, V> {
    head: Option<Box<Node<K, V>>>,
}

impl<K: Eq, V> Chain<K, V> {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn insert(&mut self, key: K, value: V) -> InsertResult {
        let mut cur = &mut self.head;

        loop {
            match cur {
                Some(node) if node.kv.key == key => {
                    node.kv.value = value;

                    return InsertResult::Replaced;
                }
                Some(node) => cur = &mut node.next,
                None => break,
            }
        }

        *cur = Some(Box::new(Node {
            kv: KeyValue { key, value },
            next: None,
        }));

        InsertResult::Inserted
    }

    pub(crate) fn increment(&mut self, key: K, delta: V) -> IncrementResult
    where
        V: AddAssign,
    {
        let mut cur = &mut self.head;

        loop {
            match cur {
                Some(node) if node.kv.key == key => {
                    node.kv.value += delta;

                    return IncrementResult::Updated;
                }
                Some(node) => cur = &mut node.next,
                None => break,
            }
        }

        *cur = Some(Box::new(Node {
            kv: KeyValue { key, value: delta },
            next: None,
        }));

        IncrementResult::Inserted
    }

    pub(crate) fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let mut cur = self.head.as_deref();

        while let Some(node) = cur {
            if node.kv.key == *key {
                return Some(node.kv.value.clone());
            }

            cur = node.next.as_deref();
        }

        None
    }

    pub(crate) fn remove(&mut self, key: &K) -> bool {
        let mut cur = &mut self.head;

        loop {
            match cur {
                Some(node) if node.kv.key == *key => break,
                Some(node) => cur = &mut node.next,
                None => return false,
            }
        }

        match cur.take() {
            Some(node) => {
                *cur = node.next;

                true
            }
            None => false,
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let mut cur = self.head.as_deref();

        std::iter::from_fn(move || {
            let node = cur?;
            cur = node.next.as_deref();

            Some((&node.kv.key, &node.kv.value))
        })
    }
}

impl<K, V> Drop for Chain<K, V> {
    // Iterative teardown; a Box-recursive drop would be bounded by the
    // longest chain.
    fn drop(&mut self) {
        let mut cur = self.head.take();

        while let Some(mut node) = cur {
            cur = node.next.take();
        }
    }
}
