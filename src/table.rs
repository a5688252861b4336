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

//! The uniform surface shared by every concurrent table variant.

/// Outcome of an insert-or-overwrite operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertResult {
    /// The key was not present; a new entry was appended.
    Inserted,
    /// The key was present; its value was overwritten in place.
    Replaced,
}

/// Outcome of an additive update.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IncrementResult {
    /// The key was not present; a new entry was appended with the delta as
    /// its initial value.
    Inserted,
    /// The key was present; the delta was combined into its value in place.
    Updated,
}

/// A key to value mapping that may be driven from many threads at once.
///
/// All operations are total: they never block indefinitely on anything other
/// than the lock (or retry loop) guarding the targeted bucket, and they
/// report their outcome through the returned discriminant rather than by
/// panicking.
///
/// [`len`] is exact once all writers have quiesced. While writers are active
/// it may transiently differ from the number of reachable entries by at most
/// the number of in-flight inserts and removes.
///
/// [`len`]: ConcurrentTable::len
pub trait ConcurrentTable<K, V>: Send + Sync {
    /// Adds or overwrites the entry for `key`.
    fn insert(&self, key: K, value: V) -> InsertResult;

    /// Copies out the value mapped to `key`, if any.
    fn get(&self, key: &K) -> Option<V>;

    /// Unlinks the entry for `key`, reporting whether one existed.
    fn remove(&self, key: &K) -> bool;

    /// Combines `delta` into the entry for `key`, inserting it as the
    /// initial value if the key is absent.
    fn increment(&self, key: K, delta: V) -> IncrementResult;

    /// Returns the number of entries in the table.
    fn len(&self) -> usize;

    /// Returns `true` if the table holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A stable short identifier for this variant, including any tuning
    /// parameters fixed at construction.
    fn name(&self) -> String;
}
