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

//! Hash-to-index mapping rules.
//!
//! Flat tables map a hash straight onto the bucket array. Segmented tables
//! split the hash so that segment selection consumes the low bits and
//! bucket-in-segment selection consumes the remaining high bits; reusing the
//! same bits for both would make bucket distribution within a segment a
//! function of segment selection.

use std::hash::{BuildHasher, Hash, Hasher};

pub(crate) fn hash_key<S: BuildHasher, K: Hash + ?Sized>(build_hasher: &S, key: &K) -> u64 {
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);

    hasher.finish()
}

pub(crate) fn flat_index(hash: u64, bucket_count: usize) -> usize {
    (hash % bucket_count as u64) as usize
}

pub(crate) fn segment_index(hash: u64, num_segments: usize) -> usize {
    (hash % num_segments as u64) as usize
}

/// Bucket index within a segment of `buckets_per_segment` buckets.
///
/// Divides the segment count out of the hash first so the low bits consumed
/// by segment selection are not consumed twice.
pub(crate) fn bucket_in_segment(hash: u64, num_segments: usize, buckets_per_segment: usize) -> usize {
    ((hash / num_segments as u64) % buckets_per_segment as u64) as usize
}

/// Exact distribution of `bucket_count` buckets over `num_segments`
/// segments: the first `bucket_count % num_segments` segments hold one extra
/// bucket, and the sizes always sum to `bucket_count`.
///
/// Callers clamp `num_segments` to `1..=bucket_count`, so every segment
/// holds at least one bucket.
pub(crate) fn segment_sizes(bucket_count: usize, num_segments: usize) -> Vec<usize> {
    let base = bucket_count / num_segments;
    let rem = bucket_count % num_segments;

    (0..num_segments)
        .map(|i| if i < rem { base + 1 } else { base })
        .collect()
}

/// Number of stripe locks for a segment of `buckets_per_segment` buckets.
///
/// The target is the next power of two of `expected_threads / factor`,
/// clamped to `1..=max_stripes` and halved until it no longer exceeds the
/// segment's bucket count. The result is always a power of two so stripe
/// selection can mask rather than divide.
pub(crate) fn choose_stripes(
    buckets_per_segment: usize,
    expected_threads: usize,
    factor: usize,
    max_stripes: usize,
) -> usize {
    let target = expected_threads / factor.max(1);
    let mut stripes = target.next_power_of_two().clamp(1, max_stripes.max(1));

    while stripes > buckets_per_segment && stripes > 1 {
        stripes >>= 1;
    }

    stripes.max(1)
}
