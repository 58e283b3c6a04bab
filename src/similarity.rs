//! Near-duplicate detection over fixed-length fingerprints.
//!
//! Two fingerprints are considered near-identical when the Hamming distance
//! between them (the number of set bits in their XOR) is at most a
//! threshold. The default threshold of [`DEFAULT_THRESHOLD`] bits is tuned
//! for 512-bit fingerprints; larger dimensions should raise it.
//!
//! # Scan Order
//!
//! The comparison walks the fingerprints one 64-bit word at a time so that a
//! "not similar" verdict can be returned as soon as the running total passes
//! the threshold. Trailing bytes that do not fill a whole word are packed
//! into a single word and counted once at the end. Scanning byte by byte, with
//! or without a per-byte early exit, yields the same verdict for every input.
//!
//! # Example
//!
//! ```
//! use fpcache::similarity::{similar, DEFAULT_THRESHOLD};
//!
//! let a = [0u8; 64];
//! let mut b = [0u8; 64];
//! b[0] = 0xFF;
//!
//! assert!(similar(&a, &b, DEFAULT_THRESHOLD).unwrap());
//! ```

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use bk_tree::{BKTree, Metric};
use thiserror::Error;

use crate::cache::CacheFile;

/// Maximum number of differing bits for two fingerprints to count as similar.
pub const DEFAULT_THRESHOLD: u32 = 64;

const WORD_BYTES: usize = 8;

/// Errors returned when comparing fingerprints.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimilarityError {
    /// The fingerprints do not have the same length.
    #[error("Fingerprint length mismatch: {left} bytes vs {right} bytes")]
    LengthMismatch {
        /// Length of the first fingerprint.
        left: usize,
        /// Length of the second fingerprint.
        right: usize,
    },
}

/// Returns `true` if `a` and `b` differ in at most `threshold` bits.
///
/// # Errors
///
/// Returns [`SimilarityError::LengthMismatch`] if the slices have different
/// lengths. Fingerprints are never truncated to a common length.
pub fn similar(a: &[u8], b: &[u8], threshold: u32) -> Result<bool, SimilarityError> {
    check_lengths(a, b)?;
    Ok(distance_within(a, b, threshold).is_some())
}

/// Computes the full Hamming distance between two fingerprints.
///
/// # Errors
///
/// Returns [`SimilarityError::LengthMismatch`] if the slices have different
/// lengths.
pub fn hamming_distance(a: &[u8], b: &[u8]) -> Result<u32, SimilarityError> {
    check_lengths(a, b)?;
    Ok(distance_within(a, b, u32::MAX).unwrap_or(u32::MAX))
}

fn check_lengths(a: &[u8], b: &[u8]) -> Result<(), SimilarityError> {
    if a.len() == b.len() {
        Ok(())
    } else {
        Err(SimilarityError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        })
    }
}

/// Word-at-a-time XOR/popcount scan.
///
/// Returns `Some(distance)` if the distance is within `threshold`, or `None`
/// as soon as the full words alone exceed it. Callers guarantee equal lengths.
fn distance_within(a: &[u8], b: &[u8], threshold: u32) -> Option<u32> {
    let mut words_a = a.chunks_exact(WORD_BYTES);
    let mut words_b = b.chunks_exact(WORD_BYTES);
    let mut total: u32 = 0;

    for (wa, wb) in words_a.by_ref().zip(words_b.by_ref()) {
        total += (load_word(wa) ^ load_word(wb)).count_ones();
        if total > threshold {
            return None;
        }
    }

    let tail = words_a
        .remainder()
        .iter()
        .zip(words_b.remainder())
        .fold(0u64, |packed, (x, y)| (packed << 8) | u64::from(x ^ y));
    total += tail.count_ones();

    (total <= threshold).then_some(total)
}

#[inline]
fn load_word(bytes: &[u8]) -> u64 {
    let mut word = [0u8; WORD_BYTES];
    word.copy_from_slice(bytes);
    u64::from_ne_bytes(word)
}

/// Hamming metric over raw fingerprint bytes.
///
/// Fingerprints of different lengths are infinitely far apart.
#[derive(Default, Clone, Copy, Debug)]
pub struct FingerprintMetric;

impl Metric<Vec<u8>> for FingerprintMetric {
    fn distance(&self, a: &Vec<u8>, b: &Vec<u8>) -> u32 {
        hamming_distance(a, b).unwrap_or(u32::MAX)
    }

    fn threshold_distance(&self, a: &Vec<u8>, b: &Vec<u8>, threshold: u32) -> Option<u32> {
        if a.len() != b.len() {
            return None;
        }
        distance_within(a, b, threshold)
    }
}

/// BK-tree over the fingerprints of a cache file.
///
/// Lets callers list near-duplicate entries without comparing every pair.
/// The tree holds each distinct fingerprint once; entries sharing a
/// fingerprint are grouped under it, since the tree cannot hold two keys
/// at distance 0.
pub struct SimilarityIndex {
    tree: BKTree<Vec<u8>, FingerprintMetric>,
    groups: HashMap<Vec<u8>, Vec<usize>>,
    len: usize,
}

impl SimilarityIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self {
            tree: BKTree::new(FingerprintMetric),
            groups: HashMap::new(),
            len: 0,
        }
    }

    /// Build an index holding every entry of `cache`, keyed by entry position.
    pub fn from_cache(cache: &CacheFile) -> Self {
        let mut index = Self::new();
        for entry in &cache.entries {
            index.insert(entry.fingerprint.clone());
        }
        index
    }

    /// Add a fingerprint; returns the index it was stored under.
    pub fn insert(&mut self, fingerprint: Vec<u8>) -> usize {
        let index = self.len;
        self.len += 1;
        match self.groups.entry(fingerprint) {
            Entry::Occupied(mut group) => group.get_mut().push(index),
            Entry::Vacant(slot) => {
                self.tree.add(slot.key().clone());
                slot.insert(vec![index]);
            }
        }
        index
    }

    /// Find all stored fingerprints within `threshold` bits of `fingerprint`.
    ///
    /// Returns `(distance, index)` pairs ordered by index.
    pub fn find(&self, fingerprint: &[u8], threshold: u32) -> Vec<(u32, usize)> {
        let mut found: Vec<(u32, usize)> = self
            .tree
            .find(&fingerprint.to_vec(), threshold)
            .flat_map(|(distance, key)| self.group(key).iter().map(move |&i| (distance, i)))
            .collect();
        found.sort_unstable_by_key(|&(_, index)| index);
        found
    }

    /// All unordered pairs `(i, j)` with `i < j` whose fingerprints are
    /// within `threshold` bits of each other, sorted.
    pub fn similar_pairs(&self, threshold: u32) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (fingerprint, left) in &self.groups {
            // Each hit includes the group itself at distance 0
            for (_, key) in self.tree.find(fingerprint, threshold) {
                for &i in left {
                    for &j in self.group(key) {
                        if i < j {
                            pairs.push((i, j));
                        }
                    }
                }
            }
        }
        pairs.sort_unstable();
        pairs
    }

    fn group(&self, key: &[u8]) -> &[usize] {
        self.groups.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns the number of fingerprints in the index.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::new()
    }
}
