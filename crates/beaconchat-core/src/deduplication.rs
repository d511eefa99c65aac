//! Duplicate suppression for a repeating advertise cycle
//!
//! A broadcaster keeps re-advertising its current fragment until it moves on,
//! so a receiver sees the same payload many times per second. This module
//! keeps a bounded FIFO of recently seen fingerprints to skip that repetition.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::config::{DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TRIM};
use crate::fragmentation::MessageId;
use crate::types::SenderId;

// ----------------------------------------------------------------------------
// Fingerprint
// ----------------------------------------------------------------------------

/// Truncated SHA-256 digest identifying a payload from one sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Fingerprint of a raw advertisement payload as heard from `sender`
    pub fn for_fragment(sender: &SenderId, raw: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"fragment");
        hasher.update(sender.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(raw);
        Self::from_digest(&hasher.finalize())
    }

    /// Fingerprint of a reassembled envelope
    pub fn for_message(sender: &SenderId, message_id: &MessageId, envelope: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"message");
        hasher.update(sender.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(message_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(envelope.as_bytes());
        Self::from_digest(&hasher.finalize())
    }

    /// Raw fingerprint bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(bytes)
    }
}

impl core::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&hex::encode(&self.0[..4]))
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters for cache behavior
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Fingerprints checked
    pub processed: u64,
    /// Fingerprints rejected as already seen
    pub duplicates: u64,
    /// Fingerprints dropped by trimming
    pub evictions: u64,
}

impl DedupStats {
    /// Fraction of checks that were duplicates
    pub fn duplicate_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.duplicates as f64 / self.processed as f64
        }
    }
}

// ----------------------------------------------------------------------------
// Deduplication Cache
// ----------------------------------------------------------------------------

/// Bounded insertion-ordered set of recently seen fingerprints
///
/// Once the size exceeds `capacity` the oldest `trim` entries are dropped in
/// one go. This is a soft cap, not an LRU: a payload re-heard right after its
/// entry was trimmed is processed once more.
#[derive(Debug, Clone)]
pub struct DeduplicationCache {
    order: VecDeque<Fingerprint>,
    seen: HashSet<Fingerprint>,
    capacity: usize,
    trim: usize,
    stats: DedupStats,
}

impl DeduplicationCache {
    /// Create a cache with the given cap and trim amount
    pub fn new(capacity: usize, trim: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity + 1),
            seen: HashSet::with_capacity(capacity + 1),
            capacity,
            trim: trim.clamp(1, capacity),
            stats: DedupStats::default(),
        }
    }

    /// Record `fingerprint`, returning false if it was already present
    pub fn should_process(&mut self, fingerprint: Fingerprint) -> bool {
        self.stats.processed += 1;

        if !self.seen.insert(fingerprint) {
            self.stats.duplicates += 1;
            trace!("Duplicate fingerprint {}", fingerprint);
            return false;
        }
        self.order.push_back(fingerprint);

        if self.order.len() > self.capacity {
            self.trim_oldest();
        }
        true
    }

    /// Whether `fingerprint` is currently recorded
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Forget every fingerprint; counters are kept
    pub fn reset(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    /// Number of fingerprints recorded
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Current counters
    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    fn trim_oldest(&mut self) {
        let count = self.trim.min(self.order.len());
        for fingerprint in self.order.drain(..count) {
            self.seen.remove(&fingerprint);
        }
        self.stats.evictions += count as u64;
        trace!("Trimmed {} oldest fingerprints, {} remain", count, self.order.len());
    }
}

impl Default for DeduplicationCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TRIM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(n: u32) -> Fingerprint {
        Fingerprint::for_fragment(&SenderId::new("aa:bb"), &n.to_be_bytes())
    }

    #[test]
    fn test_first_sighting_is_processed() {
        let mut cache = DeduplicationCache::default();
        assert!(cache.should_process(fingerprint(1)));
        assert!(!cache.should_process(fingerprint(1)));
        assert!(cache.should_process(fingerprint(2)));

        let stats = cache.stats();
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.duplicates, 1);
    }

    #[test]
    fn test_trim_after_cap_exceeded() {
        let mut cache = DeduplicationCache::default();
        for n in 0..50 {
            assert!(cache.should_process(fingerprint(n)));
        }
        assert_eq!(cache.len(), 50);

        assert!(cache.should_process(fingerprint(50)));
        assert_eq!(cache.len(), 26);
        assert_eq!(cache.stats().evictions, 25);

        // Oldest quarter is gone, newest survive
        assert!(!cache.contains(&fingerprint(0)));
        assert!(!cache.contains(&fingerprint(24)));
        assert!(cache.contains(&fingerprint(25)));
        assert!(cache.contains(&fingerprint(50)));
    }

    #[test]
    fn test_trimmed_entry_is_processed_again() {
        let mut cache = DeduplicationCache::new(4, 2);
        for n in 0..5 {
            cache.should_process(fingerprint(n));
        }
        assert!(cache.should_process(fingerprint(0)));
        assert!(!cache.should_process(fingerprint(4)));
    }

    #[test]
    fn test_reset_clears_entries() {
        let mut cache = DeduplicationCache::default();
        cache.should_process(fingerprint(7));
        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.should_process(fingerprint(7)));
    }

    #[test]
    fn test_fingerprints_depend_on_sender() {
        let a = Fingerprint::for_fragment(&SenderId::new("a"), b"0001:1/1:x");
        let b = Fingerprint::for_fragment(&SenderId::new("b"), b"0001:1/1:x");
        assert_ne!(a, b);

        let id = MessageId::new("0001");
        let m1 = Fingerprint::for_message(&SenderId::new("a"), &id, "x|1|PUBLIC|hi");
        let m2 = Fingerprint::for_message(&SenderId::new("a"), &id, "x|1|PUBLIC|ho");
        assert_ne!(m1, m2);
        assert_ne!(a, m1);
    }
}
