//! Protocol configuration
//!
//! Tunables shared by the sender and receiver halves of the protocol. The
//! defaults reproduce the behavior deployed clients expect: 12-byte chunks,
//! 900ms between fragments, and a 50-entry duplicate cache trimmed by 25.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{BeaconError, Result};
use crate::fragmentation::{MAX_TOTAL_PARTS, MIN_CHUNK_SIZE};

// ----------------------------------------------------------------------------
// Defaults
// ----------------------------------------------------------------------------

/// Default bytes of envelope carried per fragment
pub const DEFAULT_CHUNK_SIZE: usize = 12;

/// Default delay between consecutive fragment broadcasts
pub const DEFAULT_INTER_FRAGMENT_DELAY: Duration = Duration::from_millis(900);

/// Default duplicate cache cap
pub const DEFAULT_DEDUP_CAPACITY: usize = 50;

/// Default number of oldest entries dropped when the cap is exceeded
pub const DEFAULT_DEDUP_TRIM: usize = 25;

/// Default lifetime of an incomplete reassembly
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum number of incomplete reassemblies kept at once
pub const DEFAULT_MAX_PENDING_REASSEMBLIES: usize = 100;

// ----------------------------------------------------------------------------
// Protocol Configuration
// ----------------------------------------------------------------------------

/// Configuration for fragmentation, reassembly and deduplication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Maximum envelope bytes per fragment
    pub chunk_size: usize,
    /// Delay between consecutive fragments of one message
    pub inter_fragment_delay: Duration,
    /// Duplicate cache cap
    pub dedup_capacity: usize,
    /// Entries evicted once the cap is exceeded
    pub dedup_trim: usize,
    /// Incomplete reassemblies older than this are discarded
    pub reassembly_timeout: Duration,
    /// Maximum concurrent incomplete reassemblies
    pub max_pending_reassemblies: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inter_fragment_delay: DEFAULT_INTER_FRAGMENT_DELAY,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            dedup_trim: DEFAULT_DEDUP_TRIM,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            max_pending_reassemblies: DEFAULT_MAX_PENDING_REASSEMBLIES,
        }
    }
}

impl ProtocolConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the delay between fragments
    pub fn with_inter_fragment_delay(mut self, delay: Duration) -> Self {
        self.inter_fragment_delay = delay;
        self
    }

    /// Set the duplicate cache cap and trim amount
    pub fn with_dedup_limits(mut self, capacity: usize, trim: usize) -> Self {
        self.dedup_capacity = capacity;
        self.dedup_trim = trim;
        self
    }

    /// Set the reassembly timeout
    pub fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    /// Set the maximum number of pending reassemblies
    pub fn with_max_pending_reassemblies(mut self, max: usize) -> Self {
        self.max_pending_reassemblies = max;
        self
    }

    /// Longest wire string a fragment can produce with this chunk size
    ///
    /// `id(4) + ':' + part/total + ':' + chunk`, with part and total sized
    /// for the largest accepted fragment count.
    pub fn max_fragment_wire_len(&self) -> usize {
        let digits = MAX_TOTAL_PARTS.to_string().len();
        4 + 1 + digits * 2 + 1 + 1 + self.chunk_size
    }

    /// Reject settings the codec cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(BeaconError::configuration(format!(
                "chunk_size must be at least {MIN_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.inter_fragment_delay.is_zero() {
            return Err(BeaconError::configuration(
                "inter_fragment_delay must be non-zero",
            ));
        }
        if self.dedup_capacity == 0 {
            return Err(BeaconError::configuration("dedup_capacity must be non-zero"));
        }
        if self.dedup_trim == 0 || self.dedup_trim > self.dedup_capacity {
            return Err(BeaconError::configuration(format!(
                "dedup_trim must be within 1..={}, got {}",
                self.dedup_capacity, self.dedup_trim
            )));
        }
        if self.max_pending_reassemblies == 0 {
            return Err(BeaconError::configuration(
                "max_pending_reassemblies must be non-zero",
            ));
        }
        Ok(())
    }
}
