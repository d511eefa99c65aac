//! Message fragmentation and reassembly
//!
//! A serialized envelope is split into chunks small enough to ride in a BLE
//! advertisement. Each chunk travels as a text fragment:
//!
//! ```text
//! <messageId>:<partIndex>/<totalParts>:<chunk>
//! ```
//!
//! The message id is a short hex token taken from a coarse clock reading, so
//! two messages from different senders can share one. Reassembly is therefore
//! keyed by `(sender, messageId)`; the wire format itself carries no sender.

use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::errors::{FragmentationError, ParseError};
use crate::types::{SenderId, Timestamp};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Smallest chunk size that always fits one UTF-8 character
pub const MIN_CHUNK_SIZE: usize = 4;

/// Largest fragment count accepted from the wire or produced locally
pub const MAX_TOTAL_PARTS: u16 = 512;

/// Message ids are the wall clock modulo this value
const MESSAGE_ID_MODULUS: u64 = 10_000;

// ----------------------------------------------------------------------------
// Message Identifier
// ----------------------------------------------------------------------------

/// Short hex token shared by every fragment of one message
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Derive a message id from a wall-clock reading
    ///
    /// Unique only within a ten second window per sender.
    pub fn from_timestamp(timestamp: Timestamp) -> Self {
        Self(format!("{:04x}", timestamp.as_millis() % MESSAGE_ID_MODULUS))
    }

    /// Wrap an id received from the wire
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ----------------------------------------------------------------------------
// Fragment
// ----------------------------------------------------------------------------

/// One wire-sized piece of a serialized envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Identifier shared by all fragments of the message
    pub message_id: MessageId,
    /// 1-based position of this fragment
    pub part_index: u16,
    /// Number of fragments in the message
    pub total_parts: u16,
    /// Chunk of the envelope
    pub payload: String,
}

impl Fragment {
    /// Whether this fragment alone carries the whole message
    pub fn is_single(&self) -> bool {
        self.total_parts == 1
    }

    /// Whether this is the final fragment
    pub fn is_last(&self) -> bool {
        self.part_index == self.total_parts
    }

    /// Render the wire string
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Render the wire string as advertisement bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse a fragment from advertisement bytes
    pub fn from_bytes(raw: &[u8]) -> Result<Self, ParseError> {
        let text = core::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf8)?;
        text.parse()
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}:{}",
            self.message_id, self.part_index, self.total_parts, self.payload
        )
    }
}

impl FromStr for Fragment {
    type Err = ParseError;

    /// Parse `id:part/total:payload`; the payload may itself contain colons
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut segments = raw.splitn(3, ':');
        let (Some(id), Some(marker), Some(payload)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(ParseError::MissingSegments {
                found: raw.splitn(3, ':').count(),
            });
        };

        if id.is_empty() {
            return Err(ParseError::EmptyMessageId);
        }

        let (part, total) = marker
            .split_once('/')
            .ok_or_else(|| ParseError::MissingPartSeparator {
                marker: marker.to_string(),
            })?;
        let part = parse_number("part", part)?;
        let total = parse_number("total", total)?;

        if total > MAX_TOTAL_PARTS {
            return Err(ParseError::TooManyParts {
                total,
                max: MAX_TOTAL_PARTS,
            });
        }
        if part == 0 || part > total {
            return Err(ParseError::PartOutOfRange { part, total });
        }

        Ok(Self {
            message_id: MessageId::new(id),
            part_index: part,
            total_parts: total,
            payload: payload.to_string(),
        })
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<u16, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

// ----------------------------------------------------------------------------
// Message Fragmenter
// ----------------------------------------------------------------------------

/// Splits serialized envelopes into wire fragments
#[derive(Debug, Clone)]
pub struct MessageFragmenter {
    chunk_size: usize,
}

impl MessageFragmenter {
    /// Create a fragmenter producing chunks of at most `chunk_size` bytes
    pub fn new(chunk_size: usize) -> Result<Self, FragmentationError> {
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(FragmentationError::ChunkSizeTooSmall {
                chunk_size,
                min: MIN_CHUNK_SIZE,
            });
        }
        Ok(Self { chunk_size })
    }

    /// Configured chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split an envelope, deriving the message id from `now`
    pub fn fragment(
        &self,
        envelope: &str,
        now: Timestamp,
    ) -> Result<Vec<Fragment>, FragmentationError> {
        Self::fragment_message(MessageId::from_timestamp(now), envelope, self.chunk_size)
    }

    /// Split an envelope into fragments sharing `message_id`
    ///
    /// Chunks hold at most `chunk_size` bytes and never split a character.
    /// An empty envelope still yields a single empty fragment.
    pub fn fragment_message(
        message_id: MessageId,
        envelope: &str,
        chunk_size: usize,
    ) -> Result<Vec<Fragment>, FragmentationError> {
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(FragmentationError::ChunkSizeTooSmall {
                chunk_size,
                min: MIN_CHUNK_SIZE,
            });
        }

        let chunks = split_on_char_boundaries(envelope, chunk_size);
        if chunks.len() > usize::from(MAX_TOTAL_PARTS) {
            return Err(FragmentationError::MessageTooLarge {
                parts: chunks.len(),
                max: MAX_TOTAL_PARTS,
            });
        }

        let total = chunks.len() as u16;
        let fragments: Vec<Fragment> = chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| Fragment {
                message_id: message_id.clone(),
                part_index: index as u16 + 1,
                total_parts: total,
                payload: chunk.to_string(),
            })
            .collect();

        debug!(
            "Fragmented {} byte envelope into {} fragment(s) as message {}",
            envelope.len(),
            fragments.len(),
            message_id
        );
        Ok(fragments)
    }
}

fn split_on_char_boundaries(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut chunks = Vec::with_capacity(text.len().div_ceil(max_bytes).max(1));
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + max_bytes).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(&text[start..end]);
        start = end;
    }
    if chunks.is_empty() {
        chunks.push("");
    }
    chunks
}

// ----------------------------------------------------------------------------
// Fragment Reassembler
// ----------------------------------------------------------------------------

/// A fully reassembled envelope and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedEnvelope {
    pub sender: SenderId,
    pub message_id: MessageId,
    pub envelope: String,
}

type ReassemblyKey = (SenderId, MessageId);

/// State of a message being reassembled
#[derive(Debug)]
struct ReassemblyState {
    slots: Vec<Option<String>>,
    received: usize,
    first_received: Timestamp,
}

impl ReassemblyState {
    fn new(total_parts: u16, now: Timestamp) -> Self {
        Self {
            slots: vec![None; usize::from(total_parts)],
            received: 0,
            first_received: now,
        }
    }

    fn total_parts(&self) -> usize {
        self.slots.len()
    }

    fn store(&mut self, fragment: Fragment) {
        let slot = &mut self.slots[usize::from(fragment.part_index) - 1];
        if slot.is_none() {
            self.received += 1;
        }
        *slot = Some(fragment.payload);
    }

    fn is_complete(&self) -> bool {
        self.received == self.total_parts() && self.slots.iter().all(Option::is_some)
    }

    fn assemble(self) -> String {
        self.slots.into_iter().flatten().collect()
    }

    fn is_expired(&self, now: Timestamp, timeout_ms: u64) -> bool {
        now - self.first_received > timeout_ms
    }
}

/// Reassembles fragments into envelopes
pub struct MessageReassembler {
    states: HashMap<ReassemblyKey, ReassemblyState>,
    max_pending: usize,
    timeout_ms: u64,
}

impl MessageReassembler {
    /// Create a reassembler
    pub fn new(max_pending: usize, timeout: core::time::Duration) -> Self {
        Self {
            states: HashMap::new(),
            max_pending: max_pending.max(1),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Store a fragment, returning the envelope once every part is present
    ///
    /// Retransmitted parts overwrite their slot without being counted twice.
    /// A fragment whose total disagrees with an open entry replaces it, since
    /// that can only be a different message reusing the id.
    pub fn accept(
        &mut self,
        sender: &SenderId,
        fragment: Fragment,
        now: Timestamp,
    ) -> Option<CompletedEnvelope> {
        let key = (sender.clone(), fragment.message_id.clone());

        let stale = self
            .states
            .get(&key)
            .is_some_and(|state| state.total_parts() != usize::from(fragment.total_parts));
        if stale {
            debug!(
                "Message id {} from {} reused with a new part count, restarting reassembly",
                fragment.message_id, sender
            );
            self.states.remove(&key);
        }

        if !self.states.contains_key(&key) {
            while self.states.len() >= self.max_pending {
                if !self.evict_oldest() {
                    break;
                }
            }
            self.states
                .insert(key.clone(), ReassemblyState::new(fragment.total_parts, now));
        }

        let state = self.states.get_mut(&key)?;
        state.store(fragment);
        trace!(
            "Stored fragment for {}: {}/{}",
            key.1,
            state.received,
            state.total_parts()
        );

        if !state.is_complete() {
            return None;
        }

        let (sender, message_id) = key;
        let state = self.states.remove(&(sender.clone(), message_id.clone()))?;
        Some(CompletedEnvelope {
            sender,
            message_id,
            envelope: state.assemble(),
        })
    }

    /// Drop incomplete reassemblies older than the timeout
    pub fn cleanup_expired(&mut self, now: Timestamp) -> usize {
        let timeout_ms = self.timeout_ms;
        let before = self.states.len();
        self.states
            .retain(|_, state| !state.is_expired(now, timeout_ms));
        let removed = before - self.states.len();
        if removed > 0 {
            debug!("Expired {} incomplete reassembly(ies)", removed);
        }
        removed
    }

    /// Number of incomplete messages being tracked
    pub fn active_reassemblies(&self) -> usize {
        self.states.len()
    }

    /// Forget an incomplete message
    pub fn cancel_reassembly(&mut self, sender: &SenderId, message_id: &MessageId) -> bool {
        self.states
            .remove(&(sender.clone(), message_id.clone()))
            .is_some()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.states.clear();
    }

    fn evict_oldest(&mut self) -> bool {
        let oldest = self
            .states
            .iter()
            .min_by_key(|(_, state)| state.first_received)
            .map(|(key, _)| key.clone());
        match oldest {
            Some(key) => {
                debug!("Evicting oldest incomplete message {} from {}", key.1, key.0);
                self.states.remove(&key).is_some()
            }
            None => false,
        }
    }
}

impl Default for MessageReassembler {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_MAX_PENDING_REASSEMBLIES,
            crate::config::DEFAULT_REASSEMBLY_TIMEOUT,
        )
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
