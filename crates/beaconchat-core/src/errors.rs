//! Error types for the BeaconChat protocol
//!
//! Errors fall into two groups. [`BeaconError`] is what operations return to
//! their callers. The specific types ([`ParseError`], [`EnvelopeError`],
//! [`BroadcastFailure`], [`FragmentationError`]) describe individual failure
//! causes; the receive path logs and drops the first two instead of
//! propagating them, because the broadcast transport is best-effort.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Fragment Parse Errors
// ----------------------------------------------------------------------------

/// Reasons a raw advertisement payload is not a valid fragment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("Expected 3 colon-delimited segments, found {found}")]
    MissingSegments { found: usize },
    #[error("Empty message identifier")]
    EmptyMessageId,
    #[error("Part marker '{marker}' has no '/' separator")]
    MissingPartSeparator { marker: String },
    #[error("Invalid {field} number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("Part {part} outside of 1..={total}")]
    PartOutOfRange { part: u16, total: u16 },
    #[error("Fragment claims {total} parts (max {max})")]
    TooManyParts { total: u16, max: u16 },
}

// ----------------------------------------------------------------------------
// Envelope Errors
// ----------------------------------------------------------------------------

/// Reasons an envelope cannot be encoded or decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Expected 4 '|'-delimited fields, found {found}")]
    MissingFields { found: usize },
    #[error("Unrecognized message kind '{kind}'")]
    UnknownKind { kind: String },
    #[error("Private message content is not 'PRIVATE:<recipient>:<text>'")]
    MalformedPrivate,
    #[error("Field '{field}' cannot contain '{forbidden}'")]
    InvalidField {
        field: &'static str,
        forbidden: char,
    },
}

// ----------------------------------------------------------------------------
// Broadcast Failures
// ----------------------------------------------------------------------------

/// Why the radio refused to start a broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum BroadcastFailure {
    #[error("Payload too large: {size} bytes (max: {max})")]
    DataTooLarge { size: usize, max: usize },
    #[error("Advertising not supported by this adapter")]
    FeatureUnsupported,
    #[error("Too many concurrent advertisers")]
    TooManyAdvertisers,
    #[error("Advertising already started")]
    AlreadyStarted,
    #[error("Internal advertiser error: {reason}")]
    Internal { reason: String },
}

// ----------------------------------------------------------------------------
// Fragmentation Errors
// ----------------------------------------------------------------------------

/// Reasons an outbound envelope cannot be split into fragments
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FragmentationError {
    #[error("Chunk size {chunk_size} is below the minimum of {min}")]
    ChunkSizeTooSmall { chunk_size: usize, min: usize },
    #[error("Message needs {parts} fragments (max {max})")]
    MessageTooLarge { parts: usize, max: u16 },
}

// ----------------------------------------------------------------------------
// Main Error Type
// ----------------------------------------------------------------------------

/// Core error type for BeaconChat operations
#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("Transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    #[error("Broadcast failed: {0}")]
    Broadcast(#[from] BroadcastFailure),

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Fragment parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Fragmentation error: {0}")]
    Fragmentation(#[from] FragmentationError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Channel error: {message}")]
    Channel { message: String },
}

impl BeaconError {
    /// Create a transport-unavailable error
    pub fn transport_unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a generic transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a channel error
    pub fn channel(message: impl Into<String>) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    /// Whether this error prevents a session from starting at all
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable { .. } | Self::Configuration { .. } | Self::Channel { .. }
        )
    }
}

/// Result type for BeaconChat operations
pub type Result<T> = core::result::Result<T, BeaconError>;
