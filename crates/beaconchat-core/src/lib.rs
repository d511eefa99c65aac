//! BeaconChat Core Protocol Implementation
//!
//! This crate provides the pure protocol logic for chatting over BLE
//! advertisements: the fragment wire codec, the envelope grammar that
//! multiplexes public and private messages over one broadcast channel,
//! fragment reassembly, duplicate suppression, and the transport seam that
//! radio adapters implement.
//!
//! Nothing in here performs I/O. Timing-sensitive operations take the
//! current [`Timestamp`] as an argument so they stay deterministic under test.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod deduplication;
pub mod envelope;
pub mod errors;
pub mod fragmentation;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::ProtocolConfig;
pub use deduplication::{DedupStats, DeduplicationCache, Fingerprint};
pub use envelope::{
    Envelope, EnvelopePayload, InboundMessage, MessageKind, PrivateMessage, PublicMessage,
};
pub use errors::{
    BeaconError, BroadcastFailure, EnvelopeError, FragmentationError, ParseError, Result,
};
pub use fragmentation::{
    CompletedEnvelope, Fragment, MessageFragmenter, MessageId, MessageReassembler,
};
pub use transport::{
    create_transport_event_channel, BroadcastTransport, TransportEvent, TransportEventReceiver,
    TransportEventSender,
};
pub use types::{
    estimate_distance_meters, Identity, SenderId, SystemTimeSource, TimeSource, Timestamp,
    DEFAULT_TAG,
};
