//! BeaconChat Runtime
//!
//! This crate runs a BeaconChat session on top of a [`BroadcastTransport`]:
//! - `Coordinator`: the single task that owns the radio and session state
//! - `TransmitScheduler`: paces fragments of one message at a time
//! - `ReceivePipeline`: dedup, reassembly and classification of payloads
//! - `NearbyPeers`: broadcasters heard recently
//! - `LoopbackMedium`: an in-memory radio for tests and simulation
//!
//! Protocol logic lives in `beaconchat-core`; this crate adds time and tasks.

pub mod config;
pub mod coordinator;
pub mod listener;
pub mod loopback;
pub mod nearby;
pub mod pipeline;
pub mod scheduler;

pub use config::CoordinatorConfig;
pub use coordinator::{
    Coordinator, CoordinatorBuilder, CoordinatorStatus, SendOutcome, SendReceipt, TransmitState,
};
pub use listener::{dispatch, CallbackListener, ChannelListener, MessageListener};
pub use loopback::{LoopbackConfig, LoopbackMedium, LoopbackTransport, TickerGuard};
pub use nearby::{NearbyPeer, NearbyPeers};
pub use pipeline::{PipelineOutcome, ReceivePipeline};
pub use scheduler::{SequenceId, SequenceStep, StartedSequence, StepKind, TransmitScheduler};

// Re-export core types for convenience
pub use beaconchat_core::{
    BeaconError, BroadcastTransport, Identity, InboundMessage, PrivateMessage, PublicMessage,
    Result, SenderId, TransportEvent,
};
