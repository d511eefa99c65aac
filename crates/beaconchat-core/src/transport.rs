//! Broadcast transport seam
//!
//! The radio is a black box that can keep one payload on the air and report
//! payloads heard from nearby broadcasters. Implementations push everything
//! they observe into a single event stream that the coordinator consumes.

use tokio::sync::mpsc;

use crate::errors::{BroadcastFailure, Result};
use crate::types::SenderId;

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Something the transport observed
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A payload was heard from a nearby broadcaster
    PayloadReceived {
        payload: Vec<u8>,
        sender: SenderId,
        rssi: Option<i16>,
    },
    /// The most recent broadcast is now on the air
    BroadcastStarted,
    /// The radio refused the most recent broadcast
    BroadcastFailed { reason: BroadcastFailure },
    /// Reception stopped unexpectedly
    ReceiveFailed { reason: String },
}

/// Sending half of the transport event stream
pub type TransportEventSender = mpsc::Sender<TransportEvent>;

/// Receiving half of the transport event stream
pub type TransportEventReceiver = mpsc::Receiver<TransportEvent>;

/// Create a bounded transport event channel
pub fn create_transport_event_channel(
    buffer: usize,
) -> (TransportEventSender, TransportEventReceiver) {
    mpsc::channel(buffer)
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Connectionless broadcast transport
///
/// A transport carries at most one outbound payload at a time; calling
/// [`broadcast`](Self::broadcast) replaces whatever was on the air.
/// Start and stop calls return once the request has been handed to the radio.
/// Whether the radio actually started is reported as an event, though
/// implementations may also return a [`BroadcastFailure`] directly when they
/// know synchronously.
#[async_trait::async_trait]
pub trait BroadcastTransport: Send {
    /// Attach the event stream this transport reports into
    fn attach_events(&mut self, events: TransportEventSender);

    /// Put `payload` on the air, replacing any active broadcast
    async fn broadcast(&mut self, payload: Vec<u8>) -> Result<()>;

    /// Take the active broadcast off the air; no-op when idle
    async fn stop_broadcast(&mut self) -> Result<()>;

    /// Begin reporting received payloads
    ///
    /// Fails with `TransportUnavailable` when the radio cannot be used.
    async fn start_receiving(&mut self) -> Result<()>;

    /// Stop reporting received payloads; no-op when not receiving
    async fn stop_receiving(&mut self) -> Result<()>;

    /// Largest payload the radio will accept
    fn max_payload_len(&self) -> usize;

    /// Short human-readable name for logs
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_channel_delivers_in_order() {
        let (tx, mut rx) = create_transport_event_channel(4);
        tx.send(TransportEvent::BroadcastStarted).await.unwrap();
        tx.send(TransportEvent::BroadcastFailed {
            reason: BroadcastFailure::FeatureUnsupported,
        })
        .await
        .unwrap();

        assert_eq!(rx.recv().await, Some(TransportEvent::BroadcastStarted));
        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::BroadcastFailed {
                reason: BroadcastFailure::FeatureUnsupported
            })
        );
    }
}
