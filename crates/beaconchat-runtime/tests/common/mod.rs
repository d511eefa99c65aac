//! Shared helpers for runtime integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use beaconchat_core::{
    BeaconError, BroadcastTransport, MessageFragmenter, MessageId, Result, SenderId,
    TransportEvent, TransportEventSender,
};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Recorded {
    broadcasts: Vec<(Instant, Vec<u8>)>,
    stop_broadcasts: usize,
    receiving: bool,
    unavailable: bool,
    events: Option<TransportEventSender>,
}

/// Transport that records what it is asked to do
///
/// Clones share state, so a test keeps one clone while the coordinator owns
/// the other.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every broadcast call with the time it was made
    pub fn broadcasts(&self) -> Vec<(Instant, Vec<u8>)> {
        self.inner.lock().unwrap().broadcasts.clone()
    }

    /// Broadcast payloads as text
    pub fn payloads(&self) -> Vec<String> {
        self.broadcasts()
            .into_iter()
            .map(|(_, payload)| String::from_utf8(payload).unwrap())
            .collect()
    }

    pub fn stop_broadcasts(&self) -> usize {
        self.inner.lock().unwrap().stop_broadcasts
    }

    pub fn is_receiving(&self) -> bool {
        self.inner.lock().unwrap().receiving
    }

    /// Make every subsequent call fail as if the radio were switched off
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Deliver a raw payload as if it were heard from `sender`
    pub async fn inject(&self, payload: &[u8], sender: &str, rssi: Option<i16>) {
        let events = self
            .inner
            .lock()
            .unwrap()
            .events
            .clone()
            .expect("events attached");
        events
            .send(TransportEvent::PayloadReceived {
                payload: payload.to_vec(),
                sender: SenderId::new(sender),
                rssi,
            })
            .await
            .unwrap();
    }

    /// Deliver every fragment of `envelope` from `sender`
    pub async fn inject_envelope(&self, id: &str, envelope: &str, sender: &str) {
        for payload in wire(id, envelope) {
            self.inject(&payload, sender, Some(-55)).await;
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.lock().unwrap().unavailable {
            return Err(BeaconError::transport_unavailable("radio off"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl BroadcastTransport for RecordingTransport {
    fn attach_events(&mut self, events: TransportEventSender) {
        self.inner.lock().unwrap().events = Some(events);
    }

    async fn broadcast(&mut self, payload: Vec<u8>) -> Result<()> {
        self.check_available()?;
        self.inner
            .lock()
            .unwrap()
            .broadcasts
            .push((Instant::now(), payload));
        Ok(())
    }

    async fn stop_broadcast(&mut self) -> Result<()> {
        self.inner.lock().unwrap().stop_broadcasts += 1;
        Ok(())
    }

    async fn start_receiving(&mut self) -> Result<()> {
        self.check_available()?;
        self.inner.lock().unwrap().receiving = true;
        Ok(())
    }

    async fn stop_receiving(&mut self) -> Result<()> {
        self.inner.lock().unwrap().receiving = false;
        Ok(())
    }

    fn max_payload_len(&self) -> usize {
        31
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Wire payloads of `envelope` with the default chunk size
pub fn wire(id: &str, envelope: &str) -> Vec<Vec<u8>> {
    MessageFragmenter::fragment_message(MessageId::new(id), envelope, 12)
        .unwrap()
        .iter()
        .map(|fragment| fragment.to_bytes())
        .collect()
}
