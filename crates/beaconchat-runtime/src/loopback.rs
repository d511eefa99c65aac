//! In-memory broadcast medium
//!
//! Endpoints attached to one [`LoopbackMedium`] hear each other the way
//! radios in range do: every advertise tick, each endpoint's current payload
//! is delivered to every other endpoint that is receiving. Payloads stay on
//! the air until replaced or stopped, so receivers hear repeats.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use beaconchat_core::{
    BeaconError, BroadcastFailure, BroadcastTransport, Result, SenderId, TransportEvent,
    TransportEventSender,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Settings for a loopback medium
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopbackConfig {
    /// Interval between advertise rounds when ticking
    pub tick_interval: core::time::Duration,
    /// Largest payload an endpoint accepts
    pub max_payload_len: usize,
    /// Signal strength reported with every delivery
    pub rssi: i16,
    /// Probability in `[0, 1]` that a single delivery is lost
    pub drop_rate: f64,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            tick_interval: core::time::Duration::from_millis(100),
            max_payload_len: 31,
            rssi: -60,
            drop_rate: 0.0,
        }
    }
}

impl LoopbackConfig {
    pub fn with_tick_interval(mut self, interval: core::time::Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_drop_rate(mut self, rate: f64) -> Self {
        self.drop_rate = rate.clamp(0.0, 1.0);
        self
    }
}

#[derive(Debug, Default)]
struct EndpointState {
    name: String,
    on_air: Option<Vec<u8>>,
    receiving: bool,
    events: Option<TransportEventSender>,
}

#[derive(Debug, Default)]
struct MediumState {
    endpoints: BTreeMap<u64, EndpointState>,
    next_id: u64,
}

// ----------------------------------------------------------------------------
// Medium
// ----------------------------------------------------------------------------

/// Shared medium connecting loopback endpoints
#[derive(Debug, Clone)]
pub struct LoopbackMedium {
    state: Arc<Mutex<MediumState>>,
    config: LoopbackConfig,
}

impl LoopbackMedium {
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(MediumState::default())),
            config,
        }
    }

    // Never held across an await
    fn lock(&self) -> MutexGuard<'_, MediumState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a new endpoint; `name` becomes its sender id
    pub async fn endpoint(&self, name: impl Into<String>) -> LoopbackTransport {
        let name = name.into();
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.endpoints.insert(
            id,
            EndpointState {
                name: name.clone(),
                ..EndpointState::default()
            },
        );
        debug!("Loopback endpoint {} attached", name);

        LoopbackTransport {
            id,
            name,
            medium: self.clone(),
        }
    }

    /// Deliver every payload on the air to every other receiving endpoint
    ///
    /// Returns the number of deliveries made.
    pub async fn deliver_round(&self) -> usize {
        let deliveries: Vec<(TransportEventSender, SenderId, Vec<u8>)> = {
            let state = self.lock();
            let mut out = Vec::new();
            for (from_id, from) in &state.endpoints {
                let Some(payload) = &from.on_air else {
                    continue;
                };
                for (to_id, to) in &state.endpoints {
                    if to_id == from_id || !to.receiving {
                        continue;
                    }
                    if let Some(events) = &to.events {
                        out.push((events.clone(), SenderId::new(from.name.clone()), payload.clone()));
                    }
                }
            }
            out
        };

        let mut delivered = 0;
        for (events, sender, payload) in deliveries {
            if self.config.drop_rate > 0.0 && fastrand::f64() < self.config.drop_rate {
                trace!("Loopback dropped payload from {}", sender);
                continue;
            }
            let event = TransportEvent::PayloadReceived {
                payload,
                sender,
                rssi: Some(self.config.rssi),
            };
            match events.try_send(event) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Loopback delivery failed: {}", e),
            }
        }
        delivered
    }

    /// Run advertise rounds every tick until the guard is dropped
    pub fn start_ticker(&self) -> TickerGuard {
        let medium = self.clone();
        let period = self.config.tick_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                medium.deliver_round().await;
            }
        });
        TickerGuard { handle }
    }

    /// Payload currently on the air for the endpoint named `name`
    pub async fn on_air(&self, name: &str) -> Option<Vec<u8>> {
        let state = self.lock();
        state
            .endpoints
            .values()
            .find(|endpoint| endpoint.name == name)
            .and_then(|endpoint| endpoint.on_air.clone())
    }

    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }
}

impl Default for LoopbackMedium {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

/// Stops the medium ticker when dropped
#[derive(Debug)]
pub struct TickerGuard {
    handle: JoinHandle<()>,
}

impl Drop for TickerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ----------------------------------------------------------------------------
// Endpoint Transport
// ----------------------------------------------------------------------------

/// One endpoint on a [`LoopbackMedium`]
#[derive(Debug)]
pub struct LoopbackTransport {
    id: u64,
    name: String,
    medium: LoopbackMedium,
}

impl LoopbackTransport {
    fn with_endpoint<T>(&self, f: impl FnOnce(&mut EndpointState) -> T) -> Result<T> {
        let mut state = self.medium.lock();
        state
            .endpoints
            .get_mut(&self.id)
            .map(f)
            .ok_or_else(|| BeaconError::transport_unavailable(format!("{} detached", self.name)))
    }
}

#[async_trait::async_trait]
impl BroadcastTransport for LoopbackTransport {
    fn attach_events(&mut self, events: TransportEventSender) {
        if let Err(e) = self.with_endpoint(|endpoint| endpoint.events = Some(events)) {
            warn!("Cannot attach events: {}", e);
        }
    }

    async fn broadcast(&mut self, payload: Vec<u8>) -> Result<()> {
        let max = self.medium.config.max_payload_len;
        if payload.len() > max {
            return Err(BroadcastFailure::DataTooLarge {
                size: payload.len(),
                max,
            }
            .into());
        }

        let events = self
            .with_endpoint(|endpoint| {
                endpoint.on_air = Some(payload);
                endpoint.events.clone()
            })?;
        if let Some(events) = events {
            let _ = events.try_send(TransportEvent::BroadcastStarted);
        }
        Ok(())
    }

    async fn stop_broadcast(&mut self) -> Result<()> {
        self.with_endpoint(|endpoint| endpoint.on_air = None)
    }

    async fn start_receiving(&mut self) -> Result<()> {
        self.with_endpoint(|endpoint| endpoint.receiving = true)
    }

    async fn stop_receiving(&mut self) -> Result<()> {
        self.with_endpoint(|endpoint| endpoint.receiving = false)
    }

    fn max_payload_len(&self) -> usize {
        self.medium.config.max_payload_len
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.medium.lock().endpoints.remove(&self.id);
        debug!("Loopback endpoint {} detached", self.name);
    }
}
