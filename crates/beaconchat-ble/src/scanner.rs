//! Advertisement scanning with btleplug
//!
//! Listens for service data carrying the chat service UUID and forwards each
//! payload as a [`TransportEvent::PayloadReceived`]. Duplicate suppression is
//! left to the receive pipeline; the radio reports every advertisement it
//! hears.

use beaconchat_core::{SenderId, TransportEvent, TransportEventSender};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;
use crate::protocol::{extract_payload, sender_id};

// ----------------------------------------------------------------------------
// Scanner
// ----------------------------------------------------------------------------

/// Central-mode scanner feeding the transport event channel
pub struct BleScanner {
    config: BleTransportConfig,
    adapter: Option<Adapter>,
    task: Option<JoinHandle<()>>,
}

impl BleScanner {
    pub fn new(config: BleTransportConfig) -> Self {
        Self {
            config,
            adapter: None,
            task: None,
        }
    }

    /// Initialize BLE adapter
    async fn initialize_adapter(&mut self) -> Result<Adapter, BleTransportError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|_| BleTransportError::AdapterNotAvailable)?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|_| BleTransportError::AdapterNotAvailable)?;

        if adapters.is_empty() {
            return Err(BleTransportError::AdapterNotAvailable);
        }
        let adapter = adapters
            .get(self.config.adapter_index)
            .cloned()
            .ok_or(BleTransportError::AdapterNotFound {
                index: self.config.adapter_index,
                count: adapters.len(),
            })?;

        info!("BLE adapter initialized");
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    /// Start scanning and forwarding payloads into `events`
    pub async fn start(&mut self, events: TransportEventSender) -> Result<(), BleTransportError> {
        if self.is_scanning() {
            return Ok(());
        }

        let adapter = self.initialize_adapter().await?;
        let stream = adapter
            .events()
            .await
            .map_err(|e| BleTransportError::EventStreamFailed(e.to_string()))?;

        adapter
            .start_scan(ScanFilter {
                services: vec![self.config.service_uuid],
            })
            .await
            .map_err(|e| BleTransportError::ScanFailed(e.to_string()))?;

        let service_uuid = self.config.service_uuid;
        self.task = Some(tokio::spawn(async move {
            let mut stream = stream;
            while let Some(event) = stream.next().await {
                if !forward_event(&adapter, &service_uuid, event, &events).await {
                    debug!("Transport event channel closed, scanner exiting");
                    return;
                }
            }
            warn!("BLE event stream ended");
            let _ = events
                .send(TransportEvent::ReceiveFailed {
                    reason: "BLE event stream ended".to_string(),
                })
                .await;
        }));

        info!("Started BLE scanning for service {}", self.config.service_uuid);
        Ok(())
    }

    /// Stop scanning; no-op when idle
    pub async fn stop(&mut self) -> Result<(), BleTransportError> {
        if let Some(task) = self.task.take() {
            task.abort();
            if let Some(adapter) = &self.adapter {
                adapter
                    .stop_scan()
                    .await
                    .map_err(|e| BleTransportError::ScanFailed(e.to_string()))?;
            }
            info!("Stopped BLE scanning");
        }
        Ok(())
    }

    pub fn is_scanning(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Forward one central event; returns false once the receiver is gone
async fn forward_event(
    adapter: &Adapter,
    service_uuid: &Uuid,
    event: CentralEvent,
    events: &TransportEventSender,
) -> bool {
    let CentralEvent::ServiceDataAdvertisement { id, service_data } = event else {
        return true;
    };
    let Some(payload) = extract_payload(&service_data, service_uuid) else {
        return true;
    };

    let (sender, rssi) = describe_peripheral(adapter, &id).await;
    trace!("{} bytes of service data from {}", payload.len(), sender);

    events
        .send(TransportEvent::PayloadReceived {
            payload: payload.to_vec(),
            sender,
            rssi,
        })
        .await
        .is_ok()
}

/// Sender id and last known RSSI of a peripheral
async fn describe_peripheral(adapter: &Adapter, id: &PeripheralId) -> (SenderId, Option<i16>) {
    let fallback = || format!("{id:?}");
    let Ok(peripheral) = adapter.peripheral(id).await else {
        return (SenderId::new(fallback()), None);
    };
    let rssi = peripheral
        .properties()
        .await
        .ok()
        .flatten()
        .and_then(|properties| properties.rssi);
    (sender_id(peripheral.address(), fallback), rssi)
}
