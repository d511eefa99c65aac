//! BLE broadcast transport

use async_trait::async_trait;
use beaconchat_core::{
    BeaconError, BroadcastTransport, Result as BeaconResult, TransportEvent, TransportEventSender,
};
use tracing::{debug, warn};

use crate::advertising::{BleAdvertiser, PlatformAdvertiser};
use crate::config::BleTransportConfig;
use crate::error::BleTransportError;
use crate::protocol::check_payload_len;
use crate::scanner::BleScanner;

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

/// Broadcast transport over BLE advertisements
///
/// Outbound payloads become the service data of a non-connectable
/// advertisement; inbound payloads come from a btleplug scan filtered on the
/// same service UUID.
pub struct BleBroadcastTransport {
    config: BleTransportConfig,
    scanner: BleScanner,
    advertiser: Box<dyn BleAdvertiser>,
    events: Option<TransportEventSender>,
}

impl BleBroadcastTransport {
    /// Create a transport using the platform's advertiser
    pub fn new(config: BleTransportConfig) -> Self {
        let advertiser = PlatformAdvertiser::new(&config);
        Self::with_advertiser(config, advertiser)
    }

    /// Create a transport with a specific advertiser
    pub fn with_advertiser<A: BleAdvertiser + 'static>(
        config: BleTransportConfig,
        advertiser: A,
    ) -> Self {
        Self {
            scanner: BleScanner::new(config.clone()),
            config,
            advertiser: Box::new(advertiser),
            events: None,
        }
    }

    pub fn config(&self) -> &BleTransportConfig {
        &self.config
    }

    fn notify(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            if events.try_send(event).is_err() {
                debug!("Transport event dropped");
            }
        }
    }
}

#[async_trait]
impl BroadcastTransport for BleBroadcastTransport {
    fn attach_events(&mut self, events: TransportEventSender) {
        self.events = Some(events);
    }

    async fn broadcast(&mut self, payload: Vec<u8>) -> BeaconResult<()> {
        check_payload_len(payload.len(), self.config.max_payload_len)?;

        match self.advertiser.advertise(&payload).await {
            Ok(()) => {
                self.notify(TransportEvent::BroadcastStarted);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stop_broadcast(&mut self) -> BeaconResult<()> {
        self.advertiser.stop_advertising().await?;
        Ok(())
    }

    async fn start_receiving(&mut self) -> BeaconResult<()> {
        let events = self
            .events
            .clone()
            .ok_or(BleTransportError::EventsNotAttached)?;
        self.scanner.start(events).await?;
        Ok(())
    }

    async fn stop_receiving(&mut self) -> BeaconResult<()> {
        if let Err(e) = self.scanner.stop().await {
            warn!("Failed to stop BLE scan cleanly: {}", e);
            return Err(BeaconError::from(e));
        }
        Ok(())
    }

    fn max_payload_len(&self) -> usize {
        self.config.max_payload_len
    }

    fn name(&self) -> &str {
        "ble"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertising::fallback::FallbackAdvertiser;
    use beaconchat_core::{create_transport_event_channel, BroadcastFailure};

    struct RecordingAdvertiser {
        payloads: std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl BleAdvertiser for RecordingAdvertiser {
        async fn advertise(&mut self, payload: &[u8]) -> Result<(), BleTransportError> {
            self.payloads.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        async fn stop_advertising(&mut self) -> Result<(), BleTransportError> {
            Ok(())
        }

        fn is_advertising(&self) -> bool {
            !self.payloads.lock().unwrap().is_empty()
        }
    }

    #[tokio::test]
    async fn test_oversized_payload_never_reaches_radio() {
        let payloads = std::sync::Arc::default();
        let mut transport = BleBroadcastTransport::with_advertiser(
            BleTransportConfig::default().with_max_payload_len(10),
            RecordingAdvertiser {
                payloads: std::sync::Arc::clone(&payloads),
            },
        );

        let err = transport.broadcast(vec![b'x'; 11]).await.unwrap_err();
        assert!(matches!(
            err,
            BeaconError::Broadcast(BroadcastFailure::DataTooLarge { size: 11, max: 10 })
        ));
        assert!(payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_limit_matches_advertisement_budget() {
        let payloads = std::sync::Arc::default();
        let mut transport = BleBroadcastTransport::with_advertiser(
            BleTransportConfig::default(),
            RecordingAdvertiser {
                payloads: std::sync::Arc::clone(&payloads),
            },
        );

        tokio_test::assert_ok!(transport.broadcast(vec![b'x'; 23]).await);
        let err = transport.broadcast(vec![b'x'; 24]).await.unwrap_err();
        assert!(matches!(
            err,
            BeaconError::Broadcast(BroadcastFailure::DataTooLarge { size: 24, max: 23 })
        ));
        assert_eq!(payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reports_started() {
        let payloads = std::sync::Arc::default();
        let mut transport = BleBroadcastTransport::with_advertiser(
            BleTransportConfig::default(),
            RecordingAdvertiser {
                payloads: std::sync::Arc::clone(&payloads),
            },
        );
        let (tx, mut rx) = create_transport_event_channel(4);
        transport.attach_events(tx);

        transport.broadcast(b"0001:1/1:hi".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::BroadcastStarted));
        assert_eq!(*payloads.lock().unwrap(), vec![b"0001:1/1:hi".to_vec()]);
    }

    #[tokio::test]
    async fn test_unsupported_advertising_is_not_fatal() {
        let mut transport = BleBroadcastTransport::with_advertiser(
            BleTransportConfig::default(),
            FallbackAdvertiser::new(BleTransportConfig::default()),
        );
        let err = transport.broadcast(b"0001:1/1:".to_vec()).await.unwrap_err();
        assert!(!err.is_fatal());
        tokio_test::assert_ok!(transport.stop_broadcast().await);
    }

    #[tokio::test]
    async fn test_receiving_requires_attached_events() {
        let mut transport = BleBroadcastTransport::new(BleTransportConfig::default());
        let err = transport.start_receiving().await.unwrap_err();
        assert!(matches!(err, BeaconError::Configuration { .. }));
        tokio_test::assert_ok!(transport.stop_receiving().await);
        assert_eq!(transport.name(), "ble");
    }
}
