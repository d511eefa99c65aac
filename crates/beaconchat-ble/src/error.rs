//! Error types for BLE transport

use beaconchat_core::{BeaconError, BroadcastFailure};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the BLE transport
#[derive(Error, Debug)]
pub enum BleTransportError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("BLE adapter {index} not found ({count} available)")]
    AdapterNotFound { index: usize, count: usize },

    #[error("BLE adapter is powered off")]
    AdapterPoweredOff,

    #[error("Failed to start BLE scan: {0}")]
    ScanFailed(String),

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Failed to start advertising: {0}")]
    AdvertisingFailed(String),

    #[error("BLE advertising not supported on this platform")]
    AdvertisingUnsupported,

    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Transport events not attached")]
    EventsNotAttached,
}

impl From<BleTransportError> for BeaconError {
    fn from(err: BleTransportError) -> Self {
        match err {
            BleTransportError::AdapterNotAvailable
            | BleTransportError::AdapterNotFound { .. }
            | BleTransportError::AdapterPoweredOff
            | BleTransportError::ScanFailed(_) => BeaconError::transport_unavailable(err.to_string()),
            BleTransportError::PayloadTooLarge { size, max } => {
                BroadcastFailure::DataTooLarge { size, max }.into()
            }
            BleTransportError::AdvertisingUnsupported => BroadcastFailure::FeatureUnsupported.into(),
            BleTransportError::AdvertisingFailed(reason) => {
                BroadcastFailure::Internal { reason }.into()
            }
            BleTransportError::EventStreamFailed(_) => BeaconError::transport(err.to_string()),
            BleTransportError::EventsNotAttached => BeaconError::configuration(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_errors_are_fatal() {
        for err in [
            BleTransportError::AdapterNotAvailable,
            BleTransportError::AdapterPoweredOff,
            BleTransportError::AdapterNotFound { index: 2, count: 1 },
        ] {
            let err: BeaconError = err.into();
            assert!(matches!(err, BeaconError::TransportUnavailable { .. }));
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn test_advertising_errors_map_to_broadcast_failures() {
        let err: BeaconError = BleTransportError::AdvertisingUnsupported.into();
        assert!(matches!(
            err,
            BeaconError::Broadcast(BroadcastFailure::FeatureUnsupported)
        ));
        assert!(!err.is_fatal());

        let err: BeaconError = BleTransportError::PayloadTooLarge { size: 30, max: 27 }.into();
        assert!(matches!(
            err,
            BeaconError::Broadcast(BroadcastFailure::DataTooLarge { size: 30, max: 27 })
        ));
    }
}
