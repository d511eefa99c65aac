//! BLE transport configuration

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{BEACONCHAT_SERVICE_UUID, MAX_ADVERTISED_PAYLOAD};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the BLE broadcast transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleTransportConfig {
    /// Service UUID the payload is carried under and scanned for
    pub service_uuid: Uuid,
    /// Largest payload placed in one advertisement
    pub max_payload_len: usize,
    /// Which local adapter to use when several are present
    pub adapter_index: usize,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            service_uuid: BEACONCHAT_SERVICE_UUID,
            max_payload_len: MAX_ADVERTISED_PAYLOAD,
            adapter_index: 0,
        }
    }
}

impl BleTransportConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the service UUID
    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    /// Set maximum payload size
    pub fn with_max_payload_len(mut self, len: usize) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Select the adapter by index
    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }
}
