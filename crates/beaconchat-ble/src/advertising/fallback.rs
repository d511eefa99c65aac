//! Fallback advertising implementation for unsupported platforms

use tracing::warn;

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Advertiser for platforms without peripheral support; every broadcast fails
pub struct FallbackAdvertiser {
    config: BleTransportConfig,
    warned: bool,
}

impl FallbackAdvertiser {
    pub fn new(config: BleTransportConfig) -> Self {
        Self {
            config,
            warned: false,
        }
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for FallbackAdvertiser {
    async fn advertise(&mut self, _payload: &[u8]) -> Result<(), BleTransportError> {
        if !self.warned {
            warn!(
                "BLE advertising not supported on this platform; service {} will only be scanned",
                self.config.service_uuid
            );
            self.warned = true;
        }
        Err(BleTransportError::AdvertisingUnsupported)
    }

    async fn stop_advertising(&mut self) -> Result<(), BleTransportError> {
        Ok(())
    }

    fn is_advertising(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_reports_unsupported() {
        let mut advertiser = FallbackAdvertiser::new(BleTransportConfig::default());
        for _ in 0..2 {
            assert!(matches!(
                advertiser.advertise(b"0001:1/1:hi").await,
                Err(BleTransportError::AdvertisingUnsupported)
            ));
        }
        assert!(advertiser.stop_advertising().await.is_ok());
        assert!(!advertiser.is_advertising());
    }
}
