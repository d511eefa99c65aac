//! Cross-platform advertising trait and platform detection

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;

use crate::config::BleTransportConfig;
use crate::error::BleTransportError;

// ----------------------------------------------------------------------------
// Cross-platform Advertising Trait
// ----------------------------------------------------------------------------

/// Puts one payload at a time on the air as service data
#[async_trait::async_trait]
pub trait BleAdvertiser: Send {
    /// Replace the current advertisement with `payload`
    async fn advertise(&mut self, payload: &[u8]) -> Result<(), BleTransportError>;

    /// Take the current advertisement off the air
    async fn stop_advertising(&mut self) -> Result<(), BleTransportError>;

    /// Check if currently advertising
    fn is_advertising(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific advertiser enum
pub enum PlatformAdvertiser {
    #[cfg(target_os = "linux")]
    Linux(linux::LinuxAdvertiser),
    #[allow(dead_code)]
    Fallback(fallback::FallbackAdvertiser),
}

impl PlatformAdvertiser {
    /// Create the appropriate advertiser for the current platform
    pub fn new(config: &BleTransportConfig) -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::Linux(linux::LinuxAdvertiser::new(config.clone()))
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::Fallback(fallback::FallbackAdvertiser::new(config.clone()))
        }
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for PlatformAdvertiser {
    async fn advertise(&mut self, payload: &[u8]) -> Result<(), BleTransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.advertise(payload).await,
            Self::Fallback(ref mut advertiser) => advertiser.advertise(payload).await,
        }
    }

    async fn stop_advertising(&mut self) -> Result<(), BleTransportError> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut advertiser) => advertiser.stop_advertising().await,
            Self::Fallback(ref mut advertiser) => advertiser.stop_advertising().await,
        }
    }

    fn is_advertising(&self) -> bool {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref advertiser) => advertiser.is_advertising(),
            Self::Fallback(ref advertiser) => advertiser.is_advertising(),
        }
    }
}
