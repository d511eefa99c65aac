//! Coordinator configuration

use core::time::Duration;

use beaconchat_core::{BeaconError, ProtocolConfig, Result};
use serde::{Deserialize, Serialize};

/// Settings for a [`Coordinator`](crate::Coordinator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Codec, reassembly and deduplication settings
    pub protocol: ProtocolConfig,
    /// Delay before falling back to presence after a message finishes
    pub presence_grace: Duration,
    /// Resume presence after a send if presence was active before it
    pub auto_presence: bool,
    /// Drop inbound messages carrying the local short id
    pub suppress_self: bool,
    /// Capacity of the command channel
    pub command_buffer_size: usize,
    /// Capacity of the transport event channel
    pub event_buffer_size: usize,
    /// How often stale reassemblies and nearby peers are expired
    pub maintenance_interval: Duration,
    /// How long a peer stays in the nearby table without being heard
    pub nearby_ttl: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            presence_grace: Duration::from_secs(3),
            auto_presence: true,
            suppress_self: true,
            command_buffer_size: 32,
            event_buffer_size: 256,
            maintenance_interval: Duration::from_secs(5),
            nearby_ttl: Duration::from_secs(30),
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for fast tests: short delays, same semantics
    pub fn testing() -> Self {
        Self {
            protocol: ProtocolConfig::default()
                .with_inter_fragment_delay(Duration::from_millis(20)),
            presence_grace: Duration::from_millis(50),
            maintenance_interval: Duration::from_millis(200),
            nearby_ttl: Duration::from_secs(2),
            ..Self::default()
        }
    }

    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_presence_grace(mut self, grace: Duration) -> Self {
        self.presence_grace = grace;
        self
    }

    pub fn with_auto_presence(mut self, enabled: bool) -> Self {
        self.auto_presence = enabled;
        self
    }

    pub fn with_suppress_self(mut self, enabled: bool) -> Self {
        self.suppress_self = enabled;
        self
    }

    pub fn with_channel_sizes(mut self, commands: usize, events: usize) -> Self {
        self.command_buffer_size = commands;
        self.event_buffer_size = events;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_nearby_ttl(mut self, ttl: Duration) -> Self {
        self.nearby_ttl = ttl;
        self
    }

    /// Reject settings the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;
        if self.command_buffer_size == 0 || self.event_buffer_size == 0 {
            return Err(BeaconError::configuration(
                "channel buffer sizes must be non-zero",
            ));
        }
        if self.maintenance_interval.is_zero() {
            return Err(BeaconError::configuration(
                "maintenance_interval must be non-zero",
            ));
        }
        Ok(())
    }
}
