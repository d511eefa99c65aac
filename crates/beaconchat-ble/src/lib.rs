//! Bluetooth Low Energy transport for BeaconChat
//!
//! This crate provides a BLE transport that implements the
//! `BroadcastTransport` trait from `beaconchat-core`, carrying chat fragments
//! in advertisement service data.
//!
//! ## Architecture
//!
//! - [`config`] - Transport configuration and settings
//! - [`error`] - Error types specific to BLE transport
//! - [`protocol`] - Service UUID and advertisement helpers
//! - [`scanner`] - btleplug scanning for chat advertisements
//! - [`advertising`] - Platform advertisers (BlueZ on Linux)
//! - [`transport`] - Main transport implementation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use beaconchat_ble::{BleBroadcastTransport, BleTransportConfig};
//! use beaconchat_core::Identity;
//! use beaconchat_runtime::{Coordinator, CoordinatorConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = BleBroadcastTransport::new(BleTransportConfig::default());
//! let coordinator = Coordinator::spawn(transport, CoordinatorConfig::default())?;
//!
//! coordinator.start_presence(Identity::new("Alice", "user-123")).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: scanning via btleplug, advertising via `bluer` and BlueZ
//! - **Other platforms**: scanning only; broadcasts fail with
//!   `FeatureUnsupported`

pub mod advertising;
pub mod config;
pub mod error;
pub mod protocol;
pub mod scanner;
pub mod transport;

// Public API exports
pub use advertising::{BleAdvertiser, PlatformAdvertiser};
pub use config::BleTransportConfig;
pub use error::BleTransportError;
pub use protocol::BEACONCHAT_SERVICE_UUID;
pub use scanner::BleScanner;
pub use transport::BleBroadcastTransport;

// Re-export the transport trait for convenience
pub use beaconchat_core::BroadcastTransport;
