//! Core types for the BeaconChat protocol
//!
//! Newtypes for the identities that travel on the wire, plus the clock
//! abstraction used to derive message identifiers.

use core::fmt;
use core::ops::{Add, Sub};
use serde::{Deserialize, Serialize};

/// Tag attached to inbound public messages; the envelope does not carry one
pub const DEFAULT_TAG: &str = "Social";

/// Maximum number of alias characters placed in an envelope
pub const WIRE_ALIAS_LEN: usize = 8;

/// Number of trailing user-id characters used as the short id
pub const SHORT_ID_LEN: usize = 3;

/// Calibrated RSSI at one meter used for distance estimates
pub const TX_POWER_AT_ONE_METER: f64 = -59.0;

/// Free-space path loss exponent used for distance estimates
pub const PATH_LOSS_EXPONENT: f64 = 2.0;

// ----------------------------------------------------------------------------
// Sender Identifier
// ----------------------------------------------------------------------------

/// Transport-level identity of a broadcaster (e.g. a Bluetooth address)
///
/// This is whatever the radio reports as the origin of an advertisement. It
/// is not authenticated and is distinct from the alias/short id carried in
/// the envelope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SenderId(String);

impl SenderId {
    /// Create a sender id from any string-like address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SenderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ----------------------------------------------------------------------------
// Time Source
// ----------------------------------------------------------------------------

/// Source of wall-clock time
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Time source backed by the system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Local broadcaster identity supplied by the application
///
/// The application owns and persists these values; the protocol only reads
/// them. On the wire the alias is cut to [`WIRE_ALIAS_LEN`] characters and
/// the user id is reduced to its last [`SHORT_ID_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    alias: String,
    user_id: String,
    tag: String,
}

impl Identity {
    /// Create an identity with the default tag
    pub fn new(alias: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            user_id: user_id.into(),
            tag: DEFAULT_TAG.to_string(),
        }
    }

    /// Set the category tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Full display alias
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Full user identifier
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Category tag
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Alias as placed in an envelope (first 8 characters)
    pub fn wire_alias(&self) -> String {
        self.alias.chars().take(WIRE_ALIAS_LEN).collect()
    }

    /// Short id as placed in an envelope (last 3 characters of the user id)
    pub fn short_id(&self) -> String {
        let count = self.user_id.chars().count();
        self.user_id
            .chars()
            .skip(count.saturating_sub(SHORT_ID_LEN))
            .collect()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.wire_alias(), self.short_id())
    }
}

// ----------------------------------------------------------------------------
// Signal Strength
// ----------------------------------------------------------------------------

/// Rough distance in meters from a received signal strength
///
/// Log-distance path loss model with a fixed one-meter reference. Good
/// enough to sort nearby peers, nothing more.
pub fn estimate_distance_meters(rssi: i16) -> f64 {
    10f64.powf((TX_POWER_AT_ONE_METER - f64::from(rssi)) / (10.0 * PATH_LOSS_EXPONENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_alias_truncates_to_eight_chars() {
        let identity = Identity::new("Bartholomew", "user-0001");
        assert_eq!(identity.wire_alias(), "Bartholo");
        assert_eq!(Identity::new("Ann", "x").wire_alias(), "Ann");
    }

    #[test]
    fn test_short_id_takes_last_three_chars() {
        assert_eq!(Identity::new("a", "A1B2C3D4").short_id(), "3D4");
        assert_eq!(Identity::new("a", "12").short_id(), "12");
        assert_eq!(Identity::new("a", "ñandú").short_id(), "ndú");
    }

    #[test]
    fn test_default_tag() {
        let identity = Identity::new("Alice", "123");
        assert_eq!(identity.tag(), DEFAULT_TAG);
        assert_eq!(identity.with_tag("Work").tag(), "Work");
    }

    #[test]
    fn test_distance_estimate() {
        assert!((estimate_distance_meters(-59) - 1.0).abs() < 1e-9);
        assert!((estimate_distance_meters(-79) - 10.0).abs() < 1e-9);
        assert!(estimate_distance_meters(-40) < 1.0);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let a = Timestamp::new(1_000);
        let b = a + 500;
        assert_eq!(b - a, 500);
        assert_eq!(a - b, 0);
    }
}
