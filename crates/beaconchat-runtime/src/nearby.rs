//! Table of broadcasters heard recently

use std::collections::HashMap;

use beaconchat_core::{estimate_distance_meters, InboundMessage, SenderId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A broadcaster heard within the table's time-to-live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyPeer {
    pub alias: String,
    pub short_id: String,
    /// Transport address of the last message heard
    pub sender: SenderId,
    pub rssi: Option<i16>,
    pub distance_meters: Option<f64>,
    pub last_seen: Timestamp,
}

/// Nearby peers keyed by envelope identity
#[derive(Debug)]
pub struct NearbyPeers {
    peers: HashMap<(String, String), NearbyPeer>,
    ttl_ms: u64,
}

impl NearbyPeers {
    pub fn new(ttl: core::time::Duration) -> Self {
        Self {
            peers: HashMap::new(),
            ttl_ms: ttl.as_millis() as u64,
        }
    }

    /// Record that `message`'s sender was just heard
    ///
    /// Returns true when the peer was not in the table before.
    pub fn observe(&mut self, message: &InboundMessage, now: Timestamp) -> bool {
        let key = (message.alias().to_string(), message.short_id().to_string());
        let rssi = message.rssi();
        let peer = NearbyPeer {
            alias: key.0.clone(),
            short_id: key.1.clone(),
            sender: message.sender().clone(),
            rssi,
            distance_meters: rssi.map(estimate_distance_meters),
            last_seen: now,
        };

        let is_new = self.peers.insert(key, peer).is_none();
        if is_new {
            debug!("New nearby peer {}#{}", message.alias(), message.short_id());
        }
        is_new
    }

    /// Refresh every peer last heard from `sender`
    ///
    /// Repeated advertisements never complete a new message, so this runs for
    /// every payload. Alias and short id stay as first decoded.
    pub fn heard(&mut self, sender: &SenderId, rssi: Option<i16>, now: Timestamp) -> usize {
        let mut refreshed = 0;
        for peer in self.peers.values_mut().filter(|peer| &peer.sender == sender) {
            peer.last_seen = now;
            if rssi.is_some() {
                peer.rssi = rssi;
                peer.distance_meters = rssi.map(estimate_distance_meters);
            }
            refreshed += 1;
        }
        refreshed
    }

    /// Drop peers not heard within the time-to-live
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let ttl_ms = self.ttl_ms;
        let before = self.peers.len();
        self.peers.retain(|_, peer| now - peer.last_seen <= ttl_ms);
        before - self.peers.len()
    }

    /// Peers sorted closest first; peers without a signal reading go last
    pub fn snapshot(&self) -> Vec<NearbyPeer> {
        let mut peers: Vec<NearbyPeer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| {
            let a_rssi = a.rssi.unwrap_or(i16::MIN);
            let b_rssi = b.rssi.unwrap_or(i16::MIN);
            b_rssi.cmp(&a_rssi).then_with(|| a.alias.cmp(&b.alias))
        });
        peers
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beaconchat_core::Envelope;
    use core::time::Duration;

    fn heard(raw: &str, rssi: Option<i16>) -> InboundMessage {
        InboundMessage::from_envelope(Envelope::decode(raw).unwrap(), SenderId::new("addr"), rssi)
    }

    #[test]
    fn test_observe_refreshes_existing_peer() {
        let mut table = NearbyPeers::new(Duration::from_secs(30));
        assert!(table.observe(&heard("ann|111|PUBLIC|", Some(-80)), Timestamp::new(0)));
        assert!(!table.observe(&heard("ann|111|PUBLIC|hi", Some(-50)), Timestamp::new(5)));
        assert_eq!(table.len(), 1);

        let peer = &table.snapshot()[0];
        assert_eq!(peer.rssi, Some(-50));
        assert_eq!(peer.last_seen, Timestamp::new(5));
    }

    #[test]
    fn test_heard_keeps_peer_alive_by_sender() {
        let mut table = NearbyPeers::new(Duration::from_secs(30));
        table.observe(&heard("ann|111|PUBLIC|", Some(-80)), Timestamp::new(0));

        assert_eq!(table.heard(&SenderId::new("addr"), Some(-45), Timestamp::new(25_000)), 1);
        assert_eq!(table.heard(&SenderId::new("other"), None, Timestamp::new(25_000)), 0);
        assert_eq!(table.expire(Timestamp::new(50_000)), 0);

        let peer = &table.snapshot()[0];
        assert_eq!(peer.alias, "ann");
        assert_eq!(peer.rssi, Some(-45));
        assert_eq!(peer.last_seen, Timestamp::new(25_000));
        assert_eq!(table.expire(Timestamp::new(55_001)), 1);
    }

    #[test]
    fn test_snapshot_orders_by_signal() {
        let mut table = NearbyPeers::new(Duration::from_secs(30));
        table.observe(&heard("far|111|PUBLIC|", Some(-90)), Timestamp::new(0));
        table.observe(&heard("near|222|PUBLIC|", Some(-40)), Timestamp::new(0));
        table.observe(&heard("unknown|333|PUBLIC|", None), Timestamp::new(0));

        let order: Vec<String> = table.snapshot().into_iter().map(|p| p.alias).collect();
        assert_eq!(order, vec!["near", "far", "unknown"]);
    }

    #[test]
    fn test_expire_after_ttl() {
        let mut table = NearbyPeers::new(Duration::from_secs(30));
        table.observe(&heard("ann|111|PUBLIC|", None), Timestamp::new(0));
        table.observe(&heard("bob|222|PRIVATE|PRIVATE:ann:x", None), Timestamp::new(20_000));

        assert_eq!(table.expire(Timestamp::new(30_000)), 0);
        assert_eq!(table.expire(Timestamp::new(30_001)), 1);
        assert_eq!(table.snapshot()[0].alias, "bob");
    }
}
