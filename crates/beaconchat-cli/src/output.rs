//! Rendering of received messages and nearby peers

use beaconchat_core::InboundMessage;
use beaconchat_runtime::NearbyPeer;

use crate::error::Result;

/// One line describing `message`
pub fn format_message(message: &InboundMessage, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string(message)?);
    }

    let line = match message {
        InboundMessage::Public(public) if public.is_presence() => {
            format!("[{}#{}] is nearby{}", public.alias, public.id, signal(public.rssi))
        }
        InboundMessage::Public(public) => format!(
            "[{}#{}] {}{}",
            public.alias,
            public.id,
            public.text,
            signal(public.rssi)
        ),
        InboundMessage::Private(private) => format!(
            "[{}#{} -> {}] (private) {}{}",
            private.from_alias,
            private.from_id,
            private.to_alias,
            private.text,
            signal(private.rssi)
        ),
    };
    Ok(line)
}

/// One line per nearby peer, closest first
pub fn format_nearby(peers: &[NearbyPeer]) -> Vec<String> {
    if peers.is_empty() {
        return vec!["No peers nearby".to_string()];
    }
    peers
        .iter()
        .map(|peer| {
            let distance = peer
                .distance_meters
                .map(|meters| format!(" ~{meters:.1} m"))
                .unwrap_or_default();
            format!(
                "  {}#{}{}{}",
                peer.alias,
                peer.short_id,
                signal(peer.rssi),
                distance
            )
        })
        .collect()
}

fn signal(rssi: Option<i16>) -> String {
    rssi.map(|rssi| format!(" ({rssi} dBm)")).unwrap_or_default()
}
