//! Property-based tests for the fragment codec
//!
//! These tests check that any envelope survives fragmentation, the wire
//! encoding and reassembly regardless of chunk size, arrival order or
//! retransmission.

use beaconchat_core::{
    Fragment, MessageFragmenter, MessageId, MessageReassembler, SenderId, Timestamp,
};
use proptest::prelude::*;

/// Generate arbitrary envelope text, including multi-byte characters and separators
fn arb_envelope() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[a-zA-Z0-9 |:/.,!?éß€🙂]{0,200}").unwrap()
}

/// Generate a usable chunk size
fn arb_chunk_size() -> impl Strategy<Value = usize> {
    4usize..=32
}

fn encode(envelope: &str, chunk_size: usize) -> Vec<Fragment> {
    MessageFragmenter::fragment_message(MessageId::new("0a1b"), envelope, chunk_size)
        .expect("envelope should fragment")
}

/// Pass fragments through the wire string form and feed them to a reassembler
fn deliver(fragments: &[Fragment]) -> Vec<String> {
    let mut reassembler = MessageReassembler::default();
    let sender = SenderId::new("11:22:33:44:55:66");
    fragments
        .iter()
        .filter_map(|fragment| {
            let decoded = Fragment::from_bytes(&fragment.to_bytes()).expect("wire form parses");
            reassembler.accept(&sender, decoded, Timestamp::new(0))
        })
        .map(|completed| completed.envelope)
        .collect()
}

proptest! {
    /// Property: in-order delivery reconstructs the envelope
    #[test]
    fn round_trip_in_order(envelope in arb_envelope(), chunk_size in arb_chunk_size()) {
        let fragments = encode(&envelope, chunk_size);
        prop_assert_eq!(deliver(&fragments), vec![envelope]);
    }

    /// Property: any arrival order reconstructs the envelope exactly once
    #[test]
    fn round_trip_any_order(
        (envelope, order) in arb_envelope().prop_flat_map(|envelope| {
            let count = encode(&envelope, 4).len();
            (Just(envelope), Just((0..count).collect::<Vec<_>>()).prop_shuffle())
        })
    ) {
        let fragments = encode(&envelope, 4);
        let shuffled: Vec<Fragment> = order.iter().map(|&i| fragments[i].clone()).collect();
        prop_assert_eq!(deliver(&shuffled), vec![envelope]);
    }

    /// Property: duplicated fragments never produce a second completion
    #[test]
    fn retransmission_completes_once(envelope in arb_envelope(), chunk_size in arb_chunk_size()) {
        let fragments = encode(&envelope, chunk_size);
        let last = fragments.len() - 1;

        // Every non-final fragment twice, then the final one
        let mut noisy = Vec::new();
        for fragment in &fragments[..last] {
            noisy.push(fragment.clone());
            noisy.push(fragment.clone());
        }
        noisy.push(fragments[last].clone());

        prop_assert_eq!(deliver(&noisy), vec![envelope]);
    }

    /// Property: fragment sizes and counts respect the chunk size
    #[test]
    fn fragments_respect_chunk_size(envelope in arb_envelope(), chunk_size in arb_chunk_size()) {
        let fragments = encode(&envelope, chunk_size);
        prop_assert!(!fragments.is_empty());

        let total = fragments.len() as u16;
        for (i, fragment) in fragments.iter().enumerate() {
            prop_assert!(fragment.payload.len() <= chunk_size);
            prop_assert_eq!(fragment.part_index, i as u16 + 1);
            prop_assert_eq!(fragment.total_parts, total);
        }

        if envelope.is_ascii() {
            prop_assert_eq!(fragments.len(), envelope.len().div_ceil(chunk_size).max(1));
        }
    }

    /// Property: the parser never panics on arbitrary bytes
    #[test]
    fn parse_arbitrary_bytes(raw in prop::collection::vec(any::<u8>(), 0..64)) {
        let _ = Fragment::from_bytes(&raw);
    }
}
