//! Receive pipeline
//!
//! Turns raw advertisement payloads into classified messages:
//! fragment dedup, decode, reassembly, message dedup, envelope decode.
//! Every stage that rejects input reports why through [`PipelineOutcome`]
//! instead of an error; nothing here is worth failing the receive loop over.

use beaconchat_core::{
    DedupStats, DeduplicationCache, Envelope, EnvelopeError, Fingerprint, Fragment,
    InboundMessage, MessageReassembler, ParseError, ProtocolConfig, SenderId, Timestamp,
};
use tracing::{debug, trace, warn};

/// What happened to one received payload
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// Same payload from the same sender was seen recently
    DuplicateFragment,
    /// Payload is not a fragment
    Malformed(ParseError),
    /// Fragment stored, message still incomplete
    Pending,
    /// Reassembled message was already delivered
    DuplicateMessage,
    /// Reassembled text is not a valid envelope
    Rejected(EnvelopeError),
    /// A complete message ready for listeners
    Delivered(InboundMessage),
}

/// Per-session receive state
pub struct ReceivePipeline {
    fragments_seen: DeduplicationCache,
    messages_seen: DeduplicationCache,
    reassembler: MessageReassembler,
}

impl ReceivePipeline {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            fragments_seen: DeduplicationCache::new(config.dedup_capacity, config.dedup_trim),
            messages_seen: DeduplicationCache::new(config.dedup_capacity, config.dedup_trim),
            reassembler: MessageReassembler::new(
                config.max_pending_reassemblies,
                config.reassembly_timeout,
            ),
        }
    }

    /// Run one payload through every stage
    pub fn on_payload(
        &mut self,
        payload: &[u8],
        sender: &SenderId,
        rssi: Option<i16>,
        now: Timestamp,
    ) -> PipelineOutcome {
        if !self
            .fragments_seen
            .should_process(Fingerprint::for_fragment(sender, payload))
        {
            return PipelineOutcome::DuplicateFragment;
        }

        let fragment = match Fragment::from_bytes(payload) {
            Ok(fragment) => fragment,
            Err(e) => {
                debug!("Dropping payload from {}: {}", sender, e);
                return PipelineOutcome::Malformed(e);
            }
        };
        trace!(
            "Fragment {}/{} of {} from {}",
            fragment.part_index,
            fragment.total_parts,
            fragment.message_id,
            sender
        );

        let Some(completed) = self.reassembler.accept(sender, fragment, now) else {
            return PipelineOutcome::Pending;
        };

        let fingerprint =
            Fingerprint::for_message(&completed.sender, &completed.message_id, &completed.envelope);
        if !self.messages_seen.should_process(fingerprint) {
            trace!("Message {} from {} already delivered", completed.message_id, sender);
            return PipelineOutcome::DuplicateMessage;
        }

        match Envelope::decode(&completed.envelope) {
            Ok(envelope) => PipelineOutcome::Delivered(InboundMessage::from_envelope(
                envelope,
                completed.sender,
                rssi,
            )),
            Err(e) => {
                warn!(
                    "Dropping message {} from {}: {}",
                    completed.message_id, completed.sender, e
                );
                PipelineOutcome::Rejected(e)
            }
        }
    }

    /// Forget all fingerprints and partial messages
    pub fn reset(&mut self) {
        self.fragments_seen.reset();
        self.messages_seen.reset();
        self.reassembler.clear();
    }

    /// Expire stale partial messages, returning how many were dropped
    pub fn maintain(&mut self, now: Timestamp) -> usize {
        self.reassembler.cleanup_expired(now)
    }

    /// Number of partial messages held
    pub fn pending_reassemblies(&self) -> usize {
        self.reassembler.active_reassemblies()
    }

    /// Counters of the fragment-level cache
    pub fn fragment_stats(&self) -> DedupStats {
        self.fragments_seen.stats()
    }

    /// Counters of the message-level cache
    pub fn message_stats(&self) -> DedupStats {
        self.messages_seen.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beaconchat_core::{Identity, MessageFragmenter, MessageId};

    fn pipeline() -> ReceivePipeline {
        ReceivePipeline::new(&ProtocolConfig::default())
    }

    fn wire(id: &str, envelope: &str) -> Vec<Vec<u8>> {
        MessageFragmenter::fragment_message(MessageId::new(id), envelope, 12)
            .unwrap()
            .iter()
            .map(|f| f.to_bytes())
            .collect()
    }

    fn feed(pipeline: &mut ReceivePipeline, payloads: &[Vec<u8>]) -> Vec<PipelineOutcome> {
        let sender = SenderId::new("aa:bb:cc");
        payloads
            .iter()
            .map(|p| pipeline.on_payload(p, &sender, Some(-60), Timestamp::new(0)))
            .collect()
    }

    #[test]
    fn test_multi_fragment_delivery() {
        let mut pipeline = pipeline();
        let outcomes = feed(&mut pipeline, &wire("0001", "Alice|123|PUBLIC|Hello World!"));
        assert_eq!(outcomes[0], PipelineOutcome::Pending);
        assert_eq!(outcomes[1], PipelineOutcome::Pending);
        let PipelineOutcome::Delivered(InboundMessage::Public(message)) = &outcomes[2] else {
            panic!("expected delivery, got {:?}", outcomes[2]);
        };
        assert_eq!(message.text, "Hello World!");
        assert_eq!(message.rssi, Some(-60));
    }

    #[test]
    fn test_repeated_fragment_is_duplicate() {
        let mut pipeline = pipeline();
        let payloads = wire("0001", "abc|123|PUBLIC|");
        let outcomes = feed(&mut pipeline, &[payloads[0].clone(), payloads[0].clone()]);
        assert_eq!(outcomes[1], PipelineOutcome::DuplicateFragment);
        assert_eq!(pipeline.fragment_stats().duplicates, 1);
    }

    #[test]
    fn test_malformed_and_rejected() {
        let mut pipeline = pipeline();
        let outcomes = feed(&mut pipeline, &[b"not a fragment".to_vec()]);
        assert!(matches!(outcomes[0], PipelineOutcome::Malformed(_)));

        let outcomes = feed(&mut pipeline, &wire("0002", "abc|123"));
        assert_eq!(
            outcomes[0],
            PipelineOutcome::Rejected(EnvelopeError::MissingFields { found: 2 })
        );

        let outcomes = feed(&mut pipeline, &wire("0003", "abc|1|WHAT|x"));
        assert!(matches!(
            outcomes[0],
            PipelineOutcome::Rejected(EnvelopeError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_message_redelivered_after_fragment_trim_is_suppressed() {
        let config = ProtocolConfig::default().with_dedup_limits(1, 1);
        let mut pipeline = ReceivePipeline::new(&config);
        let ping = wire("00aa", "abc|123|PUBLIC|");
        assert_eq!(ping.len(), 2);

        let first = feed(&mut pipeline, &ping);
        assert!(matches!(first[1], PipelineOutcome::Delivered(_)));

        // The one-entry fragment cache has forgotten the first fragment
        let again = feed(&mut pipeline, &ping);
        assert_eq!(again[1], PipelineOutcome::DuplicateMessage);
    }

    #[test]
    fn test_reset_allows_redelivery() {
        let mut pipeline = pipeline();
        let envelope = Envelope::presence(&Identity::new("abc", "123")).encode().unwrap();
        let ping = wire("0010", &envelope);
        feed(&mut pipeline, &ping);
        pipeline.reset();
        let outcomes = feed(&mut pipeline, &ping);
        assert!(matches!(
            outcomes.last(),
            Some(PipelineOutcome::Delivered(InboundMessage::Public(m))) if m.is_presence()
        ));
    }

    #[test]
    fn test_maintain_expires_partial_messages() {
        let mut pipeline = pipeline();
        let payloads = wire("0001", "Alice|123|PUBLIC|Hello World!");
        let sender = SenderId::new("x");
        pipeline.on_payload(&payloads[0], &sender, None, Timestamp::new(0));
        assert_eq!(pipeline.pending_reassemblies(), 1);
        assert_eq!(pipeline.maintain(Timestamp::new(10_000)), 0);
        assert_eq!(pipeline.maintain(Timestamp::new(60_001)), 1);
        assert_eq!(pipeline.pending_reassemblies(), 0);
    }
}
