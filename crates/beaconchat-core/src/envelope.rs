//! Envelope grammar and inbound message types
//!
//! An envelope is the logical message before fragmentation and after
//! reassembly:
//!
//! ```text
//! <alias>|<shortId>|PUBLIC|<text>
//! <alias>|<shortId>|PRIVATE|PRIVATE:<recipientAlias>:<text>
//! ```
//!
//! Public and private messages share the one broadcast channel; the kind
//! token tells receivers which listener gets the message. An empty public
//! text is a presence ping.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::EnvelopeError;
use crate::types::{estimate_distance_meters, Identity, SenderId, DEFAULT_TAG};

const FIELD_SEPARATOR: char = '|';
const PRIVATE_SEPARATOR: char = ':';
const PUBLIC_TOKEN: &str = "PUBLIC";
const PRIVATE_TOKEN: &str = "PRIVATE";
const PRIVATE_PREFIX: &str = "PRIVATE:";

// ----------------------------------------------------------------------------
// Envelope
// ----------------------------------------------------------------------------

/// Message kind carried in the third envelope field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Public,
    Private,
}

impl MessageKind {
    /// Wire token for this kind
    pub fn as_token(&self) -> &'static str {
        match self {
            Self::Public => PUBLIC_TOKEN,
            Self::Private => PRIVATE_TOKEN,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Content of an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopePayload {
    Public(String),
    Private { recipient: String, text: String },
}

/// A logical message with its sender metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub alias: String,
    pub short_id: String,
    pub payload: EnvelopePayload,
}

impl Envelope {
    /// Public message from `identity`
    pub fn public(identity: &Identity, text: impl Into<String>) -> Self {
        Self {
            alias: identity.wire_alias(),
            short_id: identity.short_id(),
            payload: EnvelopePayload::Public(text.into()),
        }
    }

    /// Presence ping from `identity`
    pub fn presence(identity: &Identity) -> Self {
        Self::public(identity, String::new())
    }

    /// Private message from `identity` addressed to `recipient`
    pub fn private(
        identity: &Identity,
        recipient: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            alias: identity.wire_alias(),
            short_id: identity.short_id(),
            payload: EnvelopePayload::Private {
                recipient: recipient.into(),
                text: text.into(),
            },
        }
    }

    /// Kind of this envelope
    pub fn kind(&self) -> MessageKind {
        match self.payload {
            EnvelopePayload::Public(_) => MessageKind::Public,
            EnvelopePayload::Private { .. } => MessageKind::Private,
        }
    }

    /// Whether this is an empty public message
    pub fn is_presence(&self) -> bool {
        matches!(&self.payload, EnvelopePayload::Public(text) if text.is_empty())
    }

    /// Serialize to the wire string
    ///
    /// Fails if a field contains a separator that would make the result
    /// decode differently.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        reject_char("alias", &self.alias, FIELD_SEPARATOR)?;
        reject_char("short_id", &self.short_id, FIELD_SEPARATOR)?;

        let content = match &self.payload {
            EnvelopePayload::Public(text) => text.clone(),
            EnvelopePayload::Private { recipient, text } => {
                reject_char("recipient", recipient, PRIVATE_SEPARATOR)?;
                format!("{PRIVATE_PREFIX}{recipient}{PRIVATE_SEPARATOR}{text}")
            }
        };

        Ok(format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.alias,
            self.short_id,
            self.kind().as_token(),
            content,
            sep = FIELD_SEPARATOR
        ))
    }

    /// Parse a reassembled wire string
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        let fields: Vec<&str> = raw.splitn(4, FIELD_SEPARATOR).collect();
        let &[alias, short_id, kind, content] = fields.as_slice() else {
            return Err(EnvelopeError::MissingFields {
                found: fields.len(),
            });
        };

        let payload = match kind {
            PUBLIC_TOKEN => EnvelopePayload::Public(content.to_string()),
            PRIVATE_TOKEN => {
                let (recipient, text) = content
                    .strip_prefix(PRIVATE_PREFIX)
                    .and_then(|rest| rest.split_once(PRIVATE_SEPARATOR))
                    .ok_or(EnvelopeError::MalformedPrivate)?;
                EnvelopePayload::Private {
                    recipient: recipient.to_string(),
                    text: text.to_string(),
                }
            }
            other => {
                return Err(EnvelopeError::UnknownKind {
                    kind: other.to_string(),
                })
            }
        };

        Ok(Self {
            alias: alias.to_string(),
            short_id: short_id.to_string(),
            payload,
        })
    }
}

fn reject_char(field: &'static str, value: &str, forbidden: char) -> Result<(), EnvelopeError> {
    if value.contains(forbidden) {
        Err(EnvelopeError::InvalidField { field, forbidden })
    } else {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Inbound Messages
// ----------------------------------------------------------------------------

/// A public broadcast, or a presence ping when `text` is empty
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicMessage {
    pub text: String,
    pub alias: String,
    /// Sender short id
    pub id: String,
    /// Category tag; not carried on the wire, always the default on receipt
    pub tag: String,
    pub rssi: Option<i16>,
    pub distance_meters: Option<f64>,
    /// Transport address the message arrived from
    pub sender: SenderId,
}

impl PublicMessage {
    /// Whether this is a presence ping rather than a chat message
    pub fn is_presence(&self) -> bool {
        self.text.is_empty()
    }
}

/// A message addressed to one alias
///
/// Every receiver sees every private message; filtering by recipient is up
/// to the listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub from_alias: String,
    pub from_id: String,
    pub to_alias: String,
    pub text: String,
    pub rssi: Option<i16>,
    pub sender: SenderId,
}

impl PrivateMessage {
    /// Whether this message is addressed to `identity`
    pub fn is_addressed_to(&self, identity: &Identity) -> bool {
        self.to_alias == identity.wire_alias() || self.to_alias == identity.alias()
    }
}

/// A classified inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundMessage {
    Public(PublicMessage),
    Private(PrivateMessage),
}

impl InboundMessage {
    /// Classify a decoded envelope
    pub fn from_envelope(envelope: Envelope, sender: SenderId, rssi: Option<i16>) -> Self {
        let Envelope {
            alias,
            short_id,
            payload,
        } = envelope;

        match payload {
            EnvelopePayload::Public(text) => Self::Public(PublicMessage {
                text,
                alias,
                id: short_id,
                tag: DEFAULT_TAG.to_string(),
                rssi,
                distance_meters: rssi.map(estimate_distance_meters),
                sender,
            }),
            EnvelopePayload::Private { recipient, text } => Self::Private(PrivateMessage {
                from_alias: alias,
                from_id: short_id,
                to_alias: recipient,
                text,
                rssi,
                sender,
            }),
        }
    }

    /// Kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Public(_) => MessageKind::Public,
            Self::Private(_) => MessageKind::Private,
        }
    }

    /// Sender alias from the envelope
    pub fn alias(&self) -> &str {
        match self {
            Self::Public(message) => &message.alias,
            Self::Private(message) => &message.from_alias,
        }
    }

    /// Sender short id from the envelope
    pub fn short_id(&self) -> &str {
        match self {
            Self::Public(message) => &message.id,
            Self::Private(message) => &message.from_id,
        }
    }

    /// Signal strength of the completing fragment
    pub fn rssi(&self) -> Option<i16> {
        match self {
            Self::Public(message) => message.rssi,
            Self::Private(message) => message.rssi,
        }
    }

    /// Transport address the message arrived from
    pub fn sender(&self) -> &SenderId {
        match self {
            Self::Public(message) => &message.sender,
            Self::Private(message) => &message.sender,
        }
    }

    /// Whether the envelope claims to come from `identity`
    pub fn is_from(&self, identity: &Identity) -> bool {
        self.short_id() == identity.short_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(raw: &str) -> Result<InboundMessage, EnvelopeError> {
        Envelope::decode(raw).map(|env| InboundMessage::from_envelope(env, SenderId::new("s"), None))
    }

    #[test]
    fn test_public_classification() {
        let InboundMessage::Public(message) = classify("abc|123|PUBLIC|hello").unwrap() else {
            panic!("expected public message");
        };
        assert_eq!(message.alias, "abc");
        assert_eq!(message.id, "123");
        assert_eq!(message.tag, DEFAULT_TAG);
        assert_eq!(message.text, "hello");
        assert!(!message.is_presence());
    }

    #[test]
    fn test_empty_public_is_presence() {
        let InboundMessage::Public(message) = classify("abc|123|PUBLIC|").unwrap() else {
            panic!("expected public message");
        };
        assert!(message.is_presence());
        assert_eq!(message.text, "");
    }

    #[test]
    fn test_private_classification() {
        let InboundMessage::Private(message) =
            classify("abc|123|PRIVATE|PRIVATE:bob:secret").unwrap()
        else {
            panic!("expected private message");
        };
        assert_eq!(message.from_alias, "abc");
        assert_eq!(message.from_id, "123");
        assert_eq!(message.to_alias, "bob");
        assert_eq!(message.text, "secret");
    }

    #[test]
    fn test_private_text_keeps_colons_and_pipes() {
        let env = Envelope::decode("abc|123|PRIVATE|PRIVATE:bob:at 10:30 | room 2").unwrap();
        assert_eq!(
            env.payload,
            EnvelopePayload::Private {
                recipient: "bob".into(),
                text: "at 10:30 | room 2".into()
            }
        );
    }

    #[test]
    fn test_malformed_envelopes() {
        assert_eq!(
            Envelope::decode("abc|123"),
            Err(EnvelopeError::MissingFields { found: 2 })
        );
        assert_eq!(
            Envelope::decode("abc|123|PRIVATE|bob:secret"),
            Err(EnvelopeError::MalformedPrivate)
        );
        assert_eq!(
            Envelope::decode("abc|123|PRIVATE|PRIVATE:bob"),
            Err(EnvelopeError::MalformedPrivate)
        );
        assert!(matches!(
            Envelope::decode("abc|123|GROUP|hi"),
            Err(EnvelopeError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_encode_from_identity() {
        let alice = Identity::new("Alice", "user-123");
        assert_eq!(
            Envelope::public(&alice, "Hello World!").encode().unwrap(),
            "Alice|123|PUBLIC|Hello World!"
        );
        assert_eq!(Envelope::presence(&alice).encode().unwrap(), "Alice|123|PUBLIC|");
        assert_eq!(
            Envelope::private(&alice, "bob", "secret").encode().unwrap(),
            "Alice|123|PRIVATE|PRIVATE:bob:secret"
        );

        let long = Identity::new("Maximilian", "987654");
        assert_eq!(
            Envelope::public(&long, "x").encode().unwrap(),
            "Maximili|654|PUBLIC|x"
        );
    }

    #[test]
    fn test_encode_rejects_separators() {
        let bad = Identity::new("a|b", "123");
        assert_eq!(
            Envelope::public(&bad, "x").encode(),
            Err(EnvelopeError::InvalidField {
                field: "alias",
                forbidden: '|'
            })
        );

        let alice = Identity::new("Alice", "123");
        assert!(Envelope::private(&alice, "bo:b", "x").encode().is_err());
    }

    #[test]
    fn test_self_detection_by_short_id() {
        let me = Identity::new("Alice", "user-123");
        let mine = classify("Alice|123|PUBLIC|hi").unwrap();
        let theirs = classify("Alice|999|PUBLIC|hi").unwrap();
        assert!(mine.is_from(&me));
        assert!(!theirs.is_from(&me));
    }

    #[test]
    fn test_distance_attached_when_rssi_known() {
        let env = Envelope::decode("abc|123|PUBLIC|hi").unwrap();
        let InboundMessage::Public(message) =
            InboundMessage::from_envelope(env, SenderId::new("s"), Some(-59))
        else {
            panic!("expected public message");
        };
        assert_eq!(message.rssi, Some(-59));
        assert!((message.distance_meters.unwrap() - 1.0).abs() < 1e-9);
    }
}
