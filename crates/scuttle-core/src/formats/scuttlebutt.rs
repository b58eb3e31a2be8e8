//! Classic Scuttlebutt message format
//!
//! A message is a JSON object printed with two-space indentation and a
//! fixed key order:
//!
//! ```text
//! {
//!   "previous": "%…sha256" | null,
//!   "author": "@…ed25519",
//!   "sequence": 2,
//!   "timestamp": 1700000000000,
//!   "hash": "sha256",
//!   "content": { … },
//!   "signature": "…sig.ed25519"
//! }
//! ```
//!
//! The signature covers the same object without `signature`, printed the
//! same way. The message id is the SHA-256 of the complete printed object.

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::{
    Content, Message, MessageWithoutId, RawMessage, Sequence, UnsignedMessage, VerifiedRawMessage,
};
use crate::formats::{FeedFormat, MessageHmac};
use crate::identity::{IdentityRef, MessageRef, PrivateIdentity};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

const SIGNATURE_SUFFIX: &str = ".sig.ed25519";
const HASH_FUNCTION: &str = "sha256";
const FIELD_ORDER: [&str; 6] = ["previous", "author", "sequence", "timestamp", "hash", "content"];

/// Classic JSON feed format.
#[derive(Debug, Clone, Default)]
pub struct Scuttlebutt {
    hmac: MessageHmac,
}

impl Scuttlebutt {
    pub fn new(hmac: MessageHmac) -> Self {
        Self { hmac }
    }

    /// Sign a message as `author`, producing bytes other nodes can verify.
    pub fn sign(
        &self,
        unsigned: &UnsignedMessage,
        author: &PrivateIdentity,
    ) -> ReplicationResult<Message> {
        let mut object = Map::new();
        object.insert(
            "previous".to_string(),
            unsigned
                .previous()
                .map(|p| Value::String(p.to_string()))
                .unwrap_or(Value::Null),
        );
        object.insert("author".to_string(), Value::String(author.identity().to_string()));
        object.insert("sequence".to_string(), Value::from(unsigned.sequence().get()));
        object.insert(
            "timestamp".to_string(),
            Value::from(unsigned.timestamp().timestamp_millis()),
        );
        object.insert("hash".to_string(), Value::String(HASH_FUNCTION.to_string()));
        object.insert("content".to_string(), unsigned.content().clone());

        let payload = serde_json::to_string_pretty(&object)?;
        let signature = author.sign(&self.hmac.signing_input(payload.as_bytes())?);
        object.insert(
            "signature".to_string(),
            Value::String(format!("{}{}", STANDARD.encode(signature), SIGNATURE_SUFFIX)),
        );

        let raw = serde_json::to_string_pretty(&object)?;
        self.verify(&RawMessage::new(raw.into_bytes()))
    }
}

impl FeedFormat for Scuttlebutt {
    fn name(&self) -> &'static str {
        "scuttlebutt"
    }

    fn verify(&self, raw: &RawMessage) -> ReplicationResult<Message> {
        let object = parse_object(raw.as_bytes())?;

        let printed = serde_json::to_string_pretty(&Value::Object(object.clone()))?;
        if printed.as_bytes() != raw.as_bytes() {
            return Err(ReplicationError::InvalidMessage(
                "message is not in its canonical encoding".to_string(),
            ));
        }

        let (signature, unsigned) = split_signature(object)?;
        let fields = MessageFields::parse(&unsigned)?;

        let payload = serde_json::to_string_pretty(&Value::Object(unsigned))?;
        fields
            .author
            .verify(&self.hmac.signing_input(payload.as_bytes())?, &signature)?;

        let id = MessageRef::digest(raw.as_bytes());
        fields
            .into_message(VerifiedRawMessage::new(raw.as_bytes().to_vec()))?
            .with_id(id)
    }

    fn load(&self, raw: &VerifiedRawMessage) -> ReplicationResult<MessageWithoutId> {
        let object = parse_object(raw.as_bytes())?;
        let (_, unsigned) = split_signature(object)?;
        MessageFields::parse(&unsigned)?.into_message(raw.clone())
    }
}

fn parse_object(bytes: &[u8]) -> ReplicationResult<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(ReplicationError::InvalidMessage(
            "message is not a JSON object".to_string(),
        )),
        Err(e) => Err(ReplicationError::InvalidMessage(format!(
            "message is not valid JSON: {}",
            e
        ))),
    }
}

/// Separate the signature from the signed fields, keeping their order.
fn split_signature(object: Map<String, Value>) -> ReplicationResult<(Vec<u8>, Map<String, Value>)> {
    let mut signature = None;
    let mut unsigned = Map::new();
    for (key, value) in object {
        if key == "signature" {
            signature = Some(value);
        } else {
            unsigned.insert(key, value);
        }
    }

    let signature = signature
        .as_ref()
        .and_then(Value::as_str)
        .ok_or_else(|| ReplicationError::InvalidSignature("missing signature".to_string()))?;
    let encoded = signature.strip_suffix(SIGNATURE_SUFFIX).ok_or_else(|| {
        ReplicationError::InvalidSignature(format!("signature must end with {}", SIGNATURE_SUFFIX))
    })?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ReplicationError::InvalidSignature(format!("signature is not base64: {}", e)))?;

    Ok((bytes, unsigned))
}

struct MessageFields {
    previous: Option<MessageRef>,
    author: IdentityRef,
    sequence: Sequence,
    timestamp: DateTime<Utc>,
    content: Value,
}

impl MessageFields {
    fn parse(unsigned: &Map<String, Value>) -> ReplicationResult<Self> {
        let keys: Vec<&str> = unsigned.keys().map(String::as_str).collect();
        if keys != FIELD_ORDER {
            return Err(ReplicationError::InvalidMessage(format!(
                "unexpected fields {:?}",
                keys
            )));
        }

        let previous = match &unsigned["previous"] {
            Value::Null => None,
            Value::String(s) => Some(s.parse::<MessageRef>()?),
            other => {
                return Err(ReplicationError::InvalidMessage(format!(
                    "invalid previous {}",
                    other
                )))
            }
        };

        let author = unsigned["author"]
            .as_str()
            .ok_or_else(|| ReplicationError::InvalidMessage("author is not a string".to_string()))?
            .parse::<IdentityRef>()?;

        let sequence = unsigned["sequence"]
            .as_u64()
            .ok_or_else(|| {
                ReplicationError::InvalidMessage("sequence is not a positive integer".to_string())
            })
            .and_then(Sequence::new)?;

        let timestamp = parse_timestamp(&unsigned["timestamp"])?;

        if unsigned["hash"].as_str() != Some(HASH_FUNCTION) {
            return Err(ReplicationError::InvalidMessage(format!(
                "unsupported hash function {}",
                unsigned["hash"]
            )));
        }

        Ok(Self {
            previous,
            author,
            sequence,
            timestamp,
            content: unsigned["content"].clone(),
        })
    }

    fn into_message(self, raw: VerifiedRawMessage) -> ReplicationResult<MessageWithoutId> {
        MessageWithoutId::new(
            self.previous,
            self.sequence,
            self.author,
            self.author.main_feed(),
            self.timestamp,
            Content::new(self.content),
            raw,
        )
    }
}

/// Milliseconds since the epoch; fractional values are truncated.
fn parse_timestamp(value: &Value) -> ReplicationResult<DateTime<Utc>> {
    let millis = value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| ReplicationError::InvalidMessage(format!("invalid timestamp {}", value)))?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| ReplicationError::InvalidMessage(format!("timestamp {} out of range", millis)))
}
