//! Message formats
//!
//! Raw bytes arriving from peers are identified by trying every registered
//! [`FeedFormat`] in priority order; the first format that accepts the
//! bytes produces the [`Message`]. When none accepts them the error keeps
//! the reason each format gave.

mod scuttlebutt;

pub use scuttlebutt::Scuttlebutt;

use crate::error::{ReplicationError, ReplicationResult};
use crate::feed::{Message, MessageWithoutId, RawMessage, VerifiedRawMessage};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha512_256;
use std::sync::Arc;

/// A way of encoding and signing feed messages.
pub trait FeedFormat: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Check signature and structure of bytes received from a peer.
    fn verify(&self, raw: &RawMessage) -> ReplicationResult<Message>;

    /// Decode bytes which were verified before, skipping the signature check.
    fn load(&self, raw: &VerifiedRawMessage) -> ReplicationResult<MessageWithoutId>;
}

/// Dispatches raw messages to the registered formats.
#[derive(Clone)]
pub struct RawMessageIdentifier {
    formats: Vec<Arc<dyn FeedFormat>>,
}

impl RawMessageIdentifier {
    pub fn new(formats: Vec<Arc<dyn FeedFormat>>) -> Self {
        Self { formats }
    }

    /// Only the classic Scuttlebutt format, using the given network HMAC.
    pub fn scuttlebutt(hmac: MessageHmac) -> Self {
        Self::new(vec![Arc::new(Scuttlebutt::new(hmac))])
    }

    pub fn verify_raw_message(&self, raw: &RawMessage) -> ReplicationResult<Message> {
        let mut reasons = Vec::new();
        for format in &self.formats {
            match format.verify(raw) {
                Ok(message) => return Ok(message),
                Err(e) => reasons.push(e),
            }
        }
        Err(ReplicationError::UnknownMessage { reasons })
    }

    pub fn load_raw_message(&self, raw: &VerifiedRawMessage) -> ReplicationResult<MessageWithoutId> {
        let mut reasons = Vec::new();
        for format in &self.formats {
            match format.load(raw) {
                Ok(message) => return Ok(message),
                Err(e) => reasons.push(e),
            }
        }
        Err(ReplicationError::UnknownMessage { reasons })
    }
}

impl std::fmt::Debug for RawMessageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.formats.iter().map(|f| f.name()).collect();
        f.debug_struct("RawMessageIdentifier")
            .field("formats", &names)
            .finish()
    }
}

/// Length of a network HMAC key.
pub const MESSAGE_HMAC_LENGTH: usize = 32;

/// Key separating test networks from the main network.
///
/// When set, signatures are made over `HMAC-SHA512-256(key, payload)`
/// instead of the payload itself, so messages signed on networks with
/// different keys never verify on each other. The default (no key) is
/// what the main network uses.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHmac(Option<[u8; MESSAGE_HMAC_LENGTH]>);

impl MessageHmac {
    /// Accepts an empty slice (no HMAC) or exactly 32 bytes.
    pub fn new(bytes: &[u8]) -> ReplicationResult<Self> {
        if bytes.is_empty() {
            return Ok(Self(None));
        }
        let key: [u8; MESSAGE_HMAC_LENGTH] = bytes.try_into().map_err(|_| {
            ReplicationError::InvalidValue(format!(
                "invalid message HMAC length {}, must be {}",
                bytes.len(),
                MESSAGE_HMAC_LENGTH
            ))
        })?;
        Ok(Self(Some(key)))
    }

    pub fn from_base64(encoded: &str) -> ReplicationResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ReplicationError::InvalidValue(format!("message HMAC is not base64: {}", e)))?;
        Self::new(&bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_none()
    }

    pub fn bytes(&self) -> Option<&[u8; MESSAGE_HMAC_LENGTH]> {
        self.0.as_ref()
    }

    /// Bytes that actually get signed for this payload.
    pub(crate) fn signing_input(&self, payload: &[u8]) -> ReplicationResult<Vec<u8>> {
        let Some(key) = &self.0 else {
            return Ok(payload.to_vec());
        };
        let mut mac = Hmac::<Sha512_256>::new_from_slice(key)
            .map_err(|e| ReplicationError::InvalidValue(format!("message HMAC: {}", e)))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl std::fmt::Debug for MessageHmac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            None => write!(f, "MessageHmac(none)"),
            Some(_) => write!(f, "MessageHmac(set)"),
        }
    }
}
