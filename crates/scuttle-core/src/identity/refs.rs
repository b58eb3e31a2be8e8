//! Textual references to identities, feeds and messages
//!
//! ```text
//! @<base64 ed25519 public key>.ed25519    identity / classic feed
//! %<base64 sha256 digest>.sha256          message
//! ```

use crate::error::{ReplicationError, ReplicationResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const IDENTITY_PREFIX: &str = "@";
const IDENTITY_SUFFIX: &str = ".ed25519";
const MESSAGE_PREFIX: &str = "%";
const MESSAGE_SUFFIX: &str = ".sha256";

fn decode_32(s: &str, prefix: &str, suffix: &str) -> ReplicationResult<[u8; 32]> {
    let body = s
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .ok_or_else(|| {
            ReplicationError::Identity(format!("'{}' is not a {}…{} reference", s, prefix, suffix))
        })?;
    let bytes = STANDARD
        .decode(body)
        .map_err(|e| ReplicationError::Identity(format!("invalid base64 in '{}': {}", s, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        ReplicationError::Identity(format!("reference '{}' decodes to {} bytes", s, b.len()))
    })
}

/// Public identity of a network participant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityRef([u8; 32]);

impl IdentityRef {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The classic feed owned by this identity.
    pub fn main_feed(&self) -> FeedRef {
        FeedRef::new(*self, FeedKind::Classic)
    }

    /// Verify an Ed25519 signature made by this identity.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> ReplicationResult<()> {
        let key = VerifyingKey::from_bytes(&self.0)
            .map_err(|e| ReplicationError::InvalidSignature(format!("bad public key: {}", e)))?;
        let signature = Signature::from_slice(signature)
            .map_err(|e| ReplicationError::InvalidSignature(format!("malformed signature: {}", e)))?;
        key.verify(message, &signature)
            .map_err(|_| ReplicationError::InvalidSignature(format!("signature by {} does not verify", self)))
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", IDENTITY_PREFIX, STANDARD.encode(self.0), IDENTITY_SUFFIX)
    }
}

impl fmt::Debug for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityRef({})", self)
    }
}

impl FromStr for IdentityRef {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_32(s, IDENTITY_PREFIX, IDENTITY_SUFFIX)?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| ReplicationError::Identity(format!("'{}' is not an ed25519 key: {}", s, e)))?;
        Ok(Self(bytes))
    }
}

/// Kind of feed an identity can own.
///
/// Only the classic (legacy JSON) feed is supported; the kind is kept in
/// the reference so other feed formats can be addressed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeedKind {
    Classic,
}

/// Reference to a single feed: `(identity, kind)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedRef {
    identity: IdentityRef,
    kind: FeedKind,
}

impl FeedRef {
    pub fn new(identity: IdentityRef, kind: FeedKind) -> Self {
        Self { identity, kind }
    }

    pub fn identity(&self) -> IdentityRef {
        self.identity
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }
}

impl fmt::Display for FeedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FeedKind::Classic => self.identity.fmt(f),
        }
    }
}

impl fmt::Debug for FeedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedRef({})", self)
    }
}

impl FromStr for FeedRef {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(IdentityRef::from_str(s)?.main_feed())
    }
}

/// Content hash identifying a message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageRef([u8; 32]);

impl MessageRef {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// SHA-256 of the given raw message bytes.
    pub fn digest(raw: &[u8]) -> Self {
        Self(Sha256::digest(raw).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", MESSAGE_PREFIX, STANDARD.encode(self.0), MESSAGE_SUFFIX)
    }
}

impl fmt::Debug for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageRef({})", self)
    }
}

impl FromStr for MessageRef {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_32(s, MESSAGE_PREFIX, MESSAGE_SUFFIX).map(Self)
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_serde!(IdentityRef);
string_serde!(FeedRef);
string_serde!(MessageRef);
