//! Ed25519 keypair used to sign feed messages
//!
//! Every identity on the network is an Ed25519 key. The private half signs
//! messages appended to the identity's feeds; the public half is what
//! appears as the `author` of those messages.

use crate::error::{ReplicationError, ReplicationResult};
use crate::identity::IdentityRef;
use ed25519_dalek::{Signer, SigningKey};

/// Private identity able to sign messages.
pub struct PrivateIdentity {
    signing: SigningKey,
}

impl PrivateIdentity {
    /// Generate a new random identity
    pub fn generate() -> ReplicationResult<Self> {
        // getrandom directly to avoid rand version conflicts with ed25519-dalek
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed)
            .map_err(|e| ReplicationError::Identity(format!("no entropy available: {}", e)))?;
        Ok(Self::from_seed(&seed))
    }

    /// Deterministic identity from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Public reference of this identity.
    pub fn identity(&self) -> IdentityRef {
        IdentityRef::from_bytes(self.signing.verifying_key().to_bytes())
    }

    /// Sign arbitrary bytes.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// The 32-byte seed, suitable for storing the key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// Restore an identity from its seed bytes.
    pub fn from_bytes(bytes: &[u8]) -> ReplicationResult<Self> {
        let seed: [u8; 32] = bytes.try_into().map_err(|_| {
            ReplicationError::Identity(format!(
                "private key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_seed(&seed))
    }
}

impl std::fmt::Debug for PrivateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateIdentity")
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_sign() {
        let keypair = PrivateIdentity::generate().unwrap();
        let message = b"hello scuttlebutt";

        let signature = keypair.sign(message);
        assert!(keypair.identity().verify(message, &signature).is_ok());
    }

    #[test]
    fn test_from_seed_is_deterministic() {
        let seed = [7u8; 32];
        let a = PrivateIdentity::from_seed(&seed);
        let b = PrivateIdentity::from_seed(&seed);

        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.sign(b"x"), b.sign(b"x"));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let keypair = PrivateIdentity::generate().unwrap();
        let restored = PrivateIdentity::from_bytes(&keypair.to_bytes()).unwrap();
        assert_eq!(keypair.identity(), restored.identity());
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        let result = PrivateIdentity::from_bytes(&[1u8; 31]);
        assert!(matches!(result, Err(ReplicationError::Identity(_))));
    }

    #[test]
    fn test_other_key_does_not_verify() {
        let alice = PrivateIdentity::generate().unwrap();
        let bob = PrivateIdentity::generate().unwrap();

        let signature = alice.sign(b"from alice");
        assert!(bob.identity().verify(b"from alice", &signature).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let keypair = PrivateIdentity::from_seed(&[3u8; 32]);
        let debug = format!("{:?}", keypair);
        assert!(debug.contains(".ed25519"));
        assert!(!debug.contains(&hex::encode([3u8; 32])));
    }
}
