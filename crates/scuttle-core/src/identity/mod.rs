//! Identities and references
//!
//! An identity is an Ed25519 keypair. Everything else on the network is
//! addressed by a textual reference derived from a key or a hash:
//!
//! - [`IdentityRef`]: `@<key>.ed25519`, the author of messages
//! - [`FeedRef`]: a feed owned by an identity (the classic feed is the
//!   identity's *main feed*)
//! - [`MessageRef`]: `%<sha256>.sha256`, the id of a message
//!
//! ## Example
//!
//! ```rust
//! use scuttle_core::identity::PrivateIdentity;
//!
//! let keypair = PrivateIdentity::generate().unwrap();
//! let identity = keypair.identity();
//!
//! let signature = keypair.sign(b"hello");
//! assert!(identity.verify(b"hello", &signature).is_ok());
//! assert_eq!(identity.main_feed().identity(), identity);
//! ```

mod keypair;
mod refs;

pub use keypair::PrivateIdentity;
pub use refs::{FeedKind, FeedRef, IdentityRef, MessageRef};
