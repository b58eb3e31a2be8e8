//! Feed and message model
//!
//! - [`message`]: sequences, raw bytes and validated messages
//! - [`contact`]: the follow/block relation between identities
//! - [`content`]: message content the engine understands
//! - [`Feed`]: the append-only aggregate used by storage

pub mod contact;
pub mod content;
#[allow(clippy::module_inception)]
mod feed;
pub mod message;

pub use contact::{Contact, ContactAction, ContactActions};
pub use content::{ContactContent, KnownContent};
pub use feed::{ContactToSave, Feed, MessageToPersist};
pub use message::{
    Content, Message, MessageWithoutId, RawMessage, Sequence, UnsignedMessage, VerifiedRawMessage,
};
