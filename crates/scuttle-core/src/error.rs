//! Error types for the replication engine

use thiserror::Error;

/// Coarse classification of a [`ReplicationError`].
///
/// Replication code uses the kind to decide what a failure takes down:
/// validation failures abandon a single message or feed stream, negotiation
/// failures trigger a protocol fallback, transport failures end the peer's
/// replication and storage failures abort the current operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed, unsigned, wrong-network or out-of-order message
    Validation,
    /// The remote declined a protocol
    Negotiation,
    /// The connection to the peer failed
    Transport,
    /// Local persistence failed
    Storage,
    /// The operation was cancelled
    Cancelled,
}

/// Main error type for replication operations
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Message structure violates the feed model
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Signature (or network HMAC) did not verify
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// No registered format accepted the raw message
    #[error("unknown message: {}", join_reasons(.reasons))]
    UnknownMessage {
        /// One error per format that rejected the message, in priority order
        reasons: Vec<ReplicationError>,
    },

    /// Message does not directly continue the feed
    #[error("Feed continuity violated: {0}")]
    ChainViolation(String),

    /// Message belongs to a banned feed
    #[error("Feed is banned: {0}")]
    Banned(String),

    /// Message belongs to a feed outside of the want-list
    #[error("Feed is not wanted: {0}")]
    NotWanted(String),

    /// Invalid identity, key or reference
    #[error("Identity error: {0}")]
    Identity(String),

    /// Invalid sequence, hops or other value object
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Remote rejected a protocol (e.g. EBT unsupported)
    #[error("Protocol rejected by peer: {0}")]
    Rejected(String),

    /// Error talking to a peer
    #[error("Transport error: {0}")]
    Transport(String),

    /// Replication was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Error during storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_reasons(reasons: &[ReplicationError]) -> String {
    if reasons.is_empty() {
        return "no formats registered".to_string();
    }
    reasons
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        ReplicationError::Serialization(err.to_string())
    }
}

impl From<postcard::Error> for ReplicationError {
    fn from(err: postcard::Error) -> Self {
        ReplicationError::Serialization(err.to_string())
    }
}

impl ReplicationError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReplicationError::InvalidMessage(_)
            | ReplicationError::InvalidSignature(_)
            | ReplicationError::UnknownMessage { .. }
            | ReplicationError::ChainViolation(_)
            | ReplicationError::Banned(_)
            | ReplicationError::NotWanted(_)
            | ReplicationError::Identity(_)
            | ReplicationError::InvalidValue(_)
            | ReplicationError::Serialization(_) => ErrorKind::Validation,
            ReplicationError::Rejected(_) => ErrorKind::Negotiation,
            ReplicationError::Transport(_) => ErrorKind::Transport,
            ReplicationError::Cancelled => ErrorKind::Cancelled,
            ReplicationError::Storage(_)
            | ReplicationError::Database(_)
            | ReplicationError::Transaction(_)
            | ReplicationError::Table(_)
            | ReplicationError::StorageOp(_)
            | ReplicationError::Commit(_)
            | ReplicationError::Config(_)
            | ReplicationError::Io(_) => ErrorKind::Storage,
        }
    }

    /// True if the remote declined a protocol.
    pub fn is_rejection(&self) -> bool {
        self.kind() == ErrorKind::Negotiation
    }

    /// True if this error, or any aggregated format error, is a signature failure.
    pub fn is_invalid_signature(&self) -> bool {
        match self {
            ReplicationError::InvalidSignature(_) => true,
            ReplicationError::UnknownMessage { reasons } => {
                reasons.iter().any(|r| r.is_invalid_signature())
            }
            _ => false,
        }
    }
}

/// Result type alias using ReplicationError
pub type ReplicationResult<T> = Result<T, ReplicationError>;
