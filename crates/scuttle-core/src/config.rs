//! Replication configuration with validation.
//!
//! Loaded from JSON; every field has a default, so `{}` is a valid config.
//!
//! ```json
//! {
//!   "hops": 2,
//!   "network_hmac": "<base64 of 32 bytes>",
//!   "gossip_pass_interval": "30s",
//!   "ebt_accept_timeout": "500ms"
//! }
//! ```

use crate::error::{ReplicationError, ReplicationResult};
use crate::formats::MessageHmac;
use crate::graph::Hops;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings for the replication engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Social graph depth replicated (0 = own feed only)
    pub hops: u32,
    /// Base64 network HMAC key, empty for the main network
    pub network_hmac: String,
    /// How long the want-list is cached
    #[serde(with = "duration_serde")]
    pub want_list_refresh: Duration,
    /// Feeds requested concurrently from one peer during gossip
    pub gossip_fan_out: usize,
    /// Pause between gossip passes over the want-list
    #[serde(with = "duration_serde")]
    pub gossip_pass_interval: Duration,
    /// Messages held in memory before storage applies backpressure
    pub message_buffer_capacity: usize,
    /// How often buffered messages are flushed
    #[serde(with = "duration_serde")]
    pub message_buffer_flush_interval: Duration,
    /// Whether EBT is offered and accepted
    pub ebt_enabled: bool,
    /// How long a responder waits for the initiator to open EBT
    #[serde(with = "duration_serde")]
    pub ebt_accept_timeout: Duration,
    /// Messages read from storage at a time when serving history
    pub history_batch_size: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            hops: 3,
            network_hmac: String::new(),
            want_list_refresh: Duration::from_secs(60),
            gossip_fan_out: 8,
            gossip_pass_interval: Duration::from_secs(30),
            message_buffer_capacity: 1000,
            message_buffer_flush_interval: Duration::from_millis(100),
            ebt_enabled: true,
            ebt_accept_timeout: Duration::from_secs(2),
            history_batch_size: 100,
        }
    }
}

impl ReplicationConfig {
    pub fn from_json(json: &str) -> ReplicationResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ReplicationError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ReplicationResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Validate configuration
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.gossip_fan_out == 0 {
            return Err(ReplicationError::Config("gossip_fan_out cannot be 0".into()));
        }
        if self.message_buffer_capacity == 0 {
            return Err(ReplicationError::Config(
                "message_buffer_capacity cannot be 0".into(),
            ));
        }
        if self.history_batch_size == 0 {
            return Err(ReplicationError::Config("history_batch_size cannot be 0".into()));
        }
        if self.message_buffer_flush_interval.is_zero() || self.gossip_pass_interval.is_zero() {
            return Err(ReplicationError::Config("intervals cannot be 0".into()));
        }
        self.message_hmac()?;
        Ok(())
    }

    pub fn hops(&self) -> Hops {
        Hops::from(self.hops)
    }

    pub fn message_hmac(&self) -> ReplicationResult<MessageHmac> {
        MessageHmac::from_base64(&self.network_hmac)
            .map_err(|e| ReplicationError::Config(format!("network_hmac: {}", e)))
    }
}

/// Durations as "250ms", "30s" or "5m"; bare numbers are seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
