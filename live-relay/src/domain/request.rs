//! Relay requests and the payload carried by queue tasks.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const REDACTED: &str = "****";
const PARTIAL_PREFIX: usize = 4;

/// Ingest credential.
///
/// `Debug` never prints the key. Use [`StreamKey::expose`] only where the
/// full value must leave the process (the relay command line).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Up to four leading characters followed by `...`. At least one
    /// character of the key is always withheld.
    pub fn partial(&self) -> String {
        let shown = self.0.chars().count().saturating_sub(1).min(PARTIAL_PREFIX);
        let prefix: String = self.0.chars().take(shown).collect();
        format!("{prefix}...")
    }

    /// Replace every occurrence of the key in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, REDACTED)
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StreamKey").field(&self.partial()).finish()
    }
}

/// A client's request to relay a video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayRequest {
    pub owner_id: String,
    pub name: String,
    pub source: String,
    pub key: StreamKey,
    #[serde(rename = "loop", default)]
    pub loop_forever: bool,
    #[serde(default)]
    pub is_scheduled: bool,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_end_scheduled: bool,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl RelayRequest {
    /// Requested start, honoured only when the request is flagged as scheduled.
    pub fn requested_start(&self) -> Option<DateTime<Utc>> {
        self.start_time.filter(|_| self.is_scheduled)
    }

    /// Requested end, honoured only when the request is flagged as end-scheduled.
    pub fn requested_end(&self) -> Option<DateTime<Utc>> {
        self.end_time.filter(|_| self.is_end_scheduled)
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.owner_id.trim().is_empty() {
            return Err(Error::validation("owner_id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(Error::validation("name must not be empty"));
        }
        if self.source.trim().is_empty() {
            return Err(Error::validation("source must not be empty"));
        }
        if self.key.is_blank() {
            return Err(Error::validation("key must not be empty"));
        }
        if let Some(end) = self.requested_end() {
            let start = self.requested_start().map_or(now, |s| s.max(now));
            if end <= start {
                return Err(Error::validation("end_time must be after the start"));
            }
        }
        Ok(())
    }

    /// Payload handed to the queue for this request.
    pub fn payload(&self) -> RelayPayload {
        RelayPayload {
            owner_id: self.owner_id.clone(),
            source: self.source.trim().to_string(),
            stream_key: self.key.clone(),
            loop_forever: self.loop_forever,
            scheduled_at: self.requested_start(),
            ends_at: self.requested_end(),
        }
    }
}

/// Everything a worker needs to run a relay job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPayload {
    pub owner_id: String,
    pub source: String,
    pub stream_key: StreamKey,
    pub loop_forever: bool,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}
