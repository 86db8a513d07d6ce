use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Caller-assigned post identity. Unique within a batch and the join key
/// for every side table the pipeline produces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub String);

impl PostId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PostId {
    fn from(value: &str) -> Self {
        PostId(value.to_string())
    }
}

impl From<String> for PostId {
    fn from(value: String) -> Self {
        PostId(value)
    }
}

impl From<i64> for PostId {
    fn from(value: i64) -> Self {
        PostId(value.to_string())
    }
}

/// A validated post with just the fields the detectors need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: PostId,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub account_id: String,
    /// Constant per account within a batch.
    pub account_age_days: u32,
}

impl Post {
    pub fn new(
        post_id: impl Into<PostId>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
        account_id: impl Into<String>,
        account_age_days: u32,
    ) -> Self {
        Self {
            post_id: post_id.into(),
            text: text.into(),
            timestamp,
            account_id: account_id.into(),
            account_age_days,
        }
    }
}

/// Identifier as it arrives from upstream: exported tables often carry
/// integer ids, hand-written JSON tends to carry strings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawKey {
    Int(i64),
    Text(String),
}

impl RawKey {
    pub fn into_string(self) -> String {
        match self {
            RawKey::Int(n) => n.to_string(),
            RawKey::Text(s) => s,
        }
    }
}

/// Timestamp as it arrives from upstream: epoch seconds or a date string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(i64),
    Text(String),
}

impl RawTimestamp {
    /// Parse into an absolute UTC instant.
    ///
    /// Accepts RFC 3339, and naive `YYYY-MM-DD HH:MM:SS[.fff]` /
    /// `YYYY-MM-DDTHH:MM:SS[.fff]` strings which are read as UTC.
    pub fn parse(&self) -> Result<DateTime<Utc>, String> {
        match self {
            RawTimestamp::Epoch(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .ok_or_else(|| format!("epoch seconds out of range: {secs}")),
            RawTimestamp::Text(raw) => {
                let trimmed = raw.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
                    return Ok(dt.with_timezone(&Utc));
                }
                for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
                    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
                        return Ok(naive.and_utc());
                    }
                }
                Err(format!("unrecognized timestamp: {raw:?}"))
            }
        }
    }
}

/// An unvalidated input record. Every field is optional so that a missing
/// column is reported by validation instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPost {
    pub post_id: Option<RawKey>,
    pub text: Option<String>,
    pub timestamp: Option<RawTimestamp>,
    pub account_id: Option<RawKey>,
    pub account_age_days: Option<i64>,
}
