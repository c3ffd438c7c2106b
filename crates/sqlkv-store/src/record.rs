//! Record types stored in a key-value table.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Type tag of a stored value.
///
/// Only strings are written by the store itself; any other tag read back
/// from the table is preserved as [`RecordKind::Other`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[default]
    String,
    Other(String),
}

impl RecordKind {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &str {
        match self {
            Self::String => "string",
            Self::Other(tag) => tag,
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Self {
        match s {
            "string" => Self::String,
            other => Self::Other(other.to_owned()),
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A full row of the key-value table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key.
    pub key: String,
    /// Payload. A `NULL` column reads back as the empty string.
    pub value: String,
    /// Type tag.
    pub kind: RecordKind,
    /// Unix seconds after which the record is logically absent.
    /// `None` means permanent.
    pub expires_at: Option<i64>,
}

impl Record {
    /// A string record.
    pub fn string(key: impl Into<String>, value: impl Into<String>, expires_at: Option<i64>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: RecordKind::String,
            expires_at,
        }
    }
}

/// The columns needed to decide visibility, without the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub key: String,
    pub kind: RecordKind,
    pub expires_at: Option<i64>,
}

/// Result of a TTL query on a live key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key never expires.
    Persistent,
    /// Time left before the key expires.
    Expires(Duration),
}

impl Ttl {
    /// Sentinel used by Redis-style integer TTL replies for permanent keys.
    pub const NO_EXPIRATION: i64 = -1;

    /// Remaining whole seconds, or [`Ttl::NO_EXPIRATION`].
    pub fn as_secs(self) -> i64 {
        match self {
            Self::Persistent => Self::NO_EXPIRATION,
            Self::Expires(left) => i64::try_from(left.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Remaining milliseconds, or [`Ttl::NO_EXPIRATION`].
    pub fn as_millis(self) -> i64 {
        match self {
            Self::Persistent => Self::NO_EXPIRATION,
            Self::Expires(left) => i64::try_from(left.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// The remaining duration, if the key expires at all.
    pub fn remaining(self) -> Option<Duration> {
        match self {
            Self::Persistent => None,
            Self::Expires(left) => Some(left),
        }
    }
}
