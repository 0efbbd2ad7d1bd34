use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AnchorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorStatus {
    Pending,
    Anchored,
    Failed,
}

impl AnchorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorStatus::Pending => "pending",
            AnchorStatus::Anchored => "anchored",
            AnchorStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnchorStatus {
    type Err = AnchorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnchorStatus::Pending),
            "anchored" => Ok(AnchorStatus::Anchored),
            "failed" => Ok(AnchorStatus::Failed),
            other => Err(AnchorError::DatabaseError(format!(
                "Unknown anchor status: {}",
                other
            ))),
        }
    }
}

/// Merkle batch over one actor's entries in a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditBatch {
    pub id: String,
    pub actor: String,
    pub root_hash: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub entry_count: i64,
    pub created_at: DateTime<Utc>,
    pub anchor_status: AnchorStatus,
    pub anchor_tx_hash: Option<String>,
    pub anchor_block_number: Option<u64>,
    pub anchored_at: Option<DateTime<Utc>>,
    pub anchor_error: Option<String>,
    /// Anchor runs started; non-zero means the root may already be on chain.
    #[serde(default)]
    pub anchor_attempts: i64,
}

impl AuditBatch {
    /// Fully anchored: status plus every on-chain field recorded.
    pub fn is_anchored(&self) -> bool {
        self.anchor_status == AnchorStatus::Anchored
            && self.anchor_tx_hash.is_some()
            && self.anchor_block_number.is_some()
            && self.anchored_at.is_some()
    }
}

/// Storage representation of a timestamp.
///
/// Fails for instants outside roughly 1677..=2262, which do not fit in
/// `i64` nanoseconds.
pub fn to_nanos(timestamp: DateTime<Utc>) -> Result<i64, AnchorError> {
    timestamp.timestamp_nanos_opt().ok_or_else(|| {
        AnchorError::InvalidTimestamp(format!(
            "{} is outside the storable range",
            timestamp.to_rfc3339()
        ))
    })
}

/// Range-filter bound. Out-of-range instants saturate, which leaves the
/// filter's meaning unchanged.
pub fn bound_nanos(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_nanos_opt().unwrap_or(if timestamp.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

pub fn from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}
