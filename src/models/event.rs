//! Ephemeral pub/sub event row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transient notification written for downstream fan-out.
///
/// Never a system of record; the retention sweep hard-deletes expired rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Event {
    /// Monotonic row identifier.
    pub id: i64,
    /// Session the event concerns, if any.
    pub session_id: Option<String>,
    /// Fan-out channel name.
    pub channel: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Insertion timestamp.
    pub created_at: DateTime<Utc>,
}
