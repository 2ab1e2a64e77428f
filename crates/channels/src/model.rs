//! Data model for locally persisted channel records.

use serde::{Deserialize, Serialize};

/// Current epoch time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Lifecycle status of a local channel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Active,
    Inactive,
    Pending,
    Error,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "pending" => Ok(Self::Pending),
            "error" => Ok(Self::Error),
            other => anyhow::bail!("unknown channel status: {other}"),
        }
    }
}

/// A locally persisted chat channel, mirroring one remote group.
///
/// `external_group_id` is unique per organization.
#[derive(Debug, Clone, Serialize)]
pub struct LocalChannel {
    pub id: String,
    pub organization_id: String,
    pub external_group_id: String,
    pub name: String,
    pub status: ChannelStatus,
    pub config: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields required to create a channel record.
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub organization_id: String,
    pub external_group_id: String,
    pub name: String,
    pub status: ChannelStatus,
    pub config: serde_json::Value,
}

/// Partial update applied to an existing channel. `updated_at` is touched
/// by the store on every update.
#[derive(Debug, Clone, Default)]
pub struct ChannelPatch {
    pub name: Option<String>,
    pub status: Option<ChannelStatus>,
    pub config: Option<serde_json::Value>,
}

/// Per-organization sync bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub organization_id: String,
    pub last_sync_at: Option<i64>,
    pub in_progress: bool,
    pub group_count: i64,
    pub active_count: i64,
}

/// Partial update for the sync status row.
#[derive(Debug, Clone, Default)]
pub struct SyncStatusPatch {
    pub last_sync_at: Option<i64>,
    pub in_progress: Option<bool>,
    pub group_count: Option<i64>,
    pub active_count: Option<i64>,
}

/// A single stored conversation message, also used as the analytics record.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationEntry {
    pub id: i64,
    pub channel_id: String,
    /// "user" or "assistant".
    pub role: String,
    pub sender: Option<String>,
    pub body: String,
    pub created_at: i64,
}

/// Fields required to append a conversation entry.
#[derive(Debug, Clone)]
pub struct NewConversationEntry {
    pub channel_id: String,
    pub role: String,
    pub sender: Option<String>,
    pub body: String,
}
