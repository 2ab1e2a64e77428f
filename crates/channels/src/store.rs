use {anyhow::Result, async_trait::async_trait};

use crate::model::{
    ChannelPatch, ConversationEntry, LocalChannel, NewChannel, NewConversationEntry, SyncStatus,
    SyncStatusPatch,
};

/// Persistent storage for channel records.
///
/// Deliberately has no delete: channels are deactivated by status patch,
/// preserving their history.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// All channels of one organization.
    async fn list(&self, organization_id: &str) -> Result<Vec<LocalChannel>>;
    /// Look up by the per-organization unique external group id.
    async fn find(
        &self,
        organization_id: &str,
        external_group_id: &str,
    ) -> Result<Option<LocalChannel>>;
    async fn create(&self, channel: NewChannel) -> Result<LocalChannel>;
    async fn update(&self, id: &str, patch: ChannelPatch) -> Result<()>;
}

/// Per-organization sync bookkeeping.
#[async_trait]
pub trait SyncStatusStore: Send + Sync {
    async fn find(&self, organization_id: &str) -> Result<Option<SyncStatus>>;
    async fn upsert(&self, organization_id: &str, patch: SyncStatusPatch) -> Result<()>;
}

/// Message history per channel, bounded reads for prompt context.
/// Doubles as the router's best-effort analytics sink.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, entry: NewConversationEntry) -> Result<()>;
    /// Most recent `limit` entries, oldest first.
    async fn recent(&self, channel_id: &str, limit: u32) -> Result<Vec<ConversationEntry>>;
}
