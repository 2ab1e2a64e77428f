use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("gateway: {0}")]
    Gateway(#[from] botdesk_gateway::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error("invalid stored config for channel {channel_id}: {reason}")]
    InvalidConfig { channel_id: String, reason: String },
}
