//! Webhook event dispatch.
//!
//! Events arrive here already signature-verified by the outer HTTP layer.
//! The dispatcher's only job is mapping each event onto the right
//! collaborator: group membership changes re-sync the affected channel,
//! inbound messages go through the router, status changes are noted.

use {
    serde::Deserialize,
    std::sync::Arc,
    thiserror::Error,
    tracing::{info, warn},
};

use {
    botdesk_channels::{SyncStatusPatch, SyncStatusStore},
    botdesk_gateway::GatewayApi,
    botdesk_protocol::{GatewayMessage, RemoteGroup},
    botdesk_routing::{MessageRouter, RouteError, RouteOutcome},
    botdesk_sync::{SyncEngine, SyncError, SyncReport},
};

/// A verified webhook payload, tagged by its `event` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum WebhookEvent {
    #[serde(rename = "group.joined")]
    GroupJoined { group: RemoteGroup },
    #[serde(rename = "group.left")]
    GroupLeft {
        #[serde(rename = "groupId")]
        group_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "message.received")]
    MessageReceived { message: GatewayMessage },
    #[serde(rename = "status.change")]
    StatusChange { status: serde_json::Value },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("gateway: {0}")]
    Gateway(#[from] botdesk_gateway::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// What handling one event amounted to.
#[derive(Debug)]
pub enum DispatchOutcome {
    Synced(SyncReport),
    Routed(RouteOutcome),
    StatusNoted,
}

pub struct WebhookDispatcher {
    sync: Arc<SyncEngine>,
    router: Arc<MessageRouter>,
    gateway: Arc<dyn GatewayApi>,
    status: Arc<dyn SyncStatusStore>,
}

impl WebhookDispatcher {
    pub fn new(
        sync: Arc<SyncEngine>,
        router: Arc<MessageRouter>,
        gateway: Arc<dyn GatewayApi>,
        status: Arc<dyn SyncStatusStore>,
    ) -> Self {
        Self {
            sync,
            router,
            gateway,
            status,
        }
    }

    /// Handle one event. Errors propagate to the caller so the webhook
    /// endpoint can signal retry; only analytics inside the router are
    /// swallowed.
    pub async fn dispatch(
        &self,
        organization_id: &str,
        event: WebhookEvent,
    ) -> Result<DispatchOutcome, DispatchError> {
        match event {
            WebhookEvent::GroupJoined { group } => {
                info!(organization_id, group_id = %group.id, "group joined");
                let report = self
                    .sync
                    .sync_single_group(organization_id, &group.id)
                    .await?;
                Ok(DispatchOutcome::Synced(report))
            },
            WebhookEvent::GroupLeft { group_id, reason } => {
                info!(organization_id, group_id, reason = reason.as_deref(), "group left");
                let report = self
                    .sync
                    .sync_single_group(organization_id, &group_id)
                    .await?;
                Ok(DispatchOutcome::Synced(report))
            },
            WebhookEvent::MessageReceived { message } => {
                let outcome = self.router.route(organization_id, &message).await?;
                match &outcome {
                    RouteOutcome::Completed { reply }
                    | RouteOutcome::FallbackGenerated { reply } => {
                        self.gateway.send_message(&message.group_id, reply).await?;
                    },
                    _ => {},
                }
                Ok(DispatchOutcome::Routed(outcome))
            },
            WebhookEvent::StatusChange { status } => {
                info!(organization_id, status = %status, "gateway status change");
                if let Err(e) = self
                    .status
                    .upsert(organization_id, SyncStatusPatch::default())
                    .await
                {
                    warn!(organization_id, error = %e, "sync status touch failed");
                }
                Ok(DispatchOutcome::StatusNoted)
            },
        }
    }
}
