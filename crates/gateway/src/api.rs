//! High-level gateway operations: thin wrappers over `request()` with fixed
//! method names, behind a trait so the sync engine and router can be tested
//! against a fake gateway.

use {async_trait::async_trait, serde::{Deserialize, Serialize}, serde_json::{Value, json}};

use {
    botdesk_config::{GroupConfig, merge_group_config},
    botdesk_protocol::RemoteGroup,
};

use crate::{client::GatewayClient, error::Error};

/// The gateway's raw config text plus its current content hash, as returned
/// by `config.get` and consumed by `config.patch` for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    pub raw: String,
    pub hash: String,
}

/// One prior conversation turn fed into response generation.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTurn {
    pub role: String,
    pub content: String,
}

/// Parameters for a remote agent run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub message: String,
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AgentTurn>,
}

/// Result of a remote agent run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentReply {
    pub text: Option<String>,
}

/// Remote operations consumed by the rest of the system.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    async fn health(&self) -> Result<Value, Error>;
    async fn status(&self) -> Result<Value, Error>;
    /// The live group roster, parsed from the status payload.
    async fn list_groups(&self) -> Result<Vec<RemoteGroup>, Error>;
    async fn get_config_raw(&self) -> Result<RawConfig, Error>;
    /// Submit a config patch guarded by the hash it was based on.
    async fn patch_config(&self, raw: String, base_hash: String) -> Result<(), Error>;
    /// Wildcard defaults merged with the per-group override, shallow,
    /// override wins.
    async fn get_group_config(&self, group_id: &str) -> Result<GroupConfig, Error>;
    async fn update_group_config(&self, group_id: &str, config: &GroupConfig)
    -> Result<(), Error>;
    async fn send_message(&self, group_id: &str, text: &str) -> Result<(), Error>;
    async fn run_agent(&self, request: &AgentRequest) -> Result<AgentReply, Error>;
    async fn presence(&self) -> Result<Value, Error>;
}

#[async_trait]
impl GatewayApi for GatewayClient {
    async fn health(&self) -> Result<Value, Error> {
        self.request("health", json!({})).await
    }

    async fn status(&self) -> Result<Value, Error> {
        self.request("status", json!({})).await
    }

    async fn list_groups(&self) -> Result<Vec<RemoteGroup>, Error> {
        let status = self.status().await?;
        match status.get("groups") {
            Some(groups) => serde_json::from_value(groups.clone())
                .map_err(|e| Error::Protocol(format!("bad group roster: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    async fn get_config_raw(&self) -> Result<RawConfig, Error> {
        let payload = self.request("config.get", json!({})).await?;
        serde_json::from_value(payload)
            .map_err(|e| Error::Protocol(format!("bad config.get payload: {e}")))
    }

    async fn patch_config(&self, raw: String, base_hash: String) -> Result<(), Error> {
        self.request("config.patch", json!({ "raw": raw, "baseHash": base_hash }))
            .await?;
        Ok(())
    }

    async fn get_group_config(&self, group_id: &str) -> Result<GroupConfig, Error> {
        let config = self.get_config_raw().await?;
        let parsed: Value = serde_json::from_str(&config.raw)?;
        let groups = &parsed["groups"];
        let merged = merge_group_config(&groups["*"], &groups[group_id]);
        if merged.is_null() {
            return Ok(GroupConfig::default());
        }
        serde_json::from_value(merged)
            .map_err(|e| Error::Protocol(format!("bad group config for {group_id}: {e}")))
    }

    async fn update_group_config(
        &self,
        group_id: &str,
        config: &GroupConfig,
    ) -> Result<(), Error> {
        let current = self.get_config_raw().await?;
        // Minimal patch scoped to this group's config key.
        let raw = json!({ "groups": { group_id: config } }).to_string();
        self.patch_config(raw, current.hash).await
    }

    async fn send_message(&self, group_id: &str, text: &str) -> Result<(), Error> {
        self.request("send", json!({ "to": group_id, "text": text }))
            .await?;
        Ok(())
    }

    async fn run_agent(&self, request: &AgentRequest) -> Result<AgentReply, Error> {
        let payload = self.request("agent", serde_json::to_value(request)?).await?;
        serde_json::from_value(payload)
            .map_err(|e| Error::Protocol(format!("bad agent payload: {e}")))
    }

    async fn presence(&self) -> Result<Value, Error> {
        self.request("system-presence", json!({})).await
    }
}
