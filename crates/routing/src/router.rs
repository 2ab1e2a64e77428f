//! The inbound message pipeline.
//!
//! Each message walks a fixed gate sequence: self-authored stop, channel
//! resolution, enabled check, mention gate, then remote response generation
//! with a canned fallback. The outcome names the stage that ended the walk,
//! so callers and tests can assert on behavior instead of log lines.

use {std::sync::Arc, thiserror::Error, tracing::{debug, info, warn}};

use {
    botdesk_channels::{
        ChannelStatus, ChannelStore, ConversationEntry, ConversationStore, LocalChannel,
        NewConversationEntry,
    },
    botdesk_config::{GroupConfig, personality_to_prompt},
    botdesk_gateway::{AgentRequest, AgentTurn, GatewayApi},
    botdesk_protocol::GatewayMessage,
};

use crate::fallback::fallback_reply;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Where the pipeline stopped, or what it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The bot's own message echoed back; never answered.
    SelfAuthored,
    /// No local channel for this group id.
    UnknownChannel,
    /// Channel or config disabled.
    ChannelDisabled,
    /// Mention required and not present.
    MentionRequired,
    /// Remote generation succeeded.
    Completed { reply: String },
    /// Remote generation failed; a canned reply was produced instead.
    FallbackGenerated { reply: String },
}

/// Everything resolved for one message: the channel row, its effective
/// config, the rendered system prompt, and bounded history. Built per
/// message, never cached.
#[derive(Debug, Clone)]
pub struct ChannelContext {
    pub channel: LocalChannel,
    pub config: GroupConfig,
    pub system_prompt: String,
    pub history: Vec<ConversationEntry>,
}

/// Identity text woven into generated system prompts.
#[derive(Debug, Clone, Default)]
pub struct BotIdentity {
    pub identity: Option<String>,
    pub purpose: Option<String>,
}

pub struct MessageRouter {
    gateway: Arc<dyn GatewayApi>,
    channels: Arc<dyn ChannelStore>,
    conversations: Arc<dyn ConversationStore>,
    identity: BotIdentity,
}

impl MessageRouter {
    pub fn new(
        gateway: Arc<dyn GatewayApi>,
        channels: Arc<dyn ChannelStore>,
        conversations: Arc<dyn ConversationStore>,
        identity: BotIdentity,
    ) -> Self {
        Self {
            gateway,
            channels,
            conversations,
            identity,
        }
    }

    /// Run one inbound message through the pipeline.
    ///
    /// Only store failures during channel resolution are `Err`; everything
    /// downstream degrades into an outcome instead.
    pub async fn route(
        &self,
        organization_id: &str,
        message: &GatewayMessage,
    ) -> Result<RouteOutcome, RouteError> {
        if message.from_me {
            debug!(group_id = %message.group_id, "skipping self-authored message");
            return Ok(RouteOutcome::SelfAuthored);
        }

        let Some(channel) = self
            .channels
            .find(organization_id, &message.group_id)
            .await?
        else {
            debug!(group_id = %message.group_id, "no channel for group");
            return Ok(RouteOutcome::UnknownChannel);
        };

        let config = parse_config(&channel);
        if !config.enabled || channel.status != ChannelStatus::Active {
            debug!(channel_id = %channel.id, "channel disabled");
            return Ok(RouteOutcome::ChannelDisabled);
        }

        if config.require_mention && !is_mentioned(message, &config) {
            debug!(channel_id = %channel.id, "mention required and absent");
            return Ok(RouteOutcome::MentionRequired);
        }

        let context = self.build_context(channel, config).await;
        let outcome = self.generate(&context, message).await;
        self.record_analytics(&context, message, &outcome).await;
        Ok(outcome)
    }

    async fn build_context(&self, channel: LocalChannel, config: GroupConfig) -> ChannelContext {
        let limit = config.history_limit.clamp(0, 1000) as u32;
        // History is context, not a gate: an unreadable log reduces quality
        // but never blocks the reply.
        let history = match self.conversations.recent(&channel.id, limit).await {
            Ok(history) => history,
            Err(e) => {
                warn!(channel_id = %channel.id, error = %e, "history read failed");
                Vec::new()
            },
        };
        let system_prompt = build_system_prompt(&config, &self.identity);
        ChannelContext {
            channel,
            config,
            system_prompt,
            history,
        }
    }

    async fn generate(&self, context: &ChannelContext, message: &GatewayMessage) -> RouteOutcome {
        let request = AgentRequest {
            message: message.body.clone(),
            session_key: format!(
                "{}:{}",
                context.channel.organization_id, context.channel.external_group_id
            ),
            system_prompt: (!context.system_prompt.is_empty())
                .then(|| context.system_prompt.clone()),
            history: context
                .history
                .iter()
                .map(|entry| AgentTurn {
                    role: entry.role.clone(),
                    content: entry.body.clone(),
                })
                .collect(),
        };
        match self.gateway.run_agent(&request).await {
            Ok(reply) => match reply.text.filter(|t| !t.trim().is_empty()) {
                Some(text) => {
                    info!(channel_id = %context.channel.id, "agent reply generated");
                    RouteOutcome::Completed { reply: text }
                },
                None => {
                    warn!(channel_id = %context.channel.id, "agent returned empty reply");
                    RouteOutcome::FallbackGenerated {
                        reply: fallback_reply(&message.body).to_string(),
                    }
                },
            },
            Err(e) => {
                warn!(channel_id = %context.channel.id, error = %e, "agent call failed");
                RouteOutcome::FallbackGenerated {
                    reply: fallback_reply(&message.body).to_string(),
                }
            },
        }
    }

    /// Best-effort: a failed append is logged and swallowed, never bubbled.
    async fn record_analytics(
        &self,
        context: &ChannelContext,
        message: &GatewayMessage,
        outcome: &RouteOutcome,
    ) {
        let reply = match outcome {
            RouteOutcome::Completed { reply } | RouteOutcome::FallbackGenerated { reply } => reply,
            _ => return,
        };
        let entries = [
            NewConversationEntry {
                channel_id: context.channel.id.clone(),
                role: "user".into(),
                sender: Some(message.sender.clone()),
                body: message.body.clone(),
            },
            NewConversationEntry {
                channel_id: context.channel.id.clone(),
                role: "assistant".into(),
                sender: None,
                body: reply.clone(),
            },
        ];
        for entry in entries {
            if let Err(e) = self.conversations.append(entry).await {
                warn!(channel_id = %context.channel.id, error = %e, "analytics append failed");
            }
        }
    }
}

fn parse_config(channel: &LocalChannel) -> GroupConfig {
    if channel.config.is_null() {
        return GroupConfig::default();
    }
    match serde_json::from_value(channel.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            warn!(channel_id = %channel.id, error = %e, "unparseable stored config, using defaults");
            GroupConfig::default()
        },
    }
}

/// The native mention flag wins; otherwise any configured pattern matching
/// case-insensitively as a substring counts.
fn is_mentioned(message: &GatewayMessage, config: &GroupConfig) -> bool {
    if message.mentioned {
        return true;
    }
    let body = message.body.to_lowercase();
    config
        .mention_patterns
        .iter()
        .any(|pattern| body.contains(&pattern.to_lowercase()))
}

/// Stored prompt first, then personality directives. Delegates to the config
/// crate's renderer so banding and wording match the config editor exactly.
pub fn build_system_prompt(config: &GroupConfig, identity: &BotIdentity) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(prompt) = &config.system_prompt
        && !prompt.trim().is_empty()
    {
        parts.push(prompt.clone());
    }
    if let Some(personality) = &config.personality {
        parts.push(personality_to_prompt(
            personality,
            identity.identity.as_deref(),
            identity.purpose.as_deref(),
        ));
    }
    parts.join("\n\n")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        botdesk_channels::{
            NewChannel, SqliteChannelStore, SqliteConversationStore, sqlite::init_schema,
        },
        botdesk_config::Personality,
        botdesk_gateway::{AgentReply, Error, RawConfig},
        botdesk_protocol::RemoteGroup,
        serde_json::{Value, json},
        sqlx::SqlitePool,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    #[derive(Default)]
    struct FakeGateway {
        agent_calls: AtomicUsize,
        agent_reply: Mutex<Option<String>>,
        agent_fails: Mutex<bool>,
        last_request: Mutex<Option<AgentRequest>>,
    }

    #[async_trait]
    impl GatewayApi for FakeGateway {
        async fn health(&self) -> Result<Value, Error> {
            Ok(json!({}))
        }

        async fn status(&self) -> Result<Value, Error> {
            Ok(json!({}))
        }

        async fn list_groups(&self) -> Result<Vec<RemoteGroup>, Error> {
            Ok(Vec::new())
        }

        async fn get_config_raw(&self) -> Result<RawConfig, Error> {
            Ok(RawConfig {
                raw: "{}".into(),
                hash: "h".into(),
            })
        }

        async fn patch_config(&self, _raw: String, _base_hash: String) -> Result<(), Error> {
            Ok(())
        }

        async fn get_group_config(&self, _group_id: &str) -> Result<GroupConfig, Error> {
            Ok(GroupConfig::default())
        }

        async fn update_group_config(
            &self,
            _group_id: &str,
            _config: &GroupConfig,
        ) -> Result<(), Error> {
            Ok(())
        }

        async fn send_message(&self, _group_id: &str, _text: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn run_agent(&self, request: &AgentRequest) -> Result<AgentReply, Error> {
            self.agent_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if *self.agent_fails.lock().unwrap() {
                return Err(Error::RequestTimeout {
                    method: "agent".into(),
                });
            }
            Ok(AgentReply {
                text: self.agent_reply.lock().unwrap().clone(),
            })
        }

        async fn presence(&self) -> Result<Value, Error> {
            Ok(json!({}))
        }
    }

    struct Fixture {
        gateway: Arc<FakeGateway>,
        channels: Arc<SqliteChannelStore>,
        conversations: Arc<SqliteConversationStore>,
        router: MessageRouter,
    }

    async fn fixture() -> Fixture {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_schema(&pool).await.unwrap();
        let gateway = Arc::new(FakeGateway::default());
        *gateway.agent_reply.lock().unwrap() = Some("generated reply".into());
        let channels = Arc::new(SqliteChannelStore::new(pool.clone()));
        let conversations = Arc::new(SqliteConversationStore::new(pool));
        let router = MessageRouter::new(
            Arc::clone(&gateway) as Arc<dyn GatewayApi>,
            Arc::clone(&channels) as Arc<dyn ChannelStore>,
            Arc::clone(&conversations) as Arc<dyn ConversationStore>,
            BotIdentity::default(),
        );
        Fixture {
            gateway,
            channels,
            conversations,
            router,
        }
    }

    async fn seed_channel(fx: &Fixture, config: &GroupConfig) -> LocalChannel {
        fx.channels
            .create(NewChannel {
                organization_id: "org1".into(),
                external_group_id: "g1".into(),
                name: "Ops".into(),
                status: ChannelStatus::Active,
                config: serde_json::to_value(config).unwrap(),
            })
            .await
            .unwrap()
    }

    fn message(body: &str) -> GatewayMessage {
        GatewayMessage {
            id: None,
            group_id: "g1".into(),
            sender: "u1".into(),
            sender_name: None,
            body: body.into(),
            from_me: false,
            mentioned: false,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn self_authored_never_generates() {
        let fx = fixture().await;
        seed_channel(&fx, &GroupConfig::default()).await;

        let mut msg = message("hello");
        msg.from_me = true;
        let outcome = fx.router.route("org1", &msg).await.unwrap();

        assert_eq!(outcome, RouteOutcome::SelfAuthored);
        assert_eq!(fx.gateway.agent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_group_stops_the_pipeline() {
        let fx = fixture().await;
        let outcome = fx.router.route("org1", &message("hello")).await.unwrap();
        assert_eq!(outcome, RouteOutcome::UnknownChannel);
        assert_eq!(fx.gateway.agent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disabled_config_stops_the_pipeline() {
        let fx = fixture().await;
        let config = GroupConfig {
            enabled: false,
            ..GroupConfig::default()
        };
        seed_channel(&fx, &config).await;

        let outcome = fx.router.route("org1", &message("hello")).await.unwrap();
        assert_eq!(outcome, RouteOutcome::ChannelDisabled);
    }

    #[tokio::test]
    async fn mention_gate_blocks_and_matches_case_insensitively() {
        let fx = fixture().await;
        let config = GroupConfig {
            require_mention: true,
            mention_patterns: vec!["@Bot".into()],
            ..GroupConfig::default()
        };
        seed_channel(&fx, &config).await;

        let outcome = fx.router.route("org1", &message("hello")).await.unwrap();
        assert_eq!(outcome, RouteOutcome::MentionRequired);

        let outcome = fx
            .router
            .route("org1", &message("hey @BOT can you help"))
            .await
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn native_mention_flag_passes_the_gate() {
        let fx = fixture().await;
        let config = GroupConfig {
            require_mention: true,
            mention_patterns: vec!["@bot".into()],
            ..GroupConfig::default()
        };
        seed_channel(&fx, &config).await;

        let mut msg = message("no pattern in here");
        msg.mentioned = true;
        let outcome = fx.router.route("org1", &msg).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn completed_reply_records_both_turns() {
        let fx = fixture().await;
        let channel = seed_channel(&fx, &GroupConfig::default()).await;

        let outcome = fx.router.route("org1", &message("hello")).await.unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Completed {
                reply: "generated reply".into()
            }
        );

        let entries = fx.conversations.recent(&channel.id, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].role, "user");
        assert_eq!(entries[0].body, "hello");
        assert_eq!(entries[1].role, "assistant");
        assert_eq!(entries[1].body, "generated reply");
    }

    #[tokio::test]
    async fn agent_failure_yields_language_matched_fallback() {
        let fx = fixture().await;
        seed_channel(&fx, &GroupConfig::default()).await;
        *fx.gateway.agent_fails.lock().unwrap() = true;

        let outcome = fx
            .router
            .route("org1", &message("bom dia, preciso de ajuda"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::FallbackGenerated {
                reply: crate::fallback::FALLBACK_PT.into()
            }
        );

        let outcome = fx
            .router
            .route("org1", &message("good morning, I need help"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::FallbackGenerated {
                reply: crate::fallback::FALLBACK_EN.into()
            }
        );
    }

    #[tokio::test]
    async fn system_prompt_prepends_stored_prompt_to_directives() {
        let fx = fixture().await;
        let config = GroupConfig {
            system_prompt: Some("You answer billing questions.".into()),
            personality: Some(Personality {
                formality: 90,
                ..Personality::default()
            }),
            ..GroupConfig::default()
        };
        seed_channel(&fx, &config).await;

        fx.router.route("org1", &message("hello")).await.unwrap();

        let request = fx.gateway.last_request.lock().unwrap().clone().unwrap();
        let prompt = request.system_prompt.unwrap();
        assert!(prompt.starts_with("You answer billing questions."));
        assert!(prompt.contains("strictly formal"));
    }

    #[tokio::test]
    async fn history_is_bounded_by_the_channel_limit() {
        let fx = fixture().await;
        let config = GroupConfig {
            history_limit: 3,
            ..GroupConfig::default()
        };
        let channel = seed_channel(&fx, &config).await;
        for i in 0..10 {
            fx.conversations
                .append(NewConversationEntry {
                    channel_id: channel.id.clone(),
                    role: "user".into(),
                    sender: Some("u1".into()),
                    body: format!("message {i}"),
                })
                .await
                .unwrap();
        }

        fx.router.route("org1", &message("latest")).await.unwrap();

        let request = fx.gateway.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.history.len(), 3);
        assert_eq!(request.history[0].content, "message 7");
        assert_eq!(request.history[2].content, "message 9");
    }
}
