//! Group config schema types.
//!
//! Wire names are camelCase to match what the gateway stores in its raw
//! config text and what the dashboard persists per channel.

use serde::{Deserialize, Serialize};

/// Per-group behavior configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupConfig {
    /// Whether the bot responds in this group at all.
    pub enabled: bool,
    /// When true, the bot only responds to messages that mention it.
    pub require_mention: bool,
    /// Case-insensitive patterns that count as a mention.
    pub mention_patterns: Vec<String>,
    /// How many prior messages to feed into response generation. 0–1000.
    pub history_limit: i64,
    pub personality: Option<Personality>,
    /// Explicitly stored system prompt, prepended to personality directives.
    pub system_prompt: Option<String>,
    pub features: FeatureToggles,
    pub rate_limit: Option<RateLimitHints>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_mention: false,
            mention_patterns: Vec::new(),
            history_limit: 50,
            personality: None,
            system_prompt: None,
            features: FeatureToggles::default(),
            rate_limit: None,
        }
    }
}

/// Five 0–100 style sliders plus optional free-text overrides.
///
/// Sliders are `i64` so out-of-range values survive deserialization and get
/// *reported* by validation instead of being silently clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Personality {
    pub formality: i64,
    pub verbosity: i64,
    pub creativity: i64,
    pub empathy: i64,
    pub humor: i64,
    pub tone: Option<String>,
    pub language: Option<String>,
    pub custom_instructions: Option<String>,
    pub extra_instructions: Option<String>,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            formality: 50,
            verbosity: 50,
            creativity: 50,
            empathy: 50,
            humor: 50,
            tone: None,
            language: None,
            custom_instructions: None,
            extra_instructions: None,
        }
    }
}

impl Personality {
    /// The five sliders as `(field name, value)` pairs, in prompt order.
    pub fn sliders(&self) -> [(&'static str, i64); 5] {
        [
            ("formality", self.formality),
            ("verbosity", self.verbosity),
            ("creativity", self.creativity),
            ("empathy", self.empathy),
            ("humor", self.humor),
        ]
    }
}

/// Optional dashboard feature toggles carried with the group config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureToggles {
    pub quick_actions: bool,
    pub knowledge_base: bool,
    pub analytics: bool,
}

/// Rate-limit hints forwarded to the outer rate-limiting layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitHints {
    pub max_messages_per_minute: i64,
    pub cooldown_seconds: Option<i64>,
}

impl Default for RateLimitHints {
    fn default() -> Self {
        Self {
            max_messages_per_minute: 10,
            cooldown_seconds: None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_open() {
        let cfg = GroupConfig::default();
        assert!(cfg.enabled);
        assert!(!cfg.require_mention);
        assert_eq!(cfg.history_limit, 50);
    }

    #[test]
    fn camel_case_wire_names() {
        let cfg: GroupConfig = serde_json::from_str(
            r#"{"requireMention":true,"mentionPatterns":["@bot"],"historyLimit":20}"#,
        )
        .unwrap();
        assert!(cfg.require_mention);
        assert_eq!(cfg.mention_patterns, vec!["@bot"]);
        assert_eq!(cfg.history_limit, 20);
    }

    #[test]
    fn out_of_range_sliders_survive_deserialization() {
        let p: Personality = serde_json::from_str(r#"{"formality":150}"#).unwrap();
        assert_eq!(p.formality, 150);
    }
}
