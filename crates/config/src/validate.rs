//! Group config validation.
//!
//! Collects every violation rather than failing on the first, so the
//! dashboard can surface all invalid fields in one round trip. Errors block
//! the write entirely; warnings do not.

use crate::schema::GroupConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    /// Dotted field path, e.g. "personality.formality".
    pub field: String,
    pub message: String,
}

/// Result of validating a group config.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            severity: Severity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    fn warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(Issue {
            severity: Severity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// Validate a group config, reporting every violated field.
///
/// Sliders outside [0,100] are errors, never silently clamped.
pub fn validate_group_config(config: &GroupConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    match &config.personality {
        Some(personality) => {
            for (name, value) in personality.sliders() {
                if !(0..=100).contains(&value) {
                    report.error(
                        format!("personality.{name}"),
                        format!("{name} must be between 0 and 100, got {value}"),
                    );
                }
            }
        },
        None => {
            report.warning("personality", "no personality configured; defaults apply");
        },
    }

    for (i, pattern) in config.mention_patterns.iter().enumerate() {
        if let Err(e) = regex::RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
        {
            report.error(
                format!("mentionPatterns[{i}]"),
                format!("pattern does not compile: {e}"),
            );
        }
    }

    if !(0..=1000).contains(&config.history_limit) {
        report.error(
            "historyLimit",
            format!(
                "history limit must be between 0 and 1000, got {}",
                config.history_limit
            ),
        );
    }

    if let Some(rate_limit) = &config.rate_limit
        && rate_limit.max_messages_per_minute < 1
    {
        report.error(
            "rateLimit.maxMessagesPerMinute",
            format!(
                "must be at least 1, got {}",
                rate_limit.max_messages_per_minute
            ),
        );
    }

    if config.require_mention && config.mention_patterns.is_empty() {
        report.warning(
            "mentionPatterns",
            "requireMention is set but no mention patterns are configured",
        );
    }

    report
}
