//! Wildcard/per-group config merge.
//!
//! The gateway's raw config keeps a `"*"` entry with organization-wide
//! defaults plus optional per-group entries. The merge is intentionally a
//! flat, shallow, key-by-key override: a key present in the override
//! replaces the wildcard value wholesale, nested structures included.

use serde_json::Value;

/// Merge a wildcard default config with a per-group override.
///
/// Top-level keys from `overrides` replace the corresponding wildcard keys;
/// nested objects (rate-limit blocks and the like) are never deep-merged.
pub fn merge_group_config(wildcard: &Value, overrides: &Value) -> Value {
    match (wildcard, overrides) {
        (Value::Object(base), Value::Object(over)) => {
            let mut merged = base.clone();
            for (key, value) in over {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        },
        (base, Value::Null) => base.clone(),
        (_, over) => over.clone(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn override_wins_key_by_key() {
        let wildcard = json!({"requireMention": true, "historyLimit": 50});
        let over = json!({"historyLimit": 10});
        let merged = merge_group_config(&wildcard, &over);
        assert_eq!(merged["requireMention"], json!(true));
        assert_eq!(merged["historyLimit"], json!(10));
    }

    #[test]
    fn nested_blocks_replaced_wholesale_not_deep_merged() {
        let wildcard = json!({"rateLimit": {"maxMessagesPerMinute": 10, "cooldownSeconds": 30}});
        let over = json!({"rateLimit": {"maxMessagesPerMinute": 5}});
        let merged = merge_group_config(&wildcard, &over);
        // cooldownSeconds from the wildcard must NOT leak through.
        assert_eq!(merged["rateLimit"], json!({"maxMessagesPerMinute": 5}));
    }

    #[test]
    fn null_override_keeps_wildcard() {
        let wildcard = json!({"enabled": true});
        let merged = merge_group_config(&wildcard, &Value::Null);
        assert_eq!(merged, wildcard);
    }

    #[test]
    fn missing_wildcard_yields_override() {
        let over = json!({"enabled": false});
        let merged = merge_group_config(&Value::Null, &over);
        assert_eq!(merged, over);
    }
}
