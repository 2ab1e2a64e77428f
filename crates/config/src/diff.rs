//! Structural config diffing for audit collaborators.

use {serde_json::Value, std::collections::BTreeSet};

/// One changed field, with the values on both sides.
///
/// `old`/`new` are `Null` when the field is only present on one side.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ConfigChange {
    /// Dotted field path, e.g. "rateLimit.maxMessagesPerMinute".
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// Compare two configs field by field, producing an ordered change list.
///
/// Objects are recursed into; arrays and scalars are compared as whole
/// values. Fields are visited in lexicographic order so the output is
/// stable for audit logging.
pub fn diff_configs(old: &Value, new: &Value) -> Vec<ConfigChange> {
    let mut changes = Vec::new();
    diff_at("", old, new, &mut changes);
    changes
}

fn diff_at(path: &str, old: &Value, new: &Value, changes: &mut Vec<ConfigChange>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            let keys: BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();
            for key in keys {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                let old_child = old_map.get(key.as_str()).unwrap_or(&Value::Null);
                let new_child = new_map.get(key.as_str()).unwrap_or(&Value::Null);
                diff_at(&child_path, old_child, new_child, changes);
            }
        },
        _ => {
            if old != new {
                changes.push(ConfigChange {
                    field: path.to_string(),
                    old: old.clone(),
                    new: new.clone(),
                });
            }
        },
    }
}
