//! Per-entity variables with secret masking on every output path.
//!
//! Stored values are never altered. [`Variables::render`] and [`mask_vars`]
//! replace hidden keys with [`SENTINEL`] in a copy; writes carrying the
//! sentinel itself are refused so a masked value read back by a client can
//! never overwrite the real secret.

use crate::error::{ArmadaError, Result};
use crate::types::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Literal substituted for hidden values in rendered output.
pub const SENTINEL: &str = "[~~ENCRYPTED~~]";

/// Keys a project accepts, with the help text shown to clients.
pub const PROJECT_KEYS: &[(&str, &str)] = &[
    ("repo_type", "Types of repo. Default=\"MANUAL\"."),
    ("repo_sync_on_run", "Sync project by every execution."),
    ("repo_branch", "[Only for GIT repos] Checkout branch on sync."),
    ("repo_password", "[Only for GIT repos] Password to fetch access."),
    ("repo_key", "[Only for GIT repos] Key to fetch access."),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, Value>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key` verbatim.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        validate_key(key)?;
        if contains_sentinel(&value) {
            return Err(ArmadaError::validation(format!(
                "value of '{key}' is the masked placeholder {SENTINEL}; \
                 resend the real value or leave the key out"
            )));
        }
        self.0.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.0.remove(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Raw map, secrets included. Internal use only.
    pub fn get_all(&self) -> &BTreeMap<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Output form for an entity of `kind`.
    pub fn render(&self, kind: EntityKind) -> BTreeMap<String, Value> {
        let hidden = kind.hidden_keys();
        self.0
            .iter()
            .map(|(k, v)| {
                if hidden.contains(&k.as_str()) {
                    (k.clone(), Value::String(SENTINEL.to_string()))
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect()
    }
}

impl FromIterator<(String, Value)> for Variables {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Mask hidden keys of a JSON object in place. Non-objects are left alone.
pub fn mask_vars(vars: &mut Value, hidden: &[&str]) {
    if let Value::Object(map) = vars {
        for key in hidden {
            if let Some(v) = map.get_mut(*key) {
                *v = Value::String(SENTINEL.to_string());
            }
        }
    }
}

/// True if the sentinel literal appears anywhere inside `value`.
pub fn contains_sentinel(value: &Value) -> bool {
    match value {
        Value::String(s) => s == SENTINEL,
        Value::Array(items) => items.iter().any(contains_sentinel),
        Value::Object(map) => map.values().any(contains_sentinel),
        _ => false,
    }
}

/// Project variables are limited to the repository settings in [`PROJECT_KEYS`].
pub fn check_project_key(key: &str) -> Result<()> {
    if PROJECT_KEYS.iter().any(|(k, _)| *k == key) {
        Ok(())
    } else {
        let allowed: Vec<&str> = PROJECT_KEYS.iter().map(|(k, _)| *k).collect();
        Err(ArmadaError::validation(format!(
            "'{key}' is not a valid project variable; expected one of: {}",
            allowed.join(", ")
        )))
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(ArmadaError::validation("variable key must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_masks_hidden_and_passes_others() {
        let mut vars = Variables::new();
        vars.set("repo_password", json!("secret")).unwrap();
        vars.set("repo_branch", json!("main")).unwrap();

        let rendered = vars.render(EntityKind::Project);
        assert_eq!(rendered["repo_password"], json!(SENTINEL));
        assert_eq!(rendered["repo_branch"], json!("main"));
        // stored value untouched
        assert_eq!(vars.get("repo_password"), Some(&json!("secret")));
        assert_eq!(vars.get_all()["repo_password"], json!("secret"));
    }

    #[test]
    fn hidden_keys_are_per_kind() {
        let mut vars = Variables::new();
        vars.set("repo_password", json!("secret")).unwrap();
        // hosts do not hide repo_password
        assert_eq!(vars.render(EntityKind::Host)["repo_password"], json!("secret"));
    }

    #[test]
    fn structured_values_are_stored_verbatim() {
        let mut vars = Variables::new();
        vars.set("ports", json!([22, 80])).unwrap();
        assert_eq!(vars.get("ports"), Some(&json!([22, 80])));
    }

    #[test]
    fn sentinel_writes_rejected() {
        let mut vars = Variables::new();
        vars.set("ansible_ssh_pass", json!("real")).unwrap();
        let err = vars.set("ansible_ssh_pass", json!(SENTINEL)).unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(_)));
        assert_eq!(vars.get("ansible_ssh_pass"), Some(&json!("real")));

        let nested = json!({"inner": [SENTINEL]});
        assert!(vars.set("blob", nested).is_err());
    }

    #[test]
    fn empty_key_rejected() {
        assert!(Variables::new().set("  ", json!(1)).is_err());
    }

    #[test]
    fn mask_vars_only_touches_objects() {
        let mut v = json!({"private-key": "k", "timeout": 5});
        mask_vars(&mut v, EntityKind::Template.hidden_keys());
        assert_eq!(v["private-key"], json!(SENTINEL));
        assert_eq!(v["timeout"], json!(5));

        let mut s = json!("private-key");
        mask_vars(&mut s, EntityKind::Template.hidden_keys());
        assert_eq!(s, json!("private-key"));
    }

    #[test]
    fn project_keys_restricted() {
        assert!(check_project_key("repo_branch").is_ok());
        assert!(matches!(
            check_project_key("ansible_user"),
            Err(ArmadaError::Validation(_))
        ));
    }
}
