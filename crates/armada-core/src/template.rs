//! Template expansion: base `data` overlaid with one named option.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{Template, TemplateKind};
use crate::error::{ArmadaError, Result};
use crate::history::RunKind;
use crate::types::EntityId;

/// Key holding the playbook path or module name.
pub const MODE_KEY: &str = "mode";
pub const INVENTORY_KEY: &str = "inventory";
pub const VARS_KEY: &str = "vars";

/// Where a run's inventory comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventorySource {
    /// A stored inventory, subject to a view check.
    Id(EntityId),
    /// Inventory text supplied with the request.
    Inline(String),
}

impl InventorySource {
    /// Numbers and all-digit strings name a stored inventory; any other
    /// string is inline inventory text.
    pub fn parse(value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => n
                .as_u64()
                .map(InventorySource::Id)
                .ok_or_else(|| ArmadaError::validation(format!("invalid inventory id {n}"))),
            Value::String(s) => Ok(Self::parse_str(s)),
            _ => Err(ArmadaError::validation(
                "inventory must be an id or inline inventory text",
            )),
        }
    }

    pub fn parse_str(s: &str) -> Self {
        let trimmed = s.trim();
        match trimmed.parse::<u64>() {
            Ok(id) if !trimmed.is_empty() => InventorySource::Id(id),
            _ => InventorySource::Inline(s.to_string()),
        }
    }
}

/// Effective configuration of one template run.
#[derive(Debug, Clone, PartialEq)]
pub struct Expanded {
    pub kind: RunKind,
    pub mode: String,
    pub inventory: InventorySource,
    /// Run options: merged `vars` plus any other data keys.
    pub options: Map<String, Value>,
}

/// Overlay `options[option]` on `template.data`. Option keys win; `vars`
/// maps are merged key by key. A blank option name selects no option.
pub fn expand(template: &Template, option: Option<&str>) -> Result<Expanded> {
    let mut data = template.data.clone();
    if let Some(name) = option.filter(|name| !name.trim().is_empty()) {
        let overlay = template.options.get(name).ok_or_else(|| {
            ArmadaError::validation(format!(
                "template {} has no option '{name}'",
                template.id
            ))
        })?;
        overlay_data(&mut data, overlay);
    }

    let mode = match data.remove(MODE_KEY) {
        Some(Value::String(s)) if !s.is_empty() => s,
        _ => {
            return Err(ArmadaError::validation(format!(
                "template {} does not define a {MODE_KEY}",
                template.id
            )))
        }
    };
    let inventory = match data.remove(INVENTORY_KEY) {
        Some(v) => InventorySource::parse(&v)?,
        None => {
            return Err(ArmadaError::validation(format!(
                "template {} does not define an {INVENTORY_KEY}",
                template.id
            )))
        }
    };

    let mut options = Map::new();
    if let Some(vars) = data.remove(VARS_KEY) {
        match vars {
            Value::Object(vars) => options.extend(vars),
            Value::Null => {}
            _ => {
                return Err(ArmadaError::validation(format!(
                    "template {}: {VARS_KEY} must be a map",
                    template.id
                )))
            }
        }
    }
    options.extend(data);

    let kind = match template.kind {
        TemplateKind::Task => RunKind::Playbook,
        TemplateKind::Module => RunKind::Module,
    };
    Ok(Expanded {
        kind,
        mode,
        inventory,
        options,
    })
}

fn overlay_data(data: &mut Map<String, Value>, overlay: &Map<String, Value>) {
    for (key, value) in overlay {
        if key == VARS_KEY {
            if let (Some(Value::Object(base)), Value::Object(extra)) = (data.get_mut(key), value) {
                base.extend(extra.clone());
                continue;
            }
        }
        data.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Acl;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn template() -> Template {
        let data = json!({
            "mode": "site.yml",
            "inventory": 4,
            "vars": {"forks": 5, "limit": "web"},
            "verbose": 1,
        });
        let opt1 = json!({"mode": "deploy.yml", "vars": {"limit": "db"}});
        let inline = json!({"inventory": "db01 ansible_host=10.0.0.9\n"});
        Template {
            id: 1,
            name: "deploy".into(),
            kind: TemplateKind::Task,
            project: 1,
            data: data.as_object().cloned().unwrap(),
            options: BTreeMap::from([
                ("opt1".to_string(), opt1.as_object().cloned().unwrap()),
                ("inline".to_string(), inline.as_object().cloned().unwrap()),
            ]),
            acl: Acl::new(1),
            notes: String::new(),
        }
    }

    #[test]
    fn base_data_without_option() {
        let e = expand(&template(), None).unwrap();
        assert_eq!(e.kind, RunKind::Playbook);
        assert_eq!(e.mode, "site.yml");
        assert_eq!(e.inventory, InventorySource::Id(4));
        assert_eq!(e.options["forks"], json!(5));
        assert_eq!(e.options["verbose"], json!(1));
    }

    #[test]
    fn option_overrides_mode_and_merges_vars() {
        let e = expand(&template(), Some("opt1")).unwrap();
        assert_eq!(e.mode, "deploy.yml");
        assert_eq!(e.options["limit"], json!("db"));
        assert_eq!(e.options["forks"], json!(5));
    }

    #[test]
    fn inline_inventory_text_is_not_an_id() {
        let e = expand(&template(), Some("inline")).unwrap();
        assert!(matches!(e.inventory, InventorySource::Inline(_)));
    }

    #[test]
    fn blank_option_runs_base_data() {
        for blank in ["", "   "] {
            let e = expand(&template(), Some(blank)).unwrap();
            assert_eq!(e.mode, "site.yml");
            assert_eq!(e.options["limit"], json!("web"));
        }
    }

    #[test]
    fn unknown_option_is_validation_error() {
        assert!(matches!(
            expand(&template(), Some("nope")),
            Err(ArmadaError::Validation(_))
        ));
    }

    #[test]
    fn missing_mode_is_validation_error() {
        let mut t = template();
        t.data.remove("mode");
        assert!(expand(&t, None).is_err());
    }

    #[test]
    fn inventory_source_parsing() {
        assert_eq!(InventorySource::parse_str(" 12 "), InventorySource::Id(12));
        assert_eq!(
            InventorySource::parse_str("web01,web02"),
            InventorySource::Inline("web01,web02".into())
        );
        assert!(InventorySource::parse(&json!(true)).is_err());
    }
}
