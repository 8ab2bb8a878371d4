//! Stored configuration objects.
//!
//! Capabilities are embedded components: an entity that carries an [`Acl`]
//! implements [`Guarded`], one that carries [`Variables`] implements
//! [`WithVars`]. Containment edges between groups, hosts and inventories live
//! in [`crate::hierarchy::Hierarchy`], not on the entities.

use crate::acl::Acl;
use crate::error::{ArmadaError, Result};
use crate::types::{EntityId, EntityKind, EntityRef};
use crate::variables::{mask_vars, Variables};
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

pub trait Entity: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;
    fn name(&self) -> &str;

    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(Self::KIND, self.id())
    }

    /// Client-facing representation. Secrets are masked.
    fn view(&self) -> Value;
}

pub trait Guarded {
    fn acl(&self) -> &Acl;
    fn acl_mut(&mut self) -> &mut Acl;
}

pub trait WithVars {
    fn vars(&self) -> &Variables;
    fn vars_mut(&mut self) -> &mut Variables;
}

macro_rules! guarded_with_vars {
    ($($ty:ty),+) => {
        $(
            impl Guarded for $ty {
                fn acl(&self) -> &Acl {
                    &self.acl
                }
                fn acl_mut(&mut self) -> &mut Acl {
                    &mut self.acl
                }
            }

            impl WithVars for $ty {
                fn vars(&self) -> &Variables {
                    &self.vars
                }
                fn vars_mut(&mut self) -> &mut Variables {
                    &mut self.vars
                }
            }
        )+
    };
}

guarded_with_vars!(Host, Group, Inventory, Project);

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HostType {
    #[default]
    Host,
    /// A name pattern such as `web[01:10]` expanding to many hosts.
    Range,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: EntityId,
    pub name: String,
    #[serde(default, rename = "type")]
    pub host_type: HostType,
    pub acl: Acl,
    #[serde(default)]
    pub vars: Variables,
    #[serde(default)]
    pub notes: String,
}

impl Entity for Host {
    const KIND: EntityKind = EntityKind::Host;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "type": self.host_type,
            "owner": self.acl.owner,
            "vars": self.vars.render(Self::KIND),
            "notes": self.notes,
        })
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: EntityId,
    pub name: String,
    /// True: holds subgroups. False: holds hosts. Fixed at creation.
    pub children: bool,
    pub acl: Acl,
    #[serde(default)]
    pub vars: Variables,
    #[serde(default)]
    pub notes: String,
}

impl Entity for Group {
    const KIND: EntityKind = EntityKind::Group;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "children": self.children,
            "owner": self.acl.owner,
            "vars": self.vars.render(Self::KIND),
            "notes": self.notes,
        })
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub id: EntityId,
    pub name: String,
    pub acl: Acl,
    #[serde(default)]
    pub vars: Variables,
    #[serde(default)]
    pub notes: String,
}

impl Entity for Inventory {
    const KIND: EntityKind = EntityKind::Inventory;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "owner": self.acl.owner,
            "vars": self.vars.render(Self::KIND),
            "notes": self.notes,
        })
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    #[default]
    New,
    WaitSync,
    Sync,
    Ok,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub branch: String,
    /// Inventories attached to this project.
    #[serde(default)]
    pub inventories: BTreeSet<EntityId>,
    pub acl: Acl,
    #[serde(default)]
    pub vars: Variables,
    #[serde(default)]
    pub notes: String,
}

impl Entity for Project {
    const KIND: EntityKind = EntityKind::Project;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "repository": self.repository,
            "status": self.status,
            "revision": self.revision,
            "branch": self.branch,
            "inventories": self.inventories,
            "owner": self.acl.owner,
            "vars": self.vars.render(Self::KIND),
            "notes": self.notes,
        })
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemplateKind {
    Task,
    Module,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: EntityId,
    pub name: String,
    pub kind: TemplateKind,
    pub project: EntityId,
    /// Base configuration: `mode`, `inventory`, `vars` and extra run options.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Named overrides applied on top of `data` at execution.
    #[serde(default)]
    pub options: BTreeMap<String, Map<String, Value>>,
    pub acl: Acl,
    #[serde(default)]
    pub notes: String,
}

impl Guarded for Template {
    fn acl(&self) -> &Acl {
        &self.acl
    }

    fn acl_mut(&mut self) -> &mut Acl {
        &mut self.acl
    }
}

impl Entity for Template {
    const KIND: EntityKind = EntityKind::Template;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> Value {
        let data = masked_run_data(&self.data);
        let options: BTreeMap<String, Value> = self
            .options
            .iter()
            .map(|(name, opt)| (name.clone(), masked_run_data(opt)))
            .collect();
        json!({
            "id": self.id,
            "name": self.name,
            "kind": self.kind,
            "project": self.project,
            "data": data,
            "options": options,
            "owner": self.acl.owner,
            "notes": self.notes,
        })
    }
}

/// Template data and option maps: top-level keys become run options, so
/// they are masked alongside the nested `vars` map.
fn masked_run_data(data: &Map<String, Value>) -> Value {
    let hidden = EntityKind::Template.hidden_keys();
    let mut data = Value::Object(data.clone());
    mask_vars(&mut data, hidden);
    if let Some(vars) = data.get_mut("vars") {
        mask_vars(vars, hidden);
    }
    data
}

// ---------------------------------------------------------------------------
// PeriodicTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskKind {
    Template,
    Playbook,
    Module,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScheduleType {
    /// `schedule` is a number of seconds.
    Interval,
    /// `schedule` is a five-field crontab expression.
    Crontab,
}

/// A scheduled run. Permissions are governed by the owning project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicTask {
    pub id: EntityId,
    pub name: String,
    pub project: EntityId,
    pub kind: TaskKind,
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    pub schedule: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub inventory: String,
    #[serde(default)]
    pub template: Option<EntityId>,
    #[serde(default)]
    pub template_opt: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub vars: Variables,
    #[serde(default)]
    pub notes: String,
}

fn default_enabled() -> bool {
    true
}

impl WithVars for PeriodicTask {
    fn vars(&self) -> &Variables {
        &self.vars
    }

    fn vars_mut(&mut self) -> &mut Variables {
        &mut self.vars
    }
}

impl PeriodicTask {
    /// Field-level checks that don't need the rest of the store.
    pub fn validate(&self) -> Result<()> {
        match self.kind {
            TaskKind::Template => {
                if !self.mode.is_empty() || !self.inventory.is_empty() {
                    return Err(ArmadaError::Validation(
                        "TEMPLATE tasks take mode and inventory from their template; \
                         leave both empty"
                            .into(),
                    ));
                }
                if self.template.is_none() {
                    return Err(ArmadaError::Validation(
                        "TEMPLATE tasks require a template".into(),
                    ));
                }
            }
            TaskKind::Playbook | TaskKind::Module => {
                if self.mode.is_empty() {
                    return Err(ArmadaError::Validation(format!(
                        "{:?} tasks require a mode",
                        self.kind
                    )));
                }
                if self.inventory.is_empty() {
                    return Err(ArmadaError::Validation(format!(
                        "{:?} tasks require an inventory",
                        self.kind
                    )));
                }
                if self.template.is_some() || self.template_opt.is_some() {
                    return Err(ArmadaError::Validation(
                        "only TEMPLATE tasks may reference a template".into(),
                    ));
                }
            }
        }
        validate_schedule(self.schedule_type, &self.schedule)
    }
}

impl Entity for PeriodicTask {
    const KIND: EntityKind = EntityKind::PeriodicTask;

    fn id(&self) -> EntityId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "project": self.project,
            "kind": self.kind,
            "type": self.schedule_type,
            "schedule": self.schedule,
            "mode": self.mode,
            "inventory": self.inventory,
            "template": self.template,
            "template_opt": self.template_opt,
            "enabled": self.enabled,
            "vars": self.vars.render(Self::KIND),
            "notes": self.notes,
        })
    }
}

static CRON_FIELD_RE: OnceLock<Regex> = OnceLock::new();

fn cron_field_re() -> &'static Regex {
    CRON_FIELD_RE.get_or_init(|| Regex::new(r"^(\*|\d+(-\d+)?)(/\d+)?(,(\*|\d+(-\d+)?)(/\d+)?)*$").unwrap())
}

pub fn validate_schedule(schedule_type: ScheduleType, schedule: &str) -> Result<()> {
    match schedule_type {
        ScheduleType::Interval => match schedule.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(()),
            _ => Err(ArmadaError::Validation(format!(
                "interval schedule must be a positive number of seconds, got '{schedule}'"
            ))),
        },
        ScheduleType::Crontab => {
            let fields: Vec<&str> = schedule.split_whitespace().collect();
            if fields.len() != 5 || !fields.iter().all(|f| cron_field_re().is_match(f)) {
                return Err(ArmadaError::Validation(format!(
                    "crontab schedule must have five fields, got '{schedule}'"
                )));
            }
            Ok(())
        }
    }
}
