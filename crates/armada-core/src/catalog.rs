//! Entity lifecycle, variables and hierarchy edits, with authorization.
//!
//! Every operation reads or mutates through the [`Store`], checking roles on
//! the same snapshot it changes. Role requirements:
//!
//! | operation                         | role on target      |
//! |-----------------------------------|---------------------|
//! | get, list, variables, all_hosts   | EXECUTOR            |
//! | update, set/remove variable, link | EDITOR              |
//! | delete                            | MASTER              |
//!
//! Linking a member into a container also needs EXECUTOR on the member.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::acl::Acl;
use crate::entity::{
    Entity, Group, Host, HostType, Inventory, PeriodicTask, Project, ProjectStatus, ScheduleType,
    TaskKind, Template, TemplateKind,
};
use crate::error::{ArmadaError, Result};
use crate::hooks::{Mutation, MutationKind};
use crate::identity::Identity;
use crate::paths::validate_name;
use crate::permissions::{authorize, viewable_by};
use crate::store::{Snapshot, Store};
use crate::template::{expand, InventorySource};
use crate::types::{EntityId, EntityKind, EntityRef, Role};
use crate::variables::{check_project_key, contains_sentinel, SENTINEL};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewHost {
    pub name: String,
    #[serde(default, rename = "type")]
    pub host_type: HostType,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub children: bool,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewInventory {
    pub name: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub kind: TemplateKind,
    pub project: EntityId,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub options: BTreeMap<String, Map<String, Value>>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPeriodicTask {
    pub name: String,
    /// Ignored for TEMPLATE tasks, which take the template's project.
    #[serde(default)]
    pub project: Option<EntityId>,
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
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub notes: String,
}

fn enabled_by_default() -> bool {
    true
}

/// Partial update. Fields a kind does not have are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Patch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Groups only. Accepted only when equal to the current value.
    #[serde(default)]
    pub children: Option<bool>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default)]
    pub options: Option<BTreeMap<String, Map<String, Value>>>,
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Catalog {
    store: Arc<Store>,
}

impl Catalog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    pub fn create_host(&self, who: &Identity, input: NewHost) -> Result<Host> {
        validate_name(&input.name)?;
        self.create(who, EntityKind::Host, |snap, id| {
            let host = Host {
                id,
                name: input.name,
                host_type: input.host_type,
                acl: Acl::new(who.user_id),
                vars: Default::default(),
                notes: input.notes,
            };
            snap.insert(host.clone());
            Ok(host)
        })
    }

    pub fn create_group(&self, who: &Identity, input: NewGroup) -> Result<Group> {
        validate_name(&input.name)?;
        self.create(who, EntityKind::Group, |snap, id| {
            snap.hierarchy.register_group(id, input.children)?;
            let group = Group {
                id,
                name: input.name,
                children: input.children,
                acl: Acl::new(who.user_id),
                vars: Default::default(),
                notes: input.notes,
            };
            snap.insert(group.clone());
            Ok(group)
        })
    }

    pub fn create_inventory(&self, who: &Identity, input: NewInventory) -> Result<Inventory> {
        validate_name(&input.name)?;
        self.create(who, EntityKind::Inventory, |snap, id| {
            snap.hierarchy.register_inventory(id);
            let inventory = Inventory {
                id,
                name: input.name,
                acl: Acl::new(who.user_id),
                vars: Default::default(),
                notes: input.notes,
            };
            snap.insert(inventory.clone());
            Ok(inventory)
        })
    }

    pub fn create_project(&self, who: &Identity, input: NewProject) -> Result<Project> {
        validate_name(&input.name)?;
        self.create(who, EntityKind::Project, |snap, id| {
            let project = Project {
                id,
                name: input.name,
                repository: input.repository,
                status: ProjectStatus::New,
                revision: String::new(),
                branch: input.branch,
                inventories: BTreeSet::new(),
                acl: Acl::new(who.user_id),
                vars: Default::default(),
                notes: input.notes,
            };
            snap.insert(project.clone());
            Ok(project)
        })
    }

    /// Requires EDITOR on the project.
    pub fn create_template(&self, who: &Identity, input: NewTemplate) -> Result<Template> {
        validate_name(&input.name)?;
        self.create(who, EntityKind::Template, |snap, id| {
            authorize(snap, EntityRef::project(input.project), who, Role::Editor)?;
            let template = Template {
                id,
                name: input.name,
                kind: input.kind,
                project: input.project,
                data: input.data,
                options: input.options,
                acl: Acl::new(who.user_id),
                notes: input.notes,
            };
            validate_template(&template)?;
            snap.insert(template.clone());
            Ok(template)
        })
    }

    /// Requires EDITOR on the owning project.
    pub fn create_periodic_task(
        &self,
        who: &Identity,
        input: NewPeriodicTask,
    ) -> Result<PeriodicTask> {
        validate_name(&input.name)?;
        self.create(who, EntityKind::PeriodicTask, |snap, id| {
            let project = match (input.kind, input.template) {
                (TaskKind::Template, Some(tid)) => snap.get::<Template>(tid)?.project,
                (_, _) => input.project.ok_or_else(|| {
                    ArmadaError::validation("periodic task requires a project")
                })?,
            };
            authorize(snap, EntityRef::project(project), who, Role::Editor)?;
            let task = PeriodicTask {
                id,
                name: input.name,
                project,
                kind: input.kind,
                schedule_type: input.schedule_type,
                schedule: input.schedule,
                mode: input.mode,
                inventory: input.inventory,
                template: input.template,
                template_opt: input.template_opt,
                enabled: input.enabled,
                vars: Default::default(),
                notes: input.notes,
            };
            validate_periodic_task(snap, &task)?;
            snap.insert(task.clone());
            Ok(task)
        })
    }

    fn create<T, F>(&self, who: &Identity, kind: EntityKind, f: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot, EntityId) -> Result<T>,
    {
        let mut created = 0;
        // Id 0: the real id is assigned inside the transaction.
        let mutation_target = EntityRef::new(kind, 0);
        let out = self.store.mutate(
            Mutation::new(Some(who.user_id), mutation_target, MutationKind::Create),
            |snap| {
                let id = snap.next_id();
                created = id;
                f(snap, id)
            },
        )?;
        tracing::info!(actor = who.user_id, entity = %EntityRef::new(kind, created), "created");
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Read
    // -----------------------------------------------------------------------

    /// Masked view of one entity.
    pub fn get(&self, who: &Identity, target: EntityRef) -> Result<Value> {
        let snap = self.store.read();
        authorize(&snap, target, who, Role::Executor)?;
        snap.view(target)
    }

    /// Masked views of every entity of `kind` the caller can see.
    pub fn list(&self, who: &Identity, kind: EntityKind) -> Result<Vec<Value>> {
        let snap = self.store.read();
        let mut out = Vec::new();
        for id in snap.ids(kind) {
            let target = EntityRef::new(kind, id);
            let visible = snap
                .governing_acl(target)
                .map(|acl| viewable_by(acl, who))
                .unwrap_or(false);
            if visible {
                out.push(snap.view(target)?);
            }
        }
        Ok(out)
    }

    /// History of one project, newest first.
    pub fn project_history(&self, who: &Identity, project: EntityId) -> Result<Vec<Value>> {
        let snap = self.store.read();
        authorize(&snap, EntityRef::project(project), who, Role::Executor)?;
        Ok(snap
            .history
            .values()
            .rev()
            .filter(|h| h.project == project)
            .map(|h| h.view())
            .collect())
    }

    // -----------------------------------------------------------------------
    // Update / delete
    // -----------------------------------------------------------------------

    pub fn update(&self, who: &Identity, target: EntityRef, patch: Patch) -> Result<Value> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        let mutation = Mutation::new(Some(who.user_id), target, MutationKind::Update);
        self.store.mutate(mutation, |snap| {
            authorize(snap, target, who, Role::Editor)?;
            apply_patch(snap, target, patch)?;
            snap.view(target)
        })
    }

    /// Delete `target` and reconcile everything that referenced it.
    pub fn delete(&self, who: &Identity, target: EntityRef) -> Result<()> {
        let mutation = Mutation::new(Some(who.user_id), target, MutationKind::Delete);
        self.store.mutate(mutation, |snap| {
            authorize(snap, target, who, Role::Master)?;
            match target.kind {
                EntityKind::Host => {
                    snap.remove::<Host>(target.id)?;
                    snap.hierarchy.forget_host(target.id);
                }
                EntityKind::Group => {
                    snap.remove::<Group>(target.id)?;
                    snap.hierarchy.forget_group(target.id);
                }
                EntityKind::Inventory => {
                    snap.remove::<Inventory>(target.id)?;
                    snap.hierarchy.forget_inventory(target.id);
                    for project in snap.projects.values_mut() {
                        project.inventories.remove(&target.id);
                    }
                }
                EntityKind::Project => {
                    snap.remove::<Project>(target.id)?;
                    snap.templates.retain(|_, t| t.project != target.id);
                    snap.periodic_tasks.retain(|_, p| p.project != target.id);
                }
                EntityKind::Template => {
                    snap.remove::<Template>(target.id)?;
                    snap.periodic_tasks
                        .retain(|_, p| p.template != Some(target.id));
                }
                EntityKind::PeriodicTask => {
                    snap.remove::<PeriodicTask>(target.id)?;
                }
                EntityKind::History => {
                    if !snap.history(target.id)?.is_terminal() {
                        return Err(ArmadaError::conflict(format!(
                            "{target} is still running"
                        )));
                    }
                    snap.remove_history(target.id)?;
                }
            }
            Ok(())
        })?;
        tracing::info!(actor = who.user_id, entity = %target, "deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    /// Rendered (masked) variables.
    pub fn variables(&self, who: &Identity, target: EntityRef) -> Result<BTreeMap<String, Value>> {
        let snap = self.store.read();
        authorize(&snap, target, who, Role::Executor)?;
        Ok(snap.vars(target)?.render(target.kind))
    }

    pub fn set_variable(
        &self,
        who: &Identity,
        target: EntityRef,
        key: &str,
        value: Value,
    ) -> Result<()> {
        if target.kind == EntityKind::Project {
            check_project_key(key)?;
        }
        let mutation = Mutation::new(
            Some(who.user_id),
            target,
            MutationKind::SetVariable(key.to_string()),
        );
        self.store.mutate(mutation, |snap| {
            authorize(snap, target, who, Role::Editor)?;
            snap.vars_mut(target)?.set(key, value)
        })
    }

    /// Returns whether the key existed.
    pub fn remove_variable(&self, who: &Identity, target: EntityRef, key: &str) -> Result<bool> {
        let mutation = Mutation::new(
            Some(who.user_id),
            target,
            MutationKind::RemoveVariable(key.to_string()),
        );
        self.store.mutate(mutation, |snap| {
            authorize(snap, target, who, Role::Editor)?;
            Ok(snap.vars_mut(target)?.remove(key))
        })
    }

    // -----------------------------------------------------------------------
    // Hierarchy
    // -----------------------------------------------------------------------

    pub fn add_subgroup(&self, who: &Identity, parent: EntityId, child: EntityId) -> Result<()> {
        let (container, member) = (EntityRef::group(parent), EntityRef::group(child));
        self.link(who, container, member, |snap| {
            snap.hierarchy.add_subgroup(parent, child)
        })
    }

    pub fn remove_subgroup(&self, who: &Identity, parent: EntityId, child: EntityId) -> Result<bool> {
        let (container, member) = (EntityRef::group(parent), EntityRef::group(child));
        self.unlink(who, container, member, |snap| {
            snap.hierarchy.remove_subgroup(parent, child)
        })
    }

    /// `container` is a group or an inventory.
    pub fn add_host(&self, who: &Identity, container: EntityRef, host: EntityId) -> Result<()> {
        self.link(who, container, EntityRef::host(host), |snap| {
            snap.hierarchy.add_host(container, host)
        })
    }

    pub fn remove_host(&self, who: &Identity, container: EntityRef, host: EntityId) -> Result<bool> {
        self.unlink(who, container, EntityRef::host(host), |snap| {
            snap.hierarchy.remove_host(container, host)
        })
    }

    pub fn add_group(&self, who: &Identity, inventory: EntityId, group: EntityId) -> Result<()> {
        let (container, member) = (EntityRef::inventory(inventory), EntityRef::group(group));
        self.link(who, container, member, |snap| {
            snap.hierarchy.add_group(inventory, group)
        })
    }

    pub fn remove_group(&self, who: &Identity, inventory: EntityId, group: EntityId) -> Result<bool> {
        let (container, member) = (EntityRef::inventory(inventory), EntityRef::group(group));
        self.unlink(who, container, member, |snap| {
            snap.hierarchy.remove_group(inventory, group)
        })
    }

    pub fn attach_inventory(&self, who: &Identity, project: EntityId, inventory: EntityId) -> Result<()> {
        let (container, member) = (EntityRef::project(project), EntityRef::inventory(inventory));
        self.link(who, container, member, |snap| {
            snap.get_mut::<Project>(project)?.inventories.insert(inventory);
            Ok(())
        })
    }

    pub fn detach_inventory(&self, who: &Identity, project: EntityId, inventory: EntityId) -> Result<bool> {
        let (container, member) = (EntityRef::project(project), EntityRef::inventory(inventory));
        self.unlink(who, container, member, |snap| {
            Ok(snap.get_mut::<Project>(project)?.inventories.remove(&inventory))
        })
    }

    /// Masked views of every host reachable from a group or inventory.
    pub fn all_hosts(&self, who: &Identity, container: EntityRef) -> Result<Vec<Value>> {
        let snap = self.store.read();
        authorize(&snap, container, who, Role::Executor)?;
        snap.hierarchy
            .all_hosts(container)?
            .into_iter()
            .map(|id| Ok(snap.get::<Host>(id)?.view()))
            .collect()
    }

    fn link<F>(&self, who: &Identity, container: EntityRef, member: EntityRef, f: F) -> Result<()>
    where
        F: FnOnce(&mut Snapshot) -> Result<()>,
    {
        let mutation = Mutation::new(Some(who.user_id), container, MutationKind::Link(member));
        self.store.mutate(mutation, |snap| {
            authorize(snap, container, who, Role::Editor)?;
            authorize(snap, member, who, Role::Executor)?;
            f(snap)
        })?;
        tracing::info!(actor = who.user_id, container = %container, member = %member, "linked");
        Ok(())
    }

    fn unlink<F>(&self, who: &Identity, container: EntityRef, member: EntityRef, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Snapshot) -> Result<bool>,
    {
        let mutation = Mutation::new(Some(who.user_id), container, MutationKind::Unlink(member));
        self.store.mutate(mutation, |snap| {
            authorize(snap, container, who, Role::Editor)?;
            f(snap)
        })
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

fn validate_template(template: &Template) -> Result<()> {
    let data = Value::Object(template.data.clone());
    if contains_sentinel(&data)
        || template
            .options
            .values()
            .any(|o| contains_sentinel(&Value::Object(o.clone())))
    {
        return Err(ArmadaError::validation(format!(
            "template data contains the masked placeholder {SENTINEL}"
        )));
    }
    expand(template, None)?;
    for name in template.options.keys() {
        expand(template, Some(name))?;
    }
    Ok(())
}

fn validate_periodic_task(snap: &Snapshot, task: &PeriodicTask) -> Result<()> {
    task.validate()?;
    snap.get::<Project>(task.project)?;
    if let Some(tid) = task.template {
        let template = snap.get::<Template>(tid)?;
        if let Some(opt) = &task.template_opt {
            if !template.options.contains_key(opt) {
                return Err(ArmadaError::validation(format!(
                    "template {tid} has no option '{opt}'"
                )));
            }
        }
    }
    if let InventorySource::Id(inv) = InventorySource::parse_str(&task.inventory) {
        snap.get::<Inventory>(inv)?;
    }
    Ok(())
}

fn apply_patch(snap: &mut Snapshot, target: EntityRef, patch: Patch) -> Result<()> {
    let unsupported = |field: &str| {
        ArmadaError::validation(format!("{} has no field '{field}'", target.kind))
    };
    let group_only = patch.children.is_some();
    let task_only = patch.enabled.is_some() || patch.schedule.is_some();
    let template_only = patch.data.is_some() || patch.options.is_some();

    if group_only && target.kind != EntityKind::Group {
        return Err(unsupported("children"));
    }
    if task_only && target.kind != EntityKind::PeriodicTask {
        return Err(unsupported("enabled/schedule"));
    }
    if template_only && target.kind != EntityKind::Template {
        return Err(unsupported("data/options"));
    }

    match target.kind {
        EntityKind::Host => {
            let host = snap.get_mut::<Host>(target.id)?;
            patch_common(&mut host.name, &mut host.notes, &patch);
        }
        EntityKind::Group => {
            if let Some(children) = patch.children {
                snap.hierarchy.set_children_allowed(target.id, children)?;
            }
            let group = snap.get_mut::<Group>(target.id)?;
            patch_common(&mut group.name, &mut group.notes, &patch);
        }
        EntityKind::Inventory => {
            let inv = snap.get_mut::<Inventory>(target.id)?;
            patch_common(&mut inv.name, &mut inv.notes, &patch);
        }
        EntityKind::Project => {
            let project = snap.get_mut::<Project>(target.id)?;
            patch_common(&mut project.name, &mut project.notes, &patch);
        }
        EntityKind::Template => {
            let template = snap.get_mut::<Template>(target.id)?;
            patch_common(&mut template.name, &mut template.notes, &patch);
            if let Some(data) = patch.data {
                template.data = data;
            }
            if let Some(options) = patch.options {
                template.options = options;
            }
            validate_template(template)?;
        }
        EntityKind::PeriodicTask => {
            let mut task = snap.get::<PeriodicTask>(target.id)?.clone();
            patch_common(&mut task.name, &mut task.notes, &patch);
            if let Some(enabled) = patch.enabled {
                task.enabled = enabled;
            }
            if let Some(schedule) = patch.schedule {
                task.schedule = schedule;
            }
            validate_periodic_task(snap, &task)?;
            snap.insert(task);
        }
        EntityKind::History => {
            return Err(ArmadaError::NotApplicable(format!(
                "{target} is an audit record and cannot be edited"
            )));
        }
    }
    Ok(())
}

fn patch_common(name: &mut String, notes: &mut String, patch: &Patch) {
    if let Some(n) = &patch.name {
        *name = n.clone();
    }
    if let Some(n) = &patch.notes {
        *notes = n.clone();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclEntry;
    use serde_json::json;

    fn catalog() -> (Arc<Store>, Catalog) {
        let store = Arc::new(Store::in_memory());
        (store.clone(), Catalog::new(store))
    }

    fn owner() -> Identity {
        Identity::user(1)
    }

    fn grant(store: &Store, target: EntityRef, entry: AclEntry) {
        store
            .mutate(
                Mutation::new(Some(1), target, MutationKind::MergePermissions),
                |s| s.acl_mut(target)?.merge(&[entry]),
            )
            .unwrap();
    }

    fn host(c: &Catalog, name: &str) -> EntityId {
        c.create_host(
            &owner(),
            NewHost {
                name: name.into(),
                host_type: HostType::Host,
                notes: String::new(),
            },
        )
        .unwrap()
        .id
    }

    fn group(c: &Catalog, name: &str, children: bool) -> EntityId {
        c.create_group(
            &owner(),
            NewGroup {
                name: name.into(),
                children,
                notes: String::new(),
            },
        )
        .unwrap()
        .id
    }

    fn inventory(c: &Catalog, name: &str) -> EntityId {
        c.create_inventory(
            &owner(),
            NewInventory {
                name: name.into(),
                notes: String::new(),
            },
        )
        .unwrap()
        .id
    }

    fn project(c: &Catalog) -> EntityId {
        c.create_project(
            &owner(),
            NewProject {
                name: "infra".into(),
                repository: String::new(),
                branch: String::new(),
                notes: String::new(),
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn creator_becomes_owner() {
        let (store, c) = catalog();
        let id = host(&c, "web01");
        assert_eq!(store.read().get::<Host>(id).unwrap().acl.owner, 1);
    }

    #[test]
    fn invalid_name_is_rejected() {
        let (_, c) = catalog();
        let err = c
            .create_host(
                &owner(),
                NewHost {
                    name: "bad name".into(),
                    host_type: HostType::Host,
                    notes: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(_)));
    }

    #[test]
    fn inventory_all_hosts_through_nested_groups() {
        let (_, c) = catalog();
        let who = owner();
        let (h1, h2, h3) = (host(&c, "h1"), host(&c, "h2"), host(&c, "h3"));
        let inv = inventory(&c, "prod");
        let g1 = group(&c, "g1", true);
        let g1_hosts = group(&c, "g1_hosts", false);
        let g2 = group(&c, "g2", false);
        c.add_group(&who, inv, g1).unwrap();
        c.add_subgroup(&who, g1, g1_hosts).unwrap();
        c.add_subgroup(&who, g1, g2).unwrap();
        c.add_host(&who, EntityRef::group(g1_hosts), h1).unwrap();
        c.add_host(&who, EntityRef::group(g1_hosts), h2).unwrap();
        c.add_host(&who, EntityRef::group(g2), h2).unwrap();
        c.add_host(&who, EntityRef::group(g2), h3).unwrap();

        let names: BTreeSet<String> = c
            .all_hosts(&who, EntityRef::inventory(inv))
            .unwrap()
            .into_iter()
            .map(|v| v["name"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(names, BTreeSet::from(["h1".into(), "h2".into(), "h3".into()]));
    }

    #[test]
    fn linking_requires_editor_on_container_and_view_on_member() {
        let (store, c) = catalog();
        let g = group(&c, "web", false);
        let h = host(&c, "web01");
        let alice = Identity::user(2);

        let err = c.add_host(&alice, EntityRef::group(g), h).unwrap_err();
        assert!(matches!(err, ArmadaError::PermissionDenied(_)));

        grant(&store, EntityRef::group(g), AclEntry::user(2, Role::Editor));
        let err = c.add_host(&alice, EntityRef::group(g), h).unwrap_err();
        assert!(matches!(err, ArmadaError::PermissionDenied(_)));

        grant(&store, EntityRef::host(h), AclEntry::user(2, Role::Executor));
        c.add_host(&alice, EntityRef::group(g), h).unwrap();
    }

    #[test]
    fn children_flag_change_conflicts_and_keeps_members() {
        let (store, c) = catalog();
        let who = owner();
        let g = group(&c, "web", false);
        let h = host(&c, "web01");
        c.add_host(&who, EntityRef::group(g), h).unwrap();

        let patch = Patch {
            children: Some(true),
            ..Default::default()
        };
        let err = c.update(&who, EntityRef::group(g), patch).unwrap_err();
        assert!(matches!(err, ArmadaError::Conflict(_)));
        assert!(store.read().hierarchy.group(g).unwrap().hosts.contains(&h));
    }

    #[test]
    fn racing_reverse_subgroup_edges_commit_exactly_one() {
        use std::sync::Barrier;

        let (store, c) = catalog();
        for _ in 0..50 {
            let a = group(&c, "a", true);
            let b = group(&c, "b", true);
            let barrier = Barrier::new(2);
            let results: Vec<Result<()>> = std::thread::scope(|s| {
                let edges = [(a, b), (b, a)];
                let handles: Vec<_> = edges
                    .iter()
                    .map(|&(parent, child)| {
                        let c = c.clone();
                        let barrier = &barrier;
                        s.spawn(move || {
                            barrier.wait();
                            c.add_subgroup(&owner(), parent, child)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let committed = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(committed, 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(ArmadaError::Conflict(_)))));

            let snap = store.read();
            let ab = snap.hierarchy.group(a).unwrap().subgroups.contains(&b);
            let ba = snap.hierarchy.group(b).unwrap().subgroups.contains(&a);
            assert!(ab ^ ba);
        }
    }

    #[test]
    fn deleting_a_group_reconciles_the_hierarchy() {
        let (store, c) = catalog();
        let who = owner();
        let parent = group(&c, "all_web", true);
        let child = group(&c, "web", false);
        let inv = inventory(&c, "prod");
        c.add_subgroup(&who, parent, child).unwrap();
        c.add_group(&who, inv, child).unwrap();

        c.delete(&who, EntityRef::group(child)).unwrap();
        let snap = store.read();
        assert!(snap.hierarchy.group(parent).unwrap().subgroups.is_empty());
        assert!(snap.hierarchy.inventory(inv).unwrap().groups.is_empty());
    }

    #[test]
    fn delete_requires_master() {
        let (store, c) = catalog();
        let h = host(&c, "web01");
        grant(&store, EntityRef::host(h), AclEntry::user(2, Role::Editor));
        let err = c.delete(&Identity::user(2), EntityRef::host(h)).unwrap_err();
        assert!(matches!(err, ArmadaError::PermissionDenied(_)));
        assert!(store.read().hosts.contains_key(&h));
    }

    #[test]
    fn variables_are_masked_on_read_and_raw_in_store() {
        let (store, c) = catalog();
        let who = owner();
        let p = project(&c);
        let target = EntityRef::project(p);
        c.set_variable(&who, target, "repo_password", json!("secret"))
            .unwrap();
        c.set_variable(&who, target, "repo_branch", json!("main"))
            .unwrap();

        let rendered = c.variables(&who, target).unwrap();
        assert_eq!(rendered["repo_password"], json!(SENTINEL));
        assert_eq!(rendered["repo_branch"], json!("main"));
        let view = c.get(&who, target).unwrap();
        assert_eq!(view["vars"]["repo_password"], json!(SENTINEL));
        assert_eq!(
            store.read().get::<Project>(p).unwrap().vars.get("repo_password"),
            Some(&json!("secret"))
        );
    }

    #[test]
    fn project_variable_keys_are_restricted() {
        let (_, c) = catalog();
        let p = project(&c);
        let err = c
            .set_variable(&owner(), EntityRef::project(p), "ansible_user", json!("x"))
            .unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(_)));
    }

    #[test]
    fn executor_cannot_write_variables() {
        let (store, c) = catalog();
        let h = host(&c, "web01");
        grant(&store, EntityRef::host(h), AclEntry::user(2, Role::Executor));
        let alice = Identity::user(2);
        assert!(c.variables(&alice, EntityRef::host(h)).is_ok());
        let err = c
            .set_variable(&alice, EntityRef::host(h), "ansible_host", json!("10.0.0.1"))
            .unwrap_err();
        assert!(matches!(err, ArmadaError::PermissionDenied(_)));
    }

    #[test]
    fn template_periodic_task_rejects_mode_and_takes_template_project() {
        let (_, c) = catalog();
        let who = owner();
        let p = project(&c);
        let inv = inventory(&c, "prod");
        let tpl = c
            .create_template(
                &who,
                NewTemplate {
                    name: "deploy".into(),
                    kind: TemplateKind::Task,
                    project: p,
                    data: json!({"mode": "site.yml", "inventory": inv})
                        .as_object()
                        .cloned()
                        .unwrap(),
                    options: BTreeMap::new(),
                    notes: String::new(),
                },
            )
            .unwrap();

        let mut input = NewPeriodicTask {
            name: "nightly".into(),
            project: None,
            kind: TaskKind::Template,
            schedule_type: ScheduleType::Crontab,
            schedule: "0 3 * * *".into(),
            mode: "other.yml".into(),
            inventory: String::new(),
            template: Some(tpl.id),
            template_opt: None,
            enabled: true,
            notes: String::new(),
        };
        assert!(matches!(
            c.create_periodic_task(&who, input.clone()),
            Err(ArmadaError::Validation(_))
        ));
        input.mode.clear();
        let task = c.create_periodic_task(&who, input).unwrap();
        assert_eq!(task.project, p);
    }

    #[test]
    fn template_with_sentinel_is_rejected() {
        let (_, c) = catalog();
        let p = project(&c);
        let err = c
            .create_template(
                &owner(),
                NewTemplate {
                    name: "deploy".into(),
                    kind: TemplateKind::Task,
                    project: p,
                    data: json!({"mode": "site.yml", "inventory": "localhost,", "vars": {"private-key": SENTINEL}})
                        .as_object()
                        .cloned()
                        .unwrap(),
                    options: BTreeMap::new(),
                    notes: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(_)));
    }

    #[test]
    fn list_filters_by_visibility() {
        let (store, c) = catalog();
        let a = host(&c, "a");
        host(&c, "b");
        grant(&store, EntityRef::host(a), AclEntry::user(2, Role::Executor));
        let visible = c.list(&Identity::user(2), EntityKind::Host).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0]["name"], json!("a"));
        assert_eq!(c.list(&Identity::superuser(9), EntityKind::Host).unwrap().len(), 2);
    }
}
