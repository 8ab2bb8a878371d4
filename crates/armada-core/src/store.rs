//! Snapshot store.
//!
//! Readers clone an `Arc<Snapshot>` and never block. Writers are serialized
//! on one mutex; each mutation runs against a private copy of the current
//! snapshot, goes through the pre-commit hooks, is persisted, and only then
//! replaces the shared snapshot. A failure at any step leaves the visible
//! state and the persisted state untouched.

use crate::acl::Acl;
use crate::entity::{Entity, Group, Guarded, Host, Inventory, PeriodicTask, Project, Template, WithVars};
use crate::error::{ArmadaError, Result};
use crate::hierarchy::Hierarchy;
use crate::history::{EngineHandle, History};
use crate::hooks::{HookRegistry, Mutation};
use crate::types::{EntityId, EntityKind, EntityRef, HistoryId};
use crate::variables::Variables;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub hosts: BTreeMap<EntityId, Host>,
    #[serde(default)]
    pub groups: BTreeMap<EntityId, Group>,
    #[serde(default)]
    pub inventories: BTreeMap<EntityId, Inventory>,
    #[serde(default)]
    pub projects: BTreeMap<EntityId, Project>,
    #[serde(default)]
    pub templates: BTreeMap<EntityId, Template>,
    #[serde(default)]
    pub periodic_tasks: BTreeMap<EntityId, PeriodicTask>,
    /// Run records accumulate without bound, so snapshot copies share rows.
    #[serde(default)]
    pub history: BTreeMap<HistoryId, Arc<History>>,
    #[serde(default)]
    pub hierarchy: Hierarchy,
    /// Last id handed out. Ids are unique across kinds.
    #[serde(default)]
    pub last_id: u64,
    /// Engine handle to run record. Derived from `history`.
    #[serde(skip)]
    pub(crate) runs: BTreeMap<EngineHandle, HistoryId>,
}

/// Typed access to the table holding entities of one kind.
pub trait Stored: Entity {
    fn table(snap: &Snapshot) -> &BTreeMap<EntityId, Self>;
    fn table_mut(snap: &mut Snapshot) -> &mut BTreeMap<EntityId, Self>;
}

macro_rules! stored {
    ($($ty:ty => $field:ident),+ $(,)?) => {
        $(
            impl Stored for $ty {
                fn table(snap: &Snapshot) -> &BTreeMap<EntityId, Self> {
                    &snap.$field
                }
                fn table_mut(snap: &mut Snapshot) -> &mut BTreeMap<EntityId, Self> {
                    &mut snap.$field
                }
            }
        )+
    };
}

stored!(
    Host => hosts,
    Group => groups,
    Inventory => inventories,
    Project => projects,
    Template => templates,
    PeriodicTask => periodic_tasks,
);

impl Snapshot {
    pub fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn get<E: Stored>(&self, id: EntityId) -> Result<&E> {
        E::table(self)
            .get(&id)
            .ok_or(ArmadaError::NotFound(EntityRef::new(E::KIND, id)))
    }

    pub fn get_mut<E: Stored>(&mut self, id: EntityId) -> Result<&mut E> {
        E::table_mut(self)
            .get_mut(&id)
            .ok_or(ArmadaError::NotFound(EntityRef::new(E::KIND, id)))
    }

    pub fn insert<E: Stored>(&mut self, entity: E) {
        E::table_mut(self).insert(entity.id(), entity);
    }

    pub fn remove<E: Stored>(&mut self, id: EntityId) -> Result<E> {
        E::table_mut(self)
            .remove(&id)
            .ok_or(ArmadaError::NotFound(EntityRef::new(E::KIND, id)))
    }

    pub fn history(&self, id: HistoryId) -> Result<&History> {
        self.history
            .get(&id)
            .map(Arc::as_ref)
            .ok_or(ArmadaError::NotFound(EntityRef::history(id)))
    }

    pub fn history_mut(&mut self, id: HistoryId) -> Result<&mut History> {
        self.history
            .get_mut(&id)
            .map(Arc::make_mut)
            .ok_or(ArmadaError::NotFound(EntityRef::history(id)))
    }

    pub fn insert_history(&mut self, history: History) {
        self.runs.insert(history.engine_handle, history.id);
        self.history.insert(history.id, Arc::new(history));
    }

    pub fn remove_history(&mut self, id: HistoryId) -> Result<Arc<History>> {
        let history = self
            .history
            .remove(&id)
            .ok_or(ArmadaError::NotFound(EntityRef::history(id)))?;
        self.runs.remove(&history.engine_handle);
        Ok(history)
    }

    pub fn run_by_handle(&self, handle: EngineHandle) -> Option<HistoryId> {
        self.runs.get(&handle).copied()
    }

    /// Rebuild the handle index after loading `history` from storage.
    pub fn reindex_runs(&mut self) {
        self.runs = self
            .history
            .values()
            .map(|h| (h.engine_handle, h.id))
            .collect();
    }

    pub fn exists(&self, target: EntityRef) -> bool {
        match target.kind {
            EntityKind::Host => self.hosts.contains_key(&target.id),
            EntityKind::Group => self.groups.contains_key(&target.id),
            EntityKind::Inventory => self.inventories.contains_key(&target.id),
            EntityKind::Project => self.projects.contains_key(&target.id),
            EntityKind::Template => self.templates.contains_key(&target.id),
            EntityKind::PeriodicTask => self.periodic_tasks.contains_key(&target.id),
            EntityKind::History => self.history.contains_key(&target.id),
        }
    }

    /// The entity's own ACL. Kinds without one are NotApplicable.
    pub fn acl(&self, target: EntityRef) -> Result<&Acl> {
        match target.kind {
            EntityKind::Host => Ok(self.get::<Host>(target.id)?.acl()),
            EntityKind::Group => Ok(self.get::<Group>(target.id)?.acl()),
            EntityKind::Inventory => Ok(self.get::<Inventory>(target.id)?.acl()),
            EntityKind::Project => Ok(self.get::<Project>(target.id)?.acl()),
            EntityKind::Template => Ok(self.get::<Template>(target.id)?.acl()),
            EntityKind::PeriodicTask | EntityKind::History => Err(self.no_acl(target)),
        }
    }

    pub fn acl_mut(&mut self, target: EntityRef) -> Result<&mut Acl> {
        match target.kind {
            EntityKind::Host => Ok(self.get_mut::<Host>(target.id)?.acl_mut()),
            EntityKind::Group => Ok(self.get_mut::<Group>(target.id)?.acl_mut()),
            EntityKind::Inventory => Ok(self.get_mut::<Inventory>(target.id)?.acl_mut()),
            EntityKind::Project => Ok(self.get_mut::<Project>(target.id)?.acl_mut()),
            EntityKind::Template => Ok(self.get_mut::<Template>(target.id)?.acl_mut()),
            EntityKind::PeriodicTask | EntityKind::History => Err(self.no_acl(target)),
        }
    }

    /// ACL that authorizes access to `target`: its own, or its project's for
    /// periodic tasks and history records.
    pub fn governing_acl(&self, target: EntityRef) -> Result<&Acl> {
        match target.kind {
            EntityKind::PeriodicTask => {
                let project = self.get::<PeriodicTask>(target.id)?.project;
                Ok(self.get::<Project>(project)?.acl())
            }
            EntityKind::History => {
                let project = self.history(target.id)?.project;
                Ok(self.get::<Project>(project)?.acl())
            }
            _ => self.acl(target),
        }
    }

    pub fn vars(&self, target: EntityRef) -> Result<&Variables> {
        match target.kind {
            EntityKind::Host => Ok(self.get::<Host>(target.id)?.vars()),
            EntityKind::Group => Ok(self.get::<Group>(target.id)?.vars()),
            EntityKind::Inventory => Ok(self.get::<Inventory>(target.id)?.vars()),
            EntityKind::Project => Ok(self.get::<Project>(target.id)?.vars()),
            EntityKind::PeriodicTask => Ok(self.get::<PeriodicTask>(target.id)?.vars()),
            EntityKind::Template | EntityKind::History => Err(self.no_vars(target)),
        }
    }

    pub fn vars_mut(&mut self, target: EntityRef) -> Result<&mut Variables> {
        match target.kind {
            EntityKind::Host => Ok(self.get_mut::<Host>(target.id)?.vars_mut()),
            EntityKind::Group => Ok(self.get_mut::<Group>(target.id)?.vars_mut()),
            EntityKind::Inventory => Ok(self.get_mut::<Inventory>(target.id)?.vars_mut()),
            EntityKind::Project => Ok(self.get_mut::<Project>(target.id)?.vars_mut()),
            EntityKind::PeriodicTask => Ok(self.get_mut::<PeriodicTask>(target.id)?.vars_mut()),
            EntityKind::Template | EntityKind::History => Err(self.no_vars(target)),
        }
    }

    /// Masked client representation of any stored entity.
    pub fn view(&self, target: EntityRef) -> Result<Value> {
        match target.kind {
            EntityKind::Host => Ok(self.get::<Host>(target.id)?.view()),
            EntityKind::Group => Ok(self.get::<Group>(target.id)?.view()),
            EntityKind::Inventory => Ok(self.get::<Inventory>(target.id)?.view()),
            EntityKind::Project => Ok(self.get::<Project>(target.id)?.view()),
            EntityKind::Template => Ok(self.get::<Template>(target.id)?.view()),
            EntityKind::PeriodicTask => Ok(self.get::<PeriodicTask>(target.id)?.view()),
            EntityKind::History => Ok(self.history(target.id)?.view()),
        }
    }

    /// Ids of every stored entity of `kind`.
    pub fn ids(&self, kind: EntityKind) -> Vec<EntityId> {
        match kind {
            EntityKind::Host => self.hosts.keys().copied().collect(),
            EntityKind::Group => self.groups.keys().copied().collect(),
            EntityKind::Inventory => self.inventories.keys().copied().collect(),
            EntityKind::Project => self.projects.keys().copied().collect(),
            EntityKind::Template => self.templates.keys().copied().collect(),
            EntityKind::PeriodicTask => self.periodic_tasks.keys().copied().collect(),
            EntityKind::History => self.history.keys().copied().collect(),
        }
    }

    fn no_acl(&self, target: EntityRef) -> ArmadaError {
        if !self.exists(target) {
            return ArmadaError::NotFound(target);
        }
        ArmadaError::NotApplicable(format!(
            "{} has no permissions of its own. See project permissions.",
            target
        ))
    }

    fn no_vars(&self, target: EntityRef) -> ArmadaError {
        if !self.exists(target) {
            return ArmadaError::NotFound(target);
        }
        ArmadaError::NotApplicable(match target.kind {
            EntityKind::Template => format!("{target}: variables live in the template's data.vars"),
            _ => format!("{target} has no variables"),
        })
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Durable backing for the store.
pub trait Persistence: Send + Sync {
    fn load(&self) -> Result<Snapshot>;

    /// Write the difference between `before` and `after` in one transaction.
    fn commit(&self, before: &Snapshot, after: &Snapshot) -> Result<()>;
}

/// Keeps nothing; the store's in-memory snapshot is the only copy.
#[derive(Debug, Default)]
pub struct MemoryPersistence;

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Snapshot> {
        Ok(Snapshot::default())
    }

    fn commit(&self, _before: &Snapshot, _after: &Snapshot) -> Result<()> {
        Ok(())
    }
}

/// Rows to write and ids to delete, turning `before` into `after`.
pub struct TableDiff<'a, T> {
    pub upserts: Vec<(u64, &'a T)>,
    pub deletes: Vec<u64>,
}

impl<T> TableDiff<'_, T> {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty()
    }
}

pub fn diff_table<'a, T: PartialEq>(
    before: &BTreeMap<u64, T>,
    after: &'a BTreeMap<u64, T>,
) -> TableDiff<'a, T> {
    let upserts = after
        .iter()
        .filter(|(id, row)| before.get(id) != Some(*row))
        .map(|(id, row)| (*id, row))
        .collect();
    let deletes = before
        .keys()
        .filter(|id| !after.contains_key(id))
        .copied()
        .collect();
    TableDiff { upserts, deletes }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    persistence: Box<dyn Persistence>,
    hooks: HookRegistry,
}

impl Store {
    /// Load the initial snapshot from `persistence`.
    pub fn open(persistence: Box<dyn Persistence>, hooks: HookRegistry) -> Result<Self> {
        let snapshot = persistence.load()?;
        tracing::debug!(
            last_id = snapshot.last_id,
            history = snapshot.history.len(),
            "store loaded"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            persistence,
            hooks,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
            writer: Mutex::new(()),
            persistence: Box::new(MemoryPersistence),
            hooks: HookRegistry::new(),
        }
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Current committed snapshot.
    pub fn read(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Apply `f` atomically. On any error nothing is persisted or published.
    pub fn mutate<T, F>(&self, mutation: Mutation, f: F) -> Result<T>
    where
        F: FnOnce(&mut Snapshot) -> Result<T>,
    {
        let guard = self.writer.lock();
        let before = self.read();
        let mut next = (*before).clone();

        let out = f(&mut next)?;
        self.hooks.before_commit(&mutation, &next)?;
        self.persistence.commit(&before, &next)?;

        let committed = Arc::new(next);
        *self.current.write() = committed.clone();
        drop(guard);

        tracing::debug!(
            actor = ?mutation.actor,
            entity = %mutation.target,
            mutation = %mutation.kind,
            "committed"
        );
        self.hooks.after_commit(&mutation, &committed);
        Ok(out)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
