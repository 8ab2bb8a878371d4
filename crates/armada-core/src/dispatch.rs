//! Execution dispatch: permission re-check, template expansion, history
//! recording and handoff to the execution engine.
//!
//! # Lifecycle
//!
//! ```text
//! execute_* ──► store.mutate { authorize, materialize, History RUNNING }
//!            ──► engine.submit(job)        (no lock held)
//!                  ├─ Ok   ──► caller gets the history id
//!                  └─ Err  ──► History FAILED, EngineRejected
//! engine ──► complete(handle, completion) ──► History terminal
//! ```
//!
//! The engine handle is assigned before submission so a completion can never
//! arrive for a record that does not exist yet.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::entity::{PeriodicTask, TaskKind, Template};
use crate::error::{ArmadaError, Result};
use crate::history::{EngineHandle, History, HistoryStatus, InitiatorType, RunKind};
use crate::hooks::{Mutation, MutationKind};
use crate::identity::{Identity, IdentityProvider};
use crate::materialize::MaterializedInventory;
use crate::permissions::{authorize, has_role};
use crate::store::{Snapshot, Store};
use crate::template::{expand, InventorySource};
use crate::types::{EntityId, EntityKind, EntityRef, HistoryId, Role};
use crate::variables::mask_vars;

/// Module runs: host pattern option. Defaults to `all`.
pub const GROUP_KEY: &str = "group";
/// Module runs: module arguments option, passed as `-a`.
pub const ARGS_KEY: &str = "args";

// ---------------------------------------------------------------------------
// Engine collaborator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

/// The component that actually runs playbooks and modules.
///
/// `submit` must not block on the run. Results come back later through
/// [`Dispatcher::complete`].
pub trait ExecutionEngine: Send + Sync {
    fn submit(&self, job: Job) -> std::result::Result<(), EngineError>;

    /// Ask the engine to stop a run. The history changes only when the
    /// engine reports completion.
    fn cancel(&self, handle: EngineHandle) -> std::result::Result<(), EngineError>;
}

/// One unit of work handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub handle: EngineHandle,
    pub history_id: HistoryId,
    pub project: EntityId,
    pub kind: RunKind,
    /// Playbook path or module name.
    pub target: String,
    pub inventory: MaterializedInventory,
    /// Raw run options, secrets included.
    pub options: Map<String, Value>,
}

impl Job {
    /// Command-line arguments after the program name. The engine adds the
    /// inventory flag itself.
    pub fn args(&self) -> Vec<String> {
        build_args(self.kind, &self.target, &self.options)
    }
}

/// `--key value` per option; `true` becomes a bare flag, `false` and null
/// are dropped. Module runs take their host pattern from `group` and their
/// arguments from `args`.
pub fn build_args(kind: RunKind, target: &str, options: &Map<String, Value>) -> Vec<String> {
    let mut options = options.clone();
    let mut args = Vec::new();
    match kind {
        RunKind::Playbook => args.push(target.to_string()),
        RunKind::Module => {
            let pattern = match options.remove(GROUP_KEY) {
                Some(Value::String(s)) if !s.is_empty() => s,
                _ => "all".to_string(),
            };
            args.extend([pattern, "-m".to_string(), target.to_string()]);
            match options.remove(ARGS_KEY) {
                None | Some(Value::Null) => {}
                Some(v) => args.extend(["-a".to_string(), arg_value(&v)]),
            }
        }
    }
    for (key, value) in &options {
        match value {
            Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => args.push(format!("--{key}")),
            other => args.extend([format!("--{key}"), arg_value(other)]),
        }
    }
    args
}

fn arg_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Direct playbook or module run against a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub kind: RunKind,
    pub target: String,
    pub inventory: InventorySource,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// Engine-reported outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub status: HistoryStatus,
    #[serde(default)]
    pub output_ref: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Fully resolved run, before authorization against the snapshot.
struct Plan {
    project: EntityId,
    initiator: u64,
    initiator_type: InitiatorType,
    kind: RunKind,
    mode: String,
    inventory: InventorySource,
    options: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<Store>,
    identities: Arc<dyn IdentityProvider>,
    engine: Arc<dyn ExecutionEngine>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        identities: Arc<dyn IdentityProvider>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        Self {
            store,
            identities,
            engine,
        }
    }

    /// Run a playbook or module of `project`.
    pub fn execute(&self, who: &Identity, project: EntityId, req: ExecuteRequest) -> Result<HistoryId> {
        if req.target.trim().is_empty() {
            return Err(ArmadaError::validation("execution target must not be empty"));
        }
        self.launch(who, |_| {
            Ok(Plan {
                project,
                initiator: project,
                initiator_type: InitiatorType::Project,
                kind: req.kind,
                mode: req.target,
                inventory: req.inventory,
                options: req.options,
            })
        })
    }

    /// Run a template, optionally overlaid with one of its named options.
    pub fn execute_template(
        &self,
        who: &Identity,
        template_id: EntityId,
        option: Option<&str>,
    ) -> Result<HistoryId> {
        self.launch(who, |snap| {
            authorize(snap, EntityRef::template(template_id), who, Role::Executor)?;
            let template = snap.get::<Template>(template_id)?;
            let expanded = expand(template, option)?;
            Ok(Plan {
                project: template.project,
                initiator: template_id,
                initiator_type: InitiatorType::Template,
                kind: expanded.kind,
                mode: expanded.mode,
                inventory: expanded.inventory,
                options: expanded.options,
            })
        })
    }

    /// Run a periodic task now, as `who`.
    pub fn execute_periodic_task(&self, who: &Identity, task_id: EntityId) -> Result<HistoryId> {
        self.launch(who, |snap| {
            let task = snap.get::<PeriodicTask>(task_id)?;
            periodic_plan(snap, task)
        })
    }

    /// Scheduler entry point. Runs as the project owner, resolved fresh.
    /// Disabled tasks are skipped.
    pub fn run_scheduled(&self, task_id: EntityId) -> Result<Option<HistoryId>> {
        let owner = {
            let snap = self.store.read();
            let task = snap.get::<PeriodicTask>(task_id)?;
            if !task.enabled {
                tracing::debug!(task = task_id, "periodic task disabled, skipping");
                return Ok(None);
            }
            snap.acl(EntityRef::project(task.project))?.owner
        };
        let identity = self.identities.resolve(owner)?;
        self.execute_periodic_task(&identity, task_id).map(Some)
    }

    /// Engine callback. A record that is already terminal is a Conflict.
    pub fn complete(&self, handle: EngineHandle, completion: Completion) -> Result<History> {
        let history_id = self
            .store
            .read()
            .run_by_handle(handle)
            .ok_or(ArmadaError::RunNotFound(handle))?;

        let target = EntityRef::history(history_id);
        let history = self
            .store
            .mutate(Mutation::new(None, target, MutationKind::Complete), |snap| {
                let history = snap.history_mut(history_id)?;
                history.finish(completion.status, completion.finished_at, completion.output_ref)?;
                Ok(history.clone())
            })?;
        tracing::info!(
            history_id,
            status = %history.status,
            execution_time = ?history.execution_time(),
            "run finished"
        );
        Ok(history)
    }

    /// Ask the engine to stop a run. Allowed for the user who started it
    /// and for project masters.
    pub fn cancel(&self, who: &Identity, history_id: HistoryId) -> Result<()> {
        let handle = {
            let snap = self.store.read();
            let history = snap.history(history_id)?;
            let target = EntityRef::history(history_id);
            let allowed = history.executor == who.user_id
                || has_role(snap.governing_acl(target)?, who, Role::Master);
            if !allowed {
                return Err(ArmadaError::denied(format!(
                    "only the executor or a project MASTER can cancel {target}"
                )));
            }
            if history.is_terminal() {
                return Err(ArmadaError::conflict(format!(
                    "{target} is already {}",
                    history.status
                )));
            }
            history.engine_handle
        };
        self.engine
            .cancel(handle)
            .map_err(|e| ArmadaError::EngineRejected {
                history_id,
                reason: e.0,
            })?;
        tracing::info!(history_id, actor = who.user_id, "cancel requested");
        Ok(())
    }

    /// Mark every RUNNING record INTERRUPTED. Called at startup, before any
    /// engine can report back.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let target = EntityRef::new(EntityKind::History, 0);
        let count = self
            .store
            .mutate(Mutation::new(None, target, MutationKind::Complete), |snap| {
                let now = Utc::now();
                let mut count = 0;
                for history in snap.history.values_mut().filter(|h| !h.is_terminal()) {
                    let history = Arc::make_mut(history);
                    history.finish(HistoryStatus::Interrupted, now, None)?;
                    history.reason = Some("server restarted while the run was active".into());
                    count += 1;
                }
                Ok(count)
            })?;
        if count > 0 {
            tracing::warn!(count, "marked interrupted runs");
        }
        Ok(count)
    }

    fn launch<F>(&self, who: &Identity, plan: F) -> Result<HistoryId>
    where
        F: FnOnce(&Snapshot) -> Result<Plan>,
    {
        let target = EntityRef::new(EntityKind::History, 0);
        let mutation = Mutation::new(Some(who.user_id), target, MutationKind::Execute);
        let job = self.store.mutate(mutation, |snap| {
            let plan = plan(snap)?;
            authorize(snap, EntityRef::project(plan.project), who, Role::Executor)?;
            if let InventorySource::Id(inv) = &plan.inventory {
                authorize(snap, EntityRef::inventory(*inv), who, Role::Executor)?;
            }
            let inventory = MaterializedInventory::build(snap, &plan.inventory)?;

            let mut masked = Value::Object(plan.options.clone());
            mask_vars(&mut masked, EntityKind::Template.hidden_keys());
            let raw_options = match masked {
                Value::Object(map) => map,
                _ => Map::new(),
            };

            let id = snap.next_id();
            let handle = EngineHandle::new();
            let (stored_inventory, raw_inventory) = match &plan.inventory {
                InventorySource::Id(inv) => (Some(*inv), String::new()),
                InventorySource::Inline(text) => (None, text.clone()),
            };
            snap.insert_history(History {
                id,
                project: plan.project,
                initiator: plan.initiator,
                initiator_type: plan.initiator_type,
                kind: plan.kind,
                mode: plan.mode.clone(),
                inventory: stored_inventory,
                status: HistoryStatus::Running,
                start_time: Utc::now(),
                stop_time: None,
                executor: who.user_id,
                raw_args: build_args(plan.kind, &plan.mode, &raw_options).join(" "),
                raw_options,
                raw_inventory,
                output_ref: None,
                reason: None,
                engine_handle: handle,
            });
            Ok(Job {
                handle,
                history_id: id,
                project: plan.project,
                kind: plan.kind,
                target: plan.mode,
                inventory,
                options: plan.options,
            })
        })?;

        let history_id = job.history_id;
        tracing::info!(
            history_id,
            actor = who.user_id,
            project = job.project,
            kind = %job.kind,
            target = %job.target,
            "run started"
        );
        if let Err(e) = self.engine.submit(job) {
            tracing::warn!(history_id, error = %e, "engine rejected run");
            self.reject(history_id, &e.0)?;
            return Err(ArmadaError::EngineRejected {
                history_id,
                reason: e.0,
            });
        }
        Ok(history_id)
    }

    fn reject(&self, history_id: HistoryId, reason: &str) -> Result<()> {
        let target = EntityRef::history(history_id);
        self.store
            .mutate(Mutation::new(None, target, MutationKind::Complete), |snap| {
                let history = snap.history_mut(history_id)?;
                history.finish(HistoryStatus::Failed, Utc::now(), None)?;
                history.reason = Some(reason.to_string());
                Ok(())
            })
    }
}

fn periodic_plan(snap: &Snapshot, task: &PeriodicTask) -> Result<Plan> {
    match task.kind {
        TaskKind::Template => {
            let tid = task.template.ok_or_else(|| {
                ArmadaError::validation(format!("periodic task {} has no template", task.id))
            })?;
            let template = snap.get::<Template>(tid)?;
            let expanded = expand(template, task.template_opt.as_deref())?;
            Ok(Plan {
                project: template.project,
                initiator: tid,
                initiator_type: InitiatorType::Template,
                kind: expanded.kind,
                mode: expanded.mode,
                inventory: expanded.inventory,
                options: expanded.options,
            })
        }
        TaskKind::Playbook | TaskKind::Module => Ok(Plan {
            project: task.project,
            initiator: task.id,
            initiator_type: InitiatorType::Scheduler,
            kind: if task.kind == TaskKind::Playbook {
                RunKind::Playbook
            } else {
                RunKind::Module
            },
            mode: task.mode.clone(),
            inventory: InventorySource::parse_str(&task.inventory),
            options: task
                .vars
                .get_all()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }),
    }
}

// ---------------------------------------------------------------------------
// RecordingEngine
// ---------------------------------------------------------------------------

/// In-memory engine that records submitted jobs and never runs anything.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    jobs: Mutex<Vec<Job>>,
    cancelled: Mutex<Vec<EngineHandle>>,
    reject_with: Mutex<Option<String>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later submission fails with `reason`.
    pub fn reject_with(&self, reason: impl Into<String>) {
        *self.reject_with.lock() = Some(reason.into());
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<EngineHandle> {
        self.cancelled.lock().clone()
    }
}

impl ExecutionEngine for RecordingEngine {
    fn submit(&self, job: Job) -> std::result::Result<(), EngineError> {
        if let Some(reason) = self.reject_with.lock().clone() {
            return Err(EngineError(reason));
        }
        self.jobs.lock().push(job);
        Ok(())
    }

    fn cancel(&self, handle: EngineHandle) -> std::result::Result<(), EngineError> {
        self.cancelled.lock().push(handle);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
