//! Audit record of one execution attempt.
//!
//! Lifecycle: a record is created `Running` before the engine sees the job,
//! and moves exactly once to a terminal status. Terminal records are
//! read-only; [`History::finish`] refuses a second transition.

use crate::error::{ArmadaError, Result};
use crate::types::{EntityId, EntityKind, HistoryId, UserId};
use crate::variables::mask_vars;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// HistoryStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryStatus {
    Running,
    Success,
    Failed,
    Canceled,
    /// The engine lost track of the run (e.g. a restart while running).
    Interrupted,
    /// The target hosts were unreachable.
    Offline,
}

impl HistoryStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, HistoryStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HistoryStatus::Running => "RUNNING",
            HistoryStatus::Success => "SUCCESS",
            HistoryStatus::Failed => "FAILED",
            HistoryStatus::Canceled => "CANCELED",
            HistoryStatus::Interrupted => "INTERRUPTED",
            HistoryStatus::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// InitiatorType / RunKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitiatorType {
    User,
    Project,
    Template,
    Scheduler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunKind {
    Playbook,
    Module,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunKind::Playbook => "PLAYBOOK",
            RunKind::Module => "MODULE",
        })
    }
}

/// Opaque id the engine uses to report back on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EngineHandle(pub Uuid);

impl EngineHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub id: HistoryId,
    pub project: EntityId,
    pub initiator: u64,
    pub initiator_type: InitiatorType,
    pub kind: RunKind,
    pub mode: String,
    /// Inventory entity, when the run used a stored one.
    #[serde(default)]
    pub inventory: Option<EntityId>,
    pub status: HistoryStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub stop_time: Option<DateTime<Utc>>,
    pub executor: UserId,
    #[serde(default)]
    pub raw_args: String,
    #[serde(default)]
    pub raw_options: Map<String, Value>,
    #[serde(default)]
    pub raw_inventory: String,
    #[serde(default)]
    pub output_ref: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub engine_handle: EngineHandle,
}

impl History {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Seconds between start and stop, once stopped.
    pub fn execution_time(&self) -> Option<i64> {
        self.stop_time
            .map(|stop| (stop - self.start_time).num_seconds().max(0))
    }

    /// Move to a terminal status. Fails with Conflict if already terminal.
    pub fn finish(
        &mut self,
        status: HistoryStatus,
        stop_time: DateTime<Utc>,
        output_ref: Option<String>,
    ) -> Result<()> {
        if self.is_terminal() {
            return Err(ArmadaError::conflict(format!(
                "history {} is already {} and cannot change",
                self.id, self.status
            )));
        }
        if !status.is_terminal() {
            return Err(ArmadaError::validation(format!(
                "{status} is not a terminal status"
            )));
        }
        self.status = status;
        self.stop_time = Some(stop_time.max(self.start_time));
        if output_ref.is_some() {
            self.output_ref = output_ref;
        }
        Ok(())
    }

    pub fn view(&self) -> Value {
        let mut options = Value::Object(self.raw_options.clone());
        mask_vars(&mut options, EntityKind::Template.hidden_keys());
        json!({
            "id": self.id,
            "project": self.project,
            "initiator": self.initiator,
            "initiator_type": self.initiator_type,
            "kind": self.kind,
            "mode": self.mode,
            "inventory": self.inventory,
            "status": self.status,
            "start_time": self.start_time,
            "stop_time": self.stop_time,
            "execution_time": self.execution_time(),
            "executor": self.executor,
            "raw_args": self.raw_args,
            "raw_options": options,
            "raw_inventory": self.raw_inventory,
            "output_ref": self.output_ref,
            "reason": self.reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::SENTINEL;
    use chrono::Duration;

    fn running() -> History {
        History {
            id: 1,
            project: 2,
            initiator: 2,
            initiator_type: InitiatorType::Project,
            kind: RunKind::Playbook,
            mode: "site.yml".into(),
            inventory: Some(3),
            status: HistoryStatus::Running,
            start_time: Utc::now(),
            stop_time: None,
            executor: 5,
            raw_args: String::new(),
            raw_options: Map::new(),
            raw_inventory: String::new(),
            output_ref: None,
            reason: None,
            engine_handle: EngineHandle::new(),
        }
    }

    #[test]
    fn finish_sets_stop_time_and_execution_time() {
        let mut h = running();
        let stop = h.start_time + Duration::seconds(42);
        h.finish(HistoryStatus::Success, stop, Some("runs/1.log".into()))
            .unwrap();
        assert_eq!(h.status, HistoryStatus::Success);
        assert_eq!(h.execution_time(), Some(42));
        assert_eq!(h.output_ref.as_deref(), Some("runs/1.log"));
    }

    #[test]
    fn terminal_history_is_read_only() {
        let mut h = running();
        h.finish(HistoryStatus::Failed, Utc::now(), None).unwrap();
        let before = h.clone();
        let err = h
            .finish(HistoryStatus::Success, Utc::now(), None)
            .unwrap_err();
        assert!(matches!(err, ArmadaError::Conflict(_)));
        assert_eq!(h, before);
    }

    #[test]
    fn running_is_not_a_completion() {
        let mut h = running();
        assert!(matches!(
            h.finish(HistoryStatus::Running, Utc::now(), None),
            Err(ArmadaError::Validation(_))
        ));
    }

    #[test]
    fn view_masks_secret_run_options() {
        let mut h = running();
        h.raw_options.insert("private-key".into(), json!("/keys/id_rsa"));
        h.raw_options.insert("forks".into(), json!(5));
        let view = h.view();
        assert_eq!(view["raw_options"]["private-key"], json!(SENTINEL));
        assert_eq!(view["raw_options"]["forks"], json!(5));
        assert_eq!(view["status"], json!("RUNNING"));
    }
}
