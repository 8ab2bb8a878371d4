//! Subprocess execution engine.
//!
//! Each job runs `ansible-playbook` or `ansible` as a child process with the
//! materialized inventory written next to its output log under
//! `.armada/runs/`. Completions are sent over a channel and applied by
//! [`spawn_completion_loop`], which keeps the engine free of any reference
//! back to the dispatcher.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use armada_core::config::EngineConfig;
use armada_core::dispatch::{Completion, Dispatcher, EngineError, ExecutionEngine, Job};
use armada_core::history::{EngineHandle, HistoryStatus, RunKind};
use armada_core::materialize::MaterializedInventory;
use armada_core::paths;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// ansible exit code for unreachable hosts.
const EXIT_UNREACHABLE: i32 = 4;

pub type CompletionRx = mpsc::UnboundedReceiver<(EngineHandle, Completion)>;

/// Inventory file written for one run. It holds raw secrets, so it is
/// removed when the guard drops, on every path out of `submit`.
#[derive(Debug)]
struct InventoryFile(Option<PathBuf>);

impl InventoryFile {
    fn path(&self) -> Option<&Path> {
        self.0.as_deref()
    }
}

impl Drop for InventoryFile {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "could not remove inventory file");
            }
        }
    }
}

pub struct ProcessEngine {
    playbook_bin: String,
    module_bin: String,
    root: PathBuf,
    workdir: PathBuf,
    completions: mpsc::UnboundedSender<(EngineHandle, Completion)>,
    running: Arc<Mutex<HashMap<EngineHandle, oneshot::Sender<()>>>>,
}

impl ProcessEngine {
    pub fn new(root: &Path, config: &EngineConfig) -> (Self, CompletionRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let workdir = match &config.workdir {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => root.to_path_buf(),
        };
        let engine = Self {
            playbook_bin: config.playbook_bin.clone(),
            module_bin: config.module_bin.clone(),
            root: root.to_path_buf(),
            workdir,
            completions: tx,
            running: Arc::new(Mutex::new(HashMap::new())),
        };
        (engine, rx)
    }

    fn binary(&self, kind: RunKind) -> &str {
        match kind {
            RunKind::Playbook => &self.playbook_bin,
            RunKind::Module => &self.module_bin,
        }
    }

    /// Value for `-i`: a file path, or a comma-separated host list as-is.
    fn prepare_inventory(&self, job: &Job) -> Result<(String, InventoryFile), EngineError> {
        if let MaterializedInventory::Inline { text } = &job.inventory {
            let trimmed = text.trim();
            if trimmed.contains(',') && !trimmed.contains('\n') {
                return Ok((trimmed.to_string(), InventoryFile(None)));
            }
        }
        let text = job
            .inventory
            .to_ansible_yaml()
            .map_err(|e| EngineError(format!("cannot render inventory: {e}")))?;
        let path = paths::runs_dir(&self.root).join(format!("{}.inventory.yml", job.history_id));
        armada_core::io::atomic_write(&path, text.as_bytes())
            .map_err(|e| EngineError(format!("cannot write inventory: {e}")))?;
        Ok((path.display().to_string(), InventoryFile(Some(path))))
    }
}

impl ExecutionEngine for ProcessEngine {
    fn submit(&self, job: Job) -> Result<(), EngineError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| EngineError("no async runtime available".into()))?;
        let bin = which::which(self.binary(job.kind))
            .map_err(|e| EngineError(format!("'{}' not found: {e}", self.binary(job.kind))))?;

        armada_core::io::ensure_dir(&paths::runs_dir(&self.root))
            .map_err(|e| EngineError(format!("cannot create runs directory: {e}")))?;
        let (inventory_arg, inventory_file) = self.prepare_inventory(&job)?;
        let log_path = paths::run_output(&self.root, job.history_id);
        let log = std::fs::File::create(&log_path)
            .map_err(|e| EngineError(format!("cannot create {}: {e}", log_path.display())))?;
        let log_err = log
            .try_clone()
            .map_err(|e| EngineError(format!("cannot create {}: {e}", log_path.display())))?;

        let mut child = Command::new(&bin)
            .arg("-i")
            .arg(&inventory_arg)
            .args(job.args())
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError(format!("failed to spawn '{}': {e}", bin.display())))?;

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.running.lock().insert(job.handle, cancel_tx);

        let handle = job.handle;
        let history_id = job.history_id;
        let running = self.running.clone();
        let completions = self.completions.clone();
        let output_ref = log_path.display().to_string();
        tracing::debug!(history_id, bin = %bin.display(), "process spawned");

        runtime.spawn(async move {
            let status = tokio::select! {
                exit = child.wait() => match exit {
                    Ok(s) if s.success() => HistoryStatus::Success,
                    Ok(s) if s.code() == Some(EXIT_UNREACHABLE) => HistoryStatus::Offline,
                    Ok(_) => HistoryStatus::Failed,
                    Err(e) => {
                        tracing::warn!(history_id, error = %e, "wait failed");
                        HistoryStatus::Interrupted
                    }
                },
                _ = cancel_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(history_id, error = %e, "kill failed");
                    }
                    HistoryStatus::Canceled
                }
            };
            running.lock().remove(&handle);
            drop(inventory_file);
            let completion = Completion {
                status,
                output_ref: Some(output_ref),
                finished_at: Utc::now(),
            };
            if completions.send((handle, completion)).is_err() {
                tracing::warn!(history_id, "completion channel closed");
            }
        });
        Ok(())
    }

    fn cancel(&self, handle: EngineHandle) -> Result<(), EngineError> {
        let sender = self
            .running
            .lock()
            .remove(&handle)
            .ok_or_else(|| EngineError(format!("run {handle} is not active")))?;
        sender
            .send(())
            .map_err(|_| EngineError(format!("run {handle} already finished")))
    }
}

/// Apply engine completions to history until the engine is dropped.
pub fn spawn_completion_loop(mut rx: CompletionRx, dispatcher: Dispatcher) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((handle, completion)) = rx.recv().await {
            let dispatcher = dispatcher.clone();
            let result =
                tokio::task::spawn_blocking(move || dispatcher.complete(handle, completion)).await;
            match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(%handle, error = %e, "completion rejected"),
                Err(e) => tracing::error!(%handle, error = %e, "completion task failed"),
            }
        }
    })
}
