//! Ordered observers around each store commit.
//!
//! `before_commit` runs under the write lock against the proposed snapshot and
//! may veto the mutation by returning an error. `after_commit` runs once the
//! new snapshot is visible and cannot fail.

use crate::error::Result;
use crate::store::Snapshot;
use crate::types::{EntityRef, UserId};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
    ReplacePermissions,
    MergePermissions,
    RemovePermissions,
    SetOwner,
    SetVariable(String),
    RemoveVariable(String),
    Link(EntityRef),
    Unlink(EntityRef),
    Execute,
    Complete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => f.write_str("create"),
            MutationKind::Update => f.write_str("update"),
            MutationKind::Delete => f.write_str("delete"),
            MutationKind::ReplacePermissions => f.write_str("replace_permissions"),
            MutationKind::MergePermissions => f.write_str("merge_permissions"),
            MutationKind::RemovePermissions => f.write_str("remove_permissions"),
            MutationKind::SetOwner => f.write_str("set_owner"),
            MutationKind::SetVariable(k) => write!(f, "set_variable({k})"),
            MutationKind::RemoveVariable(k) => write!(f, "remove_variable({k})"),
            MutationKind::Link(r) => write!(f, "link({r})"),
            MutationKind::Unlink(r) => write!(f, "unlink({r})"),
            MutationKind::Execute => f.write_str("execute"),
            MutationKind::Complete => f.write_str("complete"),
        }
    }
}

/// One unit of change offered to the hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// `None` for system-originated changes such as engine callbacks.
    pub actor: Option<UserId>,
    pub target: EntityRef,
    pub kind: MutationKind,
}

impl Mutation {
    pub fn new(actor: Option<UserId>, target: EntityRef, kind: MutationKind) -> Self {
        Self {
            actor,
            target,
            kind,
        }
    }
}

pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    fn before_commit(&self, _mutation: &Mutation, _proposed: &Snapshot) -> Result<()> {
        Ok(())
    }

    fn after_commit(&self, _mutation: &Mutation, _committed: &Snapshot) {}
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks run in registration order.
    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Stops at the first veto.
    pub fn before_commit(&self, mutation: &Mutation, proposed: &Snapshot) -> Result<()> {
        for hook in &self.hooks {
            if let Err(e) = hook.before_commit(mutation, proposed) {
                tracing::debug!(hook = hook.name(), mutation = %mutation.kind, error = %e, "pre-commit hook vetoed");
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn after_commit(&self, mutation: &Mutation, committed: &Snapshot) {
        for hook in &self.hooks {
            hook.after_commit(mutation, committed);
        }
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.hooks.iter().map(|h| h.name()).collect();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArmadaError;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        veto: bool,
    }

    impl Hook for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn before_commit(&self, m: &Mutation, _: &Snapshot) -> Result<()> {
            self.log.lock().push(format!("{}:pre:{}", self.name, m.kind));
            if self.veto {
                return Err(ArmadaError::Validation("vetoed".into()));
            }
            Ok(())
        }

        fn after_commit(&self, m: &Mutation, _: &Snapshot) {
            self.log.lock().push(format!("{}:post:{}", self.name, m.kind));
        }
    }

    fn mutation() -> Mutation {
        Mutation::new(Some(1), EntityRef::host(1), MutationKind::Create)
    }

    #[test]
    fn hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = HookRegistry::new();
        for name in ["a", "b"] {
            reg.register(Arc::new(Recorder {
                name,
                log: log.clone(),
                veto: false,
            }));
        }
        let snap = Snapshot::default();
        reg.before_commit(&mutation(), &snap).unwrap();
        reg.after_commit(&mutation(), &snap);
        assert_eq!(
            *log.lock(),
            vec!["a:pre:create", "b:pre:create", "a:post:create", "b:post:create"]
        );
    }

    #[test]
    fn first_veto_stops_the_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = HookRegistry::new();
        reg.register(Arc::new(Recorder {
            name: "gate",
            log: log.clone(),
            veto: true,
        }));
        reg.register(Arc::new(Recorder {
            name: "never",
            log: log.clone(),
            veto: false,
        }));
        assert!(reg.before_commit(&mutation(), &Snapshot::default()).is_err());
        assert_eq!(*log.lock(), vec!["gate:pre:create"]);
    }
}
