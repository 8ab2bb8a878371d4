//! Permission predicates and atomic ACL mutation.
//!
//! Predicates are pure functions of an [`Acl`] and an [`Identity`]. The
//! [`PermissionEvaluator`] layers authorization and validation on top and
//! applies each change through [`Store::mutate`], so a failed check or a
//! rejected batch never leaves a partial ACL behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::acl::{check_duplicates, Acl, AclEntry, AclFilter};
use crate::error::{ArmadaError, Result};
use crate::hooks::{Mutation, MutationKind};
use crate::identity::{Identity, IdentityProvider};
use crate::store::{Snapshot, Store};
use crate::types::{EntityRef, MemberType, Role, UserId};

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

pub fn owned_by(acl: &Acl, user: UserId) -> bool {
    acl.owned_by(user)
}

pub fn viewable_by(acl: &Acl, who: &Identity) -> bool {
    has_role(acl, who, Role::Executor)
}

pub fn editable_by(acl: &Acl, who: &Identity) -> bool {
    has_role(acl, who, Role::Editor)
}

pub fn manageable_by(acl: &Acl, who: &Identity) -> bool {
    has_role(acl, who, Role::Master)
}

pub fn has_role(acl: &Acl, who: &Identity, required: Role) -> bool {
    let granted = acl.effective_role(who);
    tracing::trace!(
        user = who.user_id,
        superuser = who.is_superuser,
        owner = acl.owner,
        ?granted,
        ?required,
        "role check"
    );
    granted.is_some_and(|r| r >= required)
}

/// Require `required` on the ACL governing `target` in `snap`.
pub fn authorize(snap: &Snapshot, target: EntityRef, who: &Identity, required: Role) -> Result<()> {
    let acl = snap.governing_acl(target)?;
    if has_role(acl, who, required) {
        return Ok(());
    }
    tracing::debug!(user = who.user_id, entity = %target, role = %required, "permission denied");
    Err(ArmadaError::denied(format!(
        "{required} on {target} required"
    )))
}

// ---------------------------------------------------------------------------
// PermissionVerb
// ---------------------------------------------------------------------------

/// Operations reachable through the permissions collection of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionVerb {
    List,
    Replace,
    Merge,
    Remove,
}

/// Request method to operation.
pub const VERB_TABLE: &[(&str, PermissionVerb)] = &[
    ("GET", PermissionVerb::List),
    ("PUT", PermissionVerb::Replace),
    ("POST", PermissionVerb::Merge),
    ("DELETE", PermissionVerb::Remove),
];

impl PermissionVerb {
    pub fn from_method(method: &str) -> Option<Self> {
        VERB_TABLE
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(method))
            .map(|(_, v)| *v)
    }

    /// Role the actor needs; `None` means any authenticated caller.
    pub fn required_role(self) -> Option<Role> {
        match self {
            PermissionVerb::List => None,
            PermissionVerb::Replace | PermissionVerb::Merge | PermissionVerb::Remove => {
                Some(Role::Master)
            }
        }
    }
}

/// Body accompanying a permissions request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionPayload {
    #[default]
    Empty,
    Entries(Vec<AclEntry>),
    Filters(Vec<AclFilter>),
}

/// Full permission listing of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionList {
    pub owner: UserId,
    pub entries: Vec<AclEntry>,
}

impl From<&Acl> for PermissionList {
    fn from(acl: &Acl) -> Self {
        Self {
            owner: acl.owner,
            entries: acl.entries.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// PermissionEvaluator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PermissionEvaluator {
    store: Arc<Store>,
    identities: Arc<dyn IdentityProvider>,
}

impl PermissionEvaluator {
    pub fn new(store: Arc<Store>, identities: Arc<dyn IdentityProvider>) -> Self {
        Self { store, identities }
    }

    /// Dispatch one permissions request through [`VERB_TABLE`].
    pub fn apply(
        &self,
        verb: PermissionVerb,
        target: EntityRef,
        who: &Identity,
        payload: PermissionPayload,
    ) -> Result<PermissionList> {
        match (verb, payload) {
            (PermissionVerb::List, _) => self.list(target, who),
            (PermissionVerb::Replace, PermissionPayload::Entries(e)) => self.replace(target, who, &e),
            (PermissionVerb::Replace, PermissionPayload::Empty) => self.replace(target, who, &[]),
            (PermissionVerb::Merge, PermissionPayload::Entries(e)) => self.merge(target, who, &e),
            (PermissionVerb::Remove, PermissionPayload::Filters(f)) => self.remove(target, who, &f),
            (PermissionVerb::Remove, PermissionPayload::Entries(e)) => {
                let filters: Vec<AclFilter> = e.into_iter().map(AclFilter::from).collect();
                self.remove(target, who, &filters)
            }
            (verb, _) => Err(ArmadaError::validation(format!(
                "{verb:?} requires a list of permission entries"
            ))),
        }
    }

    /// Owner and entries. Any caller may list.
    pub fn list(&self, target: EntityRef, _who: &Identity) -> Result<PermissionList> {
        let snap = self.store.read();
        Ok(PermissionList::from(snap.acl(target)?))
    }

    /// PUT: the entry set becomes exactly `entries`.
    pub fn replace(
        &self,
        target: EntityRef,
        who: &Identity,
        entries: &[AclEntry],
    ) -> Result<PermissionList> {
        self.validate_entries(entries)?;
        self.mutate_acl(target, who, MutationKind::ReplacePermissions, |acl| {
            acl.replace(entries)
        })
    }

    /// POST: upsert each entry by `(member, member_type)`.
    pub fn merge(
        &self,
        target: EntityRef,
        who: &Identity,
        entries: &[AclEntry],
    ) -> Result<PermissionList> {
        self.validate_entries(entries)?;
        self.mutate_acl(target, who, MutationKind::MergePermissions, |acl| {
            acl.merge(entries)
        })
    }

    /// DELETE: drop entries matching any filter.
    pub fn remove(
        &self,
        target: EntityRef,
        who: &Identity,
        filters: &[AclFilter],
    ) -> Result<PermissionList> {
        self.mutate_acl(target, who, MutationKind::RemovePermissions, |acl| {
            let removed = acl.remove(filters);
            tracing::debug!(removed, "permission entries removed");
            Ok(())
        })
    }

    pub fn get_owner(&self, target: EntityRef) -> Result<UserId> {
        Ok(self.store.read().acl(target)?.owner)
    }

    /// Only the current owner may hand an entity over.
    pub fn set_owner(&self, target: EntityRef, who: &Identity, new_owner: UserId) -> Result<UserId> {
        if !self.identities.member_exists(new_owner, MemberType::User) {
            return Err(ArmadaError::UserNotFound(new_owner));
        }
        let mutation = Mutation::new(Some(who.user_id), target, MutationKind::SetOwner);
        self.store.mutate(mutation, |snap| {
            let acl = snap.acl_mut(target)?;
            if !owned_by(acl, who.user_id) {
                return Err(ArmadaError::denied(format!(
                    "only the owner of {target} can change its owner"
                )));
            }
            acl.owner = new_owner;
            Ok(())
        })?;
        tracing::info!(entity = %target, actor = who.user_id, new_owner, "owner changed");
        Ok(new_owner)
    }

    fn mutate_acl<F>(
        &self,
        target: EntityRef,
        who: &Identity,
        kind: MutationKind,
        f: F,
    ) -> Result<PermissionList>
    where
        F: FnOnce(&mut Acl) -> Result<()>,
    {
        let mutation = Mutation::new(Some(who.user_id), target, kind);
        let list = self.store.mutate(mutation, |snap| {
            let acl = snap.acl_mut(target)?;
            if !manageable_by(acl, who) {
                return Err(ArmadaError::denied(format!(
                    "MASTER on {target} required to change permissions"
                )));
            }
            f(acl)?;
            Ok(PermissionList::from(&*acl))
        })?;
        tracing::info!(entity = %target, actor = who.user_id, entries = list.entries.len(), "permissions updated");
        Ok(list)
    }

    fn validate_entries(&self, entries: &[AclEntry]) -> Result<()> {
        check_duplicates(entries)?;
        for e in entries {
            if !self.identities.member_exists(e.member, e.member_type) {
                return Err(ArmadaError::validation(format!(
                    "unknown {} {}",
                    e.member_type, e.member
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Host, HostType};
    use crate::identity::Directory;
    use crate::variables::Variables;

    fn setup() -> (Arc<Store>, PermissionEvaluator, Directory) {
        let mut dir = Directory::default();
        dir.add_user(1, "owner", false)
            .add_user(2, "alice", false)
            .add_user(3, "bob", false)
            .add_user(9, "root", true)
            .add_team(10, "ops", [3]);
        let store = Arc::new(Store::in_memory());
        store
            .mutate(
                Mutation::new(Some(1), EntityRef::host(1), MutationKind::Create),
                |s| {
                    s.last_id = 1;
                    s.insert(Host {
                        id: 1,
                        name: "web01".into(),
                        host_type: HostType::Host,
                        acl: Acl::new(1),
                        vars: Variables::new(),
                        notes: String::new(),
                    });
                    Ok(())
                },
            )
            .unwrap();
        let eval = PermissionEvaluator::new(store.clone(), Arc::new(dir.clone()));
        (store, eval, dir)
    }

    fn id(dir: &Directory, user: UserId) -> Identity {
        dir.resolve(user).unwrap()
    }

    const HOST: EntityRef = EntityRef {
        kind: crate::types::EntityKind::Host,
        id: 1,
    };

    #[test]
    fn replace_then_list_is_exact() {
        let (_, eval, dir) = setup();
        let owner = id(&dir, 1);
        eval.merge(HOST, &owner, &[AclEntry::user(2, Role::Editor)])
            .unwrap();
        let set = vec![AclEntry::team(10, Role::Executor), AclEntry::user(3, Role::Master)];
        eval.replace(HOST, &owner, &set).unwrap();
        assert_eq!(eval.list(HOST, &owner).unwrap().entries, set);
    }

    #[test]
    fn merge_overwrite_keeps_count_new_member_adds_one() {
        let (_, eval, dir) = setup();
        let owner = id(&dir, 1);
        eval.merge(HOST, &owner, &[AclEntry::user(2, Role::Executor)])
            .unwrap();
        let after = eval
            .merge(HOST, &owner, &[AclEntry::user(2, Role::Master)])
            .unwrap();
        assert_eq!(after.entries, vec![AclEntry::user(2, Role::Master)]);
        let after = eval
            .merge(HOST, &owner, &[AclEntry::user(3, Role::Editor)])
            .unwrap();
        assert_eq!(after.entries.len(), 2);
    }

    #[test]
    fn duplicate_batch_is_rejected_without_side_effects() {
        let (store, eval, dir) = setup();
        let before = store.read();
        let dupes = [
            AclEntry::user(2, Role::Executor),
            AclEntry::user(2, Role::Editor),
        ];
        let err = eval.replace(HOST, &id(&dir, 1), &dupes).unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(_)));
        assert_eq!(*store.read(), *before);
    }

    #[test]
    fn unknown_member_is_a_validation_error() {
        let (_, eval, dir) = setup();
        let err = eval
            .merge(HOST, &id(&dir, 1), &[AclEntry::team(77, Role::Editor)])
            .unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(_)));
    }

    #[test]
    fn non_master_cannot_mutate() {
        let (store, eval, dir) = setup();
        let owner = id(&dir, 1);
        eval.merge(HOST, &owner, &[AclEntry::user(2, Role::Editor)])
            .unwrap();
        let before = store.read();
        let alice = id(&dir, 2);
        let err = eval
            .merge(HOST, &alice, &[AclEntry::user(3, Role::Master)])
            .unwrap_err();
        assert!(matches!(err, ArmadaError::PermissionDenied(_)));
        assert_eq!(*store.read(), *before);
        // listing needs no role
        assert!(eval.list(HOST, &id(&dir, 3)).is_ok());
    }

    #[test]
    fn team_master_can_manage() {
        let (_, eval, dir) = setup();
        eval.merge(HOST, &id(&dir, 1), &[AclEntry::team(10, Role::Master)])
            .unwrap();
        let bob = id(&dir, 3);
        eval.remove(
            HOST,
            &bob,
            &[AclFilter {
                member: Some(10),
                ..Default::default()
            }],
        )
        .unwrap();
        assert!(eval.list(HOST, &bob).unwrap().entries.is_empty());
    }

    #[test]
    fn set_owner_requires_current_owner() {
        let (_, eval, dir) = setup();
        let err = eval.set_owner(HOST, &id(&dir, 9), 2).unwrap_err();
        assert!(matches!(err, ArmadaError::PermissionDenied(_)));

        eval.set_owner(HOST, &id(&dir, 1), 2).unwrap();
        assert_eq!(eval.get_owner(HOST).unwrap(), 2);
        assert!(eval.set_owner(HOST, &id(&dir, 2), 404).is_err());
    }

    #[test]
    fn verb_table_dispatch() {
        assert_eq!(PermissionVerb::from_method("put"), Some(PermissionVerb::Replace));
        assert_eq!(PermissionVerb::from_method("PATCH"), None);
        assert_eq!(PermissionVerb::List.required_role(), None);

        let (_, eval, dir) = setup();
        let owner = id(&dir, 1);
        let list = eval
            .apply(
                PermissionVerb::Merge,
                HOST,
                &owner,
                PermissionPayload::Entries(vec![AclEntry::user(2, Role::Editor)]),
            )
            .unwrap();
        assert_eq!(list.entries.len(), 1);
        let err = eval
            .apply(PermissionVerb::Merge, HOST, &owner, PermissionPayload::Empty)
            .unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(_)));
    }

    #[test]
    fn predicates_follow_role_order() {
        let mut acl = Acl::new(1);
        acl.entries = vec![AclEntry::user(2, Role::Executor), AclEntry::team(10, Role::Editor)];
        let alice = Identity::user(2);
        let bob = Identity::user(3).with_teams([10]);
        assert!(viewable_by(&acl, &alice));
        assert!(!editable_by(&acl, &alice));
        assert!(editable_by(&acl, &bob));
        assert!(!manageable_by(&acl, &bob));
        assert!(manageable_by(&acl, &Identity::superuser(50)));
        assert!(!viewable_by(&acl, &Identity::user(4)));
        assert!(owned_by(&acl, 1));
    }
}
