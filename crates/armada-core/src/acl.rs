//! Owner plus role grants attached to one entity.
//!
//! The functions here are pure: they validate and rewrite an [`Acl`] value.
//! Authorization and atomic commit are layered on top in
//! [`crate::permissions`].

use crate::error::{ArmadaError, Result};
use crate::identity::Identity;
use crate::types::{MemberType, Role, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// AclEntry / AclFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    pub member: u64,
    pub member_type: MemberType,
    pub role: Role,
}

impl AclEntry {
    pub fn user(member: UserId, role: Role) -> Self {
        Self {
            member,
            member_type: MemberType::User,
            role,
        }
    }

    pub fn team(member: u64, role: Role) -> Self {
        Self {
            member,
            member_type: MemberType::Team,
            role,
        }
    }

    fn key(&self) -> (u64, MemberType) {
        (self.member, self.member_type)
    }
}

/// Selects entries for removal. Unset fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclFilter {
    #[serde(default)]
    pub member: Option<u64>,
    #[serde(default)]
    pub member_type: Option<MemberType>,
    #[serde(default)]
    pub role: Option<Role>,
}

impl AclFilter {
    pub fn matches(&self, entry: &AclEntry) -> bool {
        self.member.map_or(true, |m| m == entry.member)
            && self.member_type.map_or(true, |t| t == entry.member_type)
            && self.role.map_or(true, |r| r == entry.role)
    }
}

impl From<AclEntry> for AclFilter {
    fn from(e: AclEntry) -> Self {
        Self {
            member: Some(e.member),
            member_type: Some(e.member_type),
            role: Some(e.role),
        }
    }
}

// ---------------------------------------------------------------------------
// Acl
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    pub owner: UserId,
    #[serde(default)]
    pub entries: Vec<AclEntry>,
}

impl Acl {
    pub fn new(owner: UserId) -> Self {
        Self {
            owner,
            entries: Vec::new(),
        }
    }

    pub fn owned_by(&self, user: UserId) -> bool {
        self.owner == user
    }

    /// Highest role granted to `who`, counting ownership and superuser as MASTER.
    pub fn effective_role(&self, who: &Identity) -> Option<Role> {
        if who.is_superuser || self.owned_by(who.user_id) {
            return Some(Role::Master);
        }
        self.entries
            .iter()
            .filter(|e| who.matches(e.member, e.member_type))
            .map(|e| e.role)
            .max()
    }

    /// PUT semantics: the entry list becomes exactly `entries`.
    pub fn replace(&mut self, entries: &[AclEntry]) -> Result<()> {
        check_duplicates(entries)?;
        self.entries = entries.to_vec();
        Ok(())
    }

    /// POST semantics: upsert each entry keyed by `(member, member_type)`.
    pub fn merge(&mut self, entries: &[AclEntry]) -> Result<()> {
        check_duplicates(entries)?;
        for entry in entries {
            self.entries.retain(|e| e.key() != entry.key());
            self.entries.push(*entry);
        }
        Ok(())
    }

    /// DELETE semantics. Returns the number of entries removed.
    pub fn remove(&mut self, filters: &[AclFilter]) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| !filters.iter().any(|f| f.matches(e)));
        before - self.entries.len()
    }
}

/// Reject entry sets in which two entries share `(member, member_type)`.
pub fn check_duplicates(entries: &[AclEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for e in entries {
        if !seen.insert(e.key()) {
            return Err(ArmadaError::validation(format!(
                "There is duplicates in your permissions set: {} {}",
                e.member_type, e.member
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acl() -> Acl {
        let mut acl = Acl::new(1);
        acl.entries = vec![
            AclEntry::user(2, Role::Executor),
            AclEntry::team(10, Role::Editor),
        ];
        acl
    }

    #[test]
    fn replace_drops_old_entries() {
        let mut a = acl();
        let new = [AclEntry::user(3, Role::Master)];
        a.replace(&new).unwrap();
        assert_eq!(a.entries, new.to_vec());
    }

    #[test]
    fn duplicates_rejected_and_acl_unchanged() {
        let mut a = acl();
        let before = a.clone();
        let dupes = [
            AclEntry::user(5, Role::Executor),
            AclEntry::user(5, Role::Master),
        ];
        assert!(matches!(a.replace(&dupes), Err(ArmadaError::Validation(_))));
        assert!(matches!(a.merge(&dupes), Err(ArmadaError::Validation(_))));
        assert_eq!(a, before);
    }

    #[test]
    fn same_id_different_member_type_is_not_a_duplicate() {
        let entries = [AclEntry::user(7, Role::Executor), AclEntry::team(7, Role::Editor)];
        assert!(check_duplicates(&entries).is_ok());
    }

    #[test]
    fn merge_overwrites_in_place_and_appends_new() {
        let mut a = acl();
        a.merge(&[AclEntry::user(2, Role::Master)]).unwrap();
        assert_eq!(a.entries.len(), 2);
        assert!(a.entries.contains(&AclEntry::user(2, Role::Master)));
        assert!(!a.entries.contains(&AclEntry::user(2, Role::Executor)));

        a.merge(&[AclEntry::user(4, Role::Editor)]).unwrap();
        assert_eq!(a.entries.len(), 3);
    }

    #[test]
    fn remove_with_partial_filter() {
        let mut a = acl();
        let removed = a.remove(&[AclFilter {
            member_type: Some(MemberType::Team),
            ..Default::default()
        }]);
        assert_eq!(removed, 1);
        assert_eq!(a.entries, vec![AclEntry::user(2, Role::Executor)]);
    }

    #[test]
    fn effective_role_takes_maximum_across_grants() {
        let mut a = acl();
        a.entries.push(AclEntry::team(11, Role::Master));
        let who = Identity::user(2).with_teams([10, 11]);
        assert_eq!(a.effective_role(&who), Some(Role::Master));

        let only_direct = Identity::user(2);
        assert_eq!(a.effective_role(&only_direct), Some(Role::Executor));

        assert_eq!(a.effective_role(&Identity::user(99)), None);
    }

    #[test]
    fn owner_and_superuser_resolve_to_master() {
        let a = acl();
        assert_eq!(a.effective_role(&Identity::user(1)), Some(Role::Master));
        assert_eq!(a.effective_role(&Identity::superuser(42)), Some(Role::Master));
    }
}
