//! Identity collaborator: who is acting, which teams they belong to, and
//! whether they bypass ACLs.
//!
//! User and team management live outside armada. The core only consumes
//! resolved [`Identity`] values through [`IdentityProvider`]. [`Directory`] is
//! the static, configuration-backed provider used by the server and CLI.

use crate::error::{ArmadaError, Result};
use crate::types::{MemberType, TeamId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// An effective acting principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    #[serde(default)]
    pub teams: BTreeSet<TeamId>,
    #[serde(default)]
    pub is_superuser: bool,
}

impl Identity {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            teams: BTreeSet::new(),
            is_superuser: false,
        }
    }

    pub fn superuser(user_id: UserId) -> Self {
        Self {
            is_superuser: true,
            ..Self::user(user_id)
        }
    }

    pub fn with_teams(mut self, teams: impl IntoIterator<Item = TeamId>) -> Self {
        self.teams.extend(teams);
        self
    }

    /// True if a grant to `(member, member_type)` applies to this principal.
    pub fn matches(&self, member: u64, member_type: MemberType) -> bool {
        match member_type {
            MemberType::User => member == self.user_id,
            MemberType::Team => self.teams.contains(&member),
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityProvider
// ---------------------------------------------------------------------------

pub trait IdentityProvider: Send + Sync {
    /// Resolve a user id to its current identity (team memberships, superuser flag).
    fn resolve(&self, user_id: UserId) -> Result<Identity>;

    /// Whether a grant target exists.
    fn member_exists(&self, member: u64, member_type: MemberType) -> bool;
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryUser {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub superuser: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryTeam {
    pub id: TeamId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<UserId>,
}

/// Static user/team directory loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Directory {
    #[serde(default)]
    pub users: Vec<DirectoryUser>,
    #[serde(default)]
    pub teams: Vec<DirectoryTeam>,
}

impl Directory {
    pub fn add_user(&mut self, id: UserId, name: impl Into<String>, superuser: bool) -> &mut Self {
        self.users.push(DirectoryUser {
            id,
            name: name.into(),
            superuser,
        });
        self
    }

    pub fn add_team(
        &mut self,
        id: TeamId,
        name: impl Into<String>,
        members: impl IntoIterator<Item = UserId>,
    ) -> &mut Self {
        self.teams.push(DirectoryTeam {
            id,
            name: name.into(),
            members: members.into_iter().collect(),
        });
        self
    }

    pub fn find_user(&self, id: UserId) -> Option<&DirectoryUser> {
        self.users.iter().find(|u| u.id == id)
    }
}

impl IdentityProvider for Directory {
    fn resolve(&self, user_id: UserId) -> Result<Identity> {
        let user = self
            .find_user(user_id)
            .ok_or(ArmadaError::UserNotFound(user_id))?;
        let teams = self
            .teams
            .iter()
            .filter(|t| t.members.contains(&user_id))
            .map(|t| t.id);
        Ok(Identity {
            user_id,
            teams: teams.collect(),
            is_superuser: user.superuser,
        })
    }

    fn member_exists(&self, member: u64, member_type: MemberType) -> bool {
        match member_type {
            MemberType::User => self.find_user(member).is_some(),
            MemberType::Team => self.teams.iter().any(|t| t.id == member),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Directory {
        let mut d = Directory::default();
        d.add_user(1, "admin", true)
            .add_user(2, "alice", false)
            .add_user(3, "bob", false)
            .add_team(10, "ops", [2, 3])
            .add_team(11, "dev", [3]);
        d
    }

    #[test]
    fn resolve_collects_team_memberships() {
        let bob = directory().resolve(3).unwrap();
        assert_eq!(bob.teams, BTreeSet::from([10, 11]));
        assert!(!bob.is_superuser);
    }

    #[test]
    fn resolve_carries_superuser_flag() {
        assert!(directory().resolve(1).unwrap().is_superuser);
    }

    #[test]
    fn resolve_unknown_user_fails() {
        let err = directory().resolve(99).unwrap_err();
        assert!(matches!(err, ArmadaError::UserNotFound(99)));
    }

    #[test]
    fn member_exists_distinguishes_types() {
        let d = directory();
        assert!(d.member_exists(2, MemberType::User));
        assert!(!d.member_exists(2, MemberType::Team));
        assert!(d.member_exists(10, MemberType::Team));
    }

    #[test]
    fn identity_matches_direct_and_team_grants() {
        let id = Identity::user(2).with_teams([10]);
        assert!(id.matches(2, MemberType::User));
        assert!(id.matches(10, MemberType::Team));
        assert!(!id.matches(10, MemberType::User));
        assert!(!id.matches(3, MemberType::User));
    }
}
