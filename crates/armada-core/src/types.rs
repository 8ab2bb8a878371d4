use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

pub type UserId = u64;
pub type TeamId = u64;
pub type EntityId = u64;
pub type HistoryId = u64;

// ---------------------------------------------------------------------------
// EntityKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Host,
    Group,
    Inventory,
    Project,
    Template,
    PeriodicTask,
    History,
}

impl EntityKind {
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Host,
            EntityKind::Group,
            EntityKind::Inventory,
            EntityKind::Project,
            EntityKind::Template,
            EntityKind::PeriodicTask,
            EntityKind::History,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Host => "host",
            EntityKind::Group => "group",
            EntityKind::Inventory => "inventory",
            EntityKind::Project => "project",
            EntityKind::Template => "template",
            EntityKind::PeriodicTask => "periodic_task",
            EntityKind::History => "history",
        }
    }

    /// Plural collection name, as used in URLs.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Host => "hosts",
            EntityKind::Group => "groups",
            EntityKind::Inventory => "inventories",
            EntityKind::Project => "projects",
            EntityKind::Template => "templates",
            EntityKind::PeriodicTask => "periodic_tasks",
            EntityKind::History => "history",
        }
    }

    pub fn from_collection(s: &str) -> Option<Self> {
        EntityKind::all()
            .iter()
            .copied()
            .find(|k| k.collection() == s)
    }

    /// Variable keys whose values never leave the system unmasked.
    pub fn hidden_keys(self) -> &'static [&'static str] {
        match self {
            EntityKind::Host | EntityKind::Group | EntityKind::Inventory => {
                &["ansible_ssh_pass", "ansible_become_pass"]
            }
            EntityKind::Project => &["repo_password", "repo_key"],
            EntityKind::Template | EntityKind::PeriodicTask => &[
                "key-file",
                "private-key",
                "vault-password-file",
                "new-vault-password-file",
            ],
            EntityKind::History => &[],
        }
    }

    /// Whether entities of this kind carry their own ACL.
    pub fn has_acl(self) -> bool {
        !matches!(self, EntityKind::PeriodicTask | EntityKind::History)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EntityRef
// ---------------------------------------------------------------------------

/// Stable address of one stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self { kind, id }
    }

    pub fn host(id: EntityId) -> Self {
        Self::new(EntityKind::Host, id)
    }

    pub fn group(id: EntityId) -> Self {
        Self::new(EntityKind::Group, id)
    }

    pub fn inventory(id: EntityId) -> Self {
        Self::new(EntityKind::Inventory, id)
    }

    pub fn project(id: EntityId) -> Self {
        Self::new(EntityKind::Project, id)
    }

    pub fn template(id: EntityId) -> Self {
        Self::new(EntityKind::Template, id)
    }

    pub fn periodic_task(id: EntityId) -> Self {
        Self::new(EntityKind::PeriodicTask, id)
    }

    pub fn history(id: HistoryId) -> Self {
        Self::new(EntityKind::History, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

// ---------------------------------------------------------------------------
// Role / MemberType
// ---------------------------------------------------------------------------

/// Grant level. Declaration order is the privilege order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Read and execute.
    Executor,
    /// Write and edit.
    Editor,
    /// Full control.
    Master,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Executor => "EXECUTOR",
            Role::Editor => "EDITOR",
            Role::Master => "MASTER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::ArmadaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXECUTOR" => Ok(Role::Executor),
            "EDITOR" => Ok(Role::Editor),
            "MASTER" => Ok(Role::Master),
            _ => Err(crate::error::ArmadaError::Validation(format!(
                "unknown role '{s}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberType {
    User,
    Team,
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemberType::User => "user",
            MemberType::Team => "team",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_totally_ordered() {
        assert!(Role::Executor < Role::Editor);
        assert!(Role::Editor < Role::Master);
        assert_eq!(
            [Role::Editor, Role::Master, Role::Executor].iter().max(),
            Some(&Role::Master)
        );
    }

    #[test]
    fn role_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Role::Master).unwrap(), "\"MASTER\"");
        let r: Role = serde_json::from_str("\"EXECUTOR\"").unwrap();
        assert_eq!(r, Role::Executor);
    }

    #[test]
    fn collection_names_round_trip() {
        for kind in EntityKind::all() {
            assert_eq!(EntityKind::from_collection(kind.collection()), Some(*kind));
        }
        assert_eq!(EntityKind::from_collection("users"), None);
    }

    #[test]
    fn periodic_tasks_have_no_acl() {
        assert!(!EntityKind::PeriodicTask.has_acl());
        assert!(!EntityKind::History.has_acl());
        assert!(EntityKind::Template.has_acl());
    }

    #[test]
    fn project_hides_repository_credentials() {
        let hidden = EntityKind::Project.hidden_keys();
        assert!(hidden.contains(&"repo_password"));
        assert!(hidden.contains(&"repo_key"));
        assert!(!hidden.contains(&"repo_branch"));
    }
}
