//! Group/host containment graph.
//!
//! Nodes live in an arena keyed by entity id; edges are stored in both
//! directions (`subgroups` and `parents`) so ancestor and descendant walks are
//! both cheap. Every traversal carries a visited set, so shared subgroups
//! (diamonds) are visited once and a corrupted graph still terminates.
//!
//! The arena is plain data. Atomicity of check-then-insert comes from the
//! store, which runs every edit against a private copy of the snapshot.

use crate::error::{ArmadaError, Result};
use crate::types::{EntityId, EntityKind, EntityRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupNode {
    pub children_allowed: bool,
    #[serde(default)]
    pub subgroups: BTreeSet<EntityId>,
    #[serde(default)]
    pub parents: BTreeSet<EntityId>,
    #[serde(default)]
    pub hosts: BTreeSet<EntityId>,
}

impl GroupNode {
    fn new(children_allowed: bool) -> Self {
        Self {
            children_allowed,
            subgroups: BTreeSet::new(),
            parents: BTreeSet::new(),
            hosts: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryNode {
    #[serde(default)]
    pub hosts: BTreeSet<EntityId>,
    #[serde(default)]
    pub groups: BTreeSet<EntityId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hierarchy {
    #[serde(default)]
    groups: BTreeMap<EntityId, GroupNode>,
    #[serde(default)]
    inventories: BTreeMap<EntityId, InventoryNode>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, id: EntityId) -> Option<&GroupNode> {
        self.groups.get(&id)
    }

    pub fn inventory(&self, id: EntityId) -> Option<&InventoryNode> {
        self.inventories.get(&id)
    }

    // -----------------------------------------------------------------------
    // Node registration
    // -----------------------------------------------------------------------

    /// Register a new group node. `children_allowed` is fixed from here on.
    pub fn register_group(&mut self, id: EntityId, children_allowed: bool) -> Result<()> {
        if let Some(existing) = self.groups.get(&id) {
            return check_children_unchanged(id, existing.children_allowed, children_allowed);
        }
        self.groups.insert(id, GroupNode::new(children_allowed));
        Ok(())
    }

    pub fn register_inventory(&mut self, id: EntityId) {
        self.inventories.entry(id).or_default();
    }

    /// Accepts only the value the group was created with.
    pub fn set_children_allowed(&mut self, id: EntityId, children_allowed: bool) -> Result<()> {
        let node = self.group_node(id)?;
        check_children_unchanged(id, node.children_allowed, children_allowed)
    }

    // -----------------------------------------------------------------------
    // Group edges
    // -----------------------------------------------------------------------

    pub fn add_subgroup(&mut self, parent: EntityId, child: EntityId) -> Result<()> {
        let parent_node = self.group_node(parent)?;
        self.group_node(child)?;

        if !parent_node.children_allowed {
            return Err(ArmadaError::conflict(format!(
                "group {parent} holds hosts only and cannot take subgroups"
            )));
        }
        if parent == child {
            return Err(ArmadaError::conflict(format!(
                "group {parent} cannot contain itself"
            )));
        }
        if self.ancestors(parent).contains(&child) || self.descendants(child).contains(&parent) {
            return Err(ArmadaError::conflict(format!(
                "adding group {child} under group {parent} would create a cycle"
            )));
        }

        if let Some(node) = self.groups.get_mut(&parent) {
            node.subgroups.insert(child);
        }
        if let Some(node) = self.groups.get_mut(&child) {
            node.parents.insert(parent);
        }
        Ok(())
    }

    /// Returns whether the edge existed.
    pub fn remove_subgroup(&mut self, parent: EntityId, child: EntityId) -> Result<bool> {
        self.group_node(parent)?;
        let removed = self
            .groups
            .get_mut(&parent)
            .map(|n| n.subgroups.remove(&child))
            .unwrap_or(false);
        if let Some(node) = self.groups.get_mut(&child) {
            node.parents.remove(&parent);
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Host / inventory edges
    // -----------------------------------------------------------------------

    /// Attach a host to a group or inventory.
    pub fn add_host(&mut self, container: EntityRef, host: EntityId) -> Result<()> {
        match container.kind {
            EntityKind::Group => {
                let node = self.group_node_mut(container.id)?;
                if node.children_allowed {
                    return Err(ArmadaError::conflict(format!(
                        "group {} holds subgroups only and cannot take hosts",
                        container.id
                    )));
                }
                node.hosts.insert(host);
                Ok(())
            }
            EntityKind::Inventory => {
                self.inventory_node_mut(container.id)?.hosts.insert(host);
                Ok(())
            }
            other => Err(not_a_container(other)),
        }
    }

    pub fn remove_host(&mut self, container: EntityRef, host: EntityId) -> Result<bool> {
        match container.kind {
            EntityKind::Group => Ok(self.group_node_mut(container.id)?.hosts.remove(&host)),
            EntityKind::Inventory => Ok(self.inventory_node_mut(container.id)?.hosts.remove(&host)),
            other => Err(not_a_container(other)),
        }
    }

    pub fn add_group(&mut self, inventory: EntityId, group: EntityId) -> Result<()> {
        self.group_node(group)?;
        self.inventory_node_mut(inventory)?.groups.insert(group);
        Ok(())
    }

    pub fn remove_group(&mut self, inventory: EntityId, group: EntityId) -> Result<bool> {
        Ok(self.inventory_node_mut(inventory)?.groups.remove(&group))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Deduplicated union of direct hosts and hosts of every reachable subgroup.
    pub fn all_hosts(&self, container: EntityRef) -> Result<BTreeSet<EntityId>> {
        let (mut hosts, roots) = match container.kind {
            EntityKind::Group => {
                self.group_node(container.id)?;
                (BTreeSet::new(), BTreeSet::from([container.id]))
            }
            EntityKind::Inventory => {
                let node = self.inventory_node(container.id)?;
                (node.hosts.clone(), node.groups.clone())
            }
            other => return Err(not_a_container(other)),
        };
        for gid in self.closure(roots) {
            if let Some(node) = self.groups.get(&gid) {
                hosts.extend(node.hosts.iter().copied());
            }
        }
        Ok(hosts)
    }

    /// Every group reachable from an inventory, its direct groups included.
    pub fn all_groups(&self, inventory: EntityId) -> Result<BTreeSet<EntityId>> {
        let node = self.inventory_node(inventory)?;
        Ok(self.closure(node.groups.clone()))
    }

    /// Transitive parents of `group`, not including itself.
    pub fn ancestors(&self, group: EntityId) -> BTreeSet<EntityId> {
        self.walk(group, |n| &n.parents)
    }

    /// Transitive subgroups of `group`, not including itself.
    pub fn descendants(&self, group: EntityId) -> BTreeSet<EntityId> {
        self.walk(group, |n| &n.subgroups)
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Drop every edge referencing `host`.
    pub fn forget_host(&mut self, host: EntityId) {
        for node in self.groups.values_mut() {
            node.hosts.remove(&host);
        }
        for node in self.inventories.values_mut() {
            node.hosts.remove(&host);
        }
    }

    /// Drop the group node and every edge referencing it.
    pub fn forget_group(&mut self, group: EntityId) {
        self.groups.remove(&group);
        for node in self.groups.values_mut() {
            node.subgroups.remove(&group);
            node.parents.remove(&group);
        }
        for node in self.inventories.values_mut() {
            node.groups.remove(&group);
        }
    }

    pub fn forget_inventory(&mut self, inventory: EntityId) {
        self.inventories.remove(&inventory);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn closure(&self, roots: BTreeSet<EntityId>) -> BTreeSet<EntityId> {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<EntityId> = roots.into_iter().collect();
        while let Some(gid) = stack.pop() {
            if !visited.insert(gid) {
                continue;
            }
            if let Some(node) = self.groups.get(&gid) {
                stack.extend(node.subgroups.iter().filter(|g| !visited.contains(g)));
            }
        }
        visited
    }

    fn walk<F>(&self, start: EntityId, next: F) -> BTreeSet<EntityId>
    where
        F: Fn(&GroupNode) -> &BTreeSet<EntityId>,
    {
        let mut visited = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(gid) = stack.pop() {
            if let Some(node) = self.groups.get(&gid) {
                for &n in next(node) {
                    if visited.insert(n) {
                        stack.push(n);
                    }
                }
            }
        }
        visited.remove(&start);
        visited
    }

    fn group_node(&self, id: EntityId) -> Result<&GroupNode> {
        self.groups
            .get(&id)
            .ok_or(ArmadaError::NotFound(EntityRef::group(id)))
    }

    fn group_node_mut(&mut self, id: EntityId) -> Result<&mut GroupNode> {
        self.groups
            .get_mut(&id)
            .ok_or(ArmadaError::NotFound(EntityRef::group(id)))
    }

    fn inventory_node(&self, id: EntityId) -> Result<&InventoryNode> {
        self.inventories
            .get(&id)
            .ok_or(ArmadaError::NotFound(EntityRef::inventory(id)))
    }

    fn inventory_node_mut(&mut self, id: EntityId) -> Result<&mut InventoryNode> {
        self.inventories
            .get_mut(&id)
            .ok_or(ArmadaError::NotFound(EntityRef::inventory(id)))
    }
}

fn check_children_unchanged(id: EntityId, current: bool, requested: bool) -> Result<()> {
    if current == requested {
        Ok(())
    } else {
        Err(ArmadaError::conflict(format!(
            "group {id}: the children flag is fixed at creation and cannot change"
        )))
    }
}

fn not_a_container(kind: EntityKind) -> ArmadaError {
    ArmadaError::validation(format!("{kind} cannot hold hosts or groups"))
}
