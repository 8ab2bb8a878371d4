//! Self-contained inventory handed to the execution engine.
//!
//! Variables here are raw: the engine needs the real secrets. Nothing in this
//! module is ever returned to clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{Group, Host, Inventory};
use crate::error::{ArmadaError, Result};
use crate::store::Snapshot;
use crate::template::InventorySource;
use crate::types::{EntityId, EntityRef};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterializedGroup {
    pub vars: BTreeMap<String, Value>,
    pub hosts: Vec<String>,
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaterializedInventory {
    Stored {
        id: EntityId,
        vars: BTreeMap<String, Value>,
        /// Host name to raw host variables.
        hosts: BTreeMap<String, BTreeMap<String, Value>>,
        /// Hosts attached to the inventory itself rather than to a group.
        ungrouped: Vec<String>,
        groups: BTreeMap<String, MaterializedGroup>,
    },
    Inline {
        text: String,
    },
}

/// Engine inventories address hosts and groups by name, so two distinct
/// members sharing a name cannot both be represented.
fn claim_name(
    seen: &mut BTreeMap<String, EntityId>,
    name: &str,
    member: EntityId,
    what: &str,
    inventory: EntityId,
) -> Result<()> {
    match seen.insert(name.to_string(), member) {
        Some(other) if other != member => Err(ArmadaError::validation(format!(
            "inventory {inventory} reaches two {what}s named '{name}' ({other} and {member})"
        ))),
        _ => Ok(()),
    }
}

impl MaterializedInventory {
    /// Resolve `source` against one snapshot.
    pub fn build(snap: &Snapshot, source: &InventorySource) -> Result<Self> {
        let id = match source {
            InventorySource::Inline(text) => return Ok(Self::Inline { text: text.clone() }),
            InventorySource::Id(id) => *id,
        };
        let inventory = snap.get::<Inventory>(id)?;
        let node = snap
            .hierarchy
            .inventory(id)
            .cloned()
            .unwrap_or_default();

        let mut host_ids = BTreeMap::new();
        let mut hosts = BTreeMap::new();
        for hid in snap.hierarchy.all_hosts(EntityRef::inventory(id))? {
            let host = snap.get::<Host>(hid)?;
            claim_name(&mut host_ids, &host.name, hid, "host", id)?;
            hosts.insert(host.name.clone(), host.vars.get_all().clone());
        }

        let host_name = |hid: &EntityId| snap.get::<Host>(*hid).map(|h| h.name.clone());
        let group_name = |gid: &EntityId| snap.get::<Group>(*gid).map(|g| g.name.clone());

        let ungrouped = node.hosts.iter().map(host_name).collect::<Result<Vec<_>>>()?;

        let mut group_ids = BTreeMap::new();
        let mut groups = BTreeMap::new();
        for gid in snap.hierarchy.all_groups(id)? {
            let group = snap.get::<Group>(gid)?;
            claim_name(&mut group_ids, &group.name, gid, "group", id)?;
            let Some(gnode) = snap.hierarchy.group(gid) else {
                continue;
            };
            groups.insert(
                group.name.clone(),
                MaterializedGroup {
                    vars: group.vars.get_all().clone(),
                    hosts: gnode.hosts.iter().map(host_name).collect::<Result<_>>()?,
                    children: gnode.subgroups.iter().map(group_name).collect::<Result<_>>()?,
                },
            );
        }

        Ok(Self::Stored {
            id,
            vars: inventory.vars.get_all().clone(),
            hosts,
            ungrouped,
            groups,
        })
    }

    /// Ansible YAML inventory text.
    pub fn to_ansible_yaml(&self) -> Result<String> {
        let (vars, hosts, groups) = match self {
            Self::Inline { text } => return Ok(text.clone()),
            Self::Stored {
                vars, hosts, groups, ..
            } => (vars, hosts, groups),
        };

        let mut all = Map::new();
        if !vars.is_empty() {
            all.insert("vars".into(), to_object(vars));
        }

        // Host variables are attached once, at the top level.
        let mut all_hosts = Map::new();
        for (name, hv) in hosts {
            all_hosts.insert(name.clone(), to_object(hv));
        }
        if !all_hosts.is_empty() {
            all.insert("hosts".into(), Value::Object(all_hosts));
        }

        let mut children = Map::new();
        for (name, group) in groups {
            let mut g = Map::new();
            if !group.vars.is_empty() {
                g.insert("vars".into(), to_object(&group.vars));
            }
            if !group.hosts.is_empty() {
                let members = group
                    .hosts
                    .iter()
                    .map(|h| (h.clone(), Value::Null))
                    .collect::<Map<_, _>>();
                g.insert("hosts".into(), Value::Object(members));
            }
            if !group.children.is_empty() {
                let members = group
                    .children
                    .iter()
                    .map(|c| (c.clone(), Value::Null))
                    .collect::<Map<_, _>>();
                g.insert("children".into(), Value::Object(members));
            }
            children.insert(name.clone(), Value::Object(g));
        }
        if !children.is_empty() {
            all.insert("children".into(), Value::Object(children));
        }

        let mut root = Map::new();
        root.insert("all".into(), Value::Object(all));
        Ok(serde_yaml::to_string(&Value::Object(root))?)
    }
}

fn to_object(vars: &BTreeMap<String, Value>) -> Value {
    Value::Object(vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::Acl;
    use crate::entity::HostType;
    use crate::variables::Variables;
    use serde_json::json;

    fn snapshot() -> Snapshot {
        let mut s = Snapshot::default();
        for (id, name) in [(1, "web01"), (2, "web02"), (3, "db01")] {
            let mut vars = Variables::new();
            vars.set("ansible_ssh_pass", json!(format!("pw-{name}"))).unwrap();
            s.insert(Host {
                id,
                name: name.into(),
                host_type: HostType::Host,
                acl: Acl::new(1),
                vars,
                notes: String::new(),
            });
        }
        for (id, name, children) in [(10, "services", true), (11, "web", false), (12, "db", false)] {
            s.insert(Group {
                id,
                name: name.into(),
                children,
                acl: Acl::new(1),
                vars: Variables::new(),
                notes: String::new(),
            });
            s.hierarchy.register_group(id, children).unwrap();
        }
        let mut inv_vars = Variables::new();
        inv_vars.set("ansible_user", json!("deploy")).unwrap();
        s.insert(Inventory {
            id: 20,
            name: "prod".into(),
            acl: Acl::new(1),
            vars: inv_vars,
            notes: String::new(),
        });
        s.hierarchy.register_inventory(20);
        s.hierarchy.add_group(20, 10).unwrap();
        s.hierarchy.add_subgroup(10, 11).unwrap();
        s.hierarchy.add_subgroup(10, 12).unwrap();
        s.hierarchy.add_host(EntityRef::group(11), 1).unwrap();
        s.hierarchy.add_host(EntityRef::group(11), 2).unwrap();
        s.hierarchy.add_host(EntityRef::group(12), 3).unwrap();
        s
    }

    #[test]
    fn stored_inventory_carries_raw_vars_and_structure() {
        let inv = MaterializedInventory::build(&snapshot(), &InventorySource::Id(20)).unwrap();
        let MaterializedInventory::Stored {
            vars, hosts, groups, ..
        } = inv
        else {
            panic!("expected stored inventory");
        };
        assert_eq!(vars["ansible_user"], json!("deploy"));
        assert_eq!(hosts.len(), 3);
        // raw, not masked
        assert_eq!(hosts["web01"]["ansible_ssh_pass"], json!("pw-web01"));
        assert_eq!(groups["services"].children, vec!["web", "db"]);
        assert_eq!(groups["web"].hosts, vec!["web01", "web02"]);
    }

    #[test]
    fn inline_passes_through() {
        let src = InventorySource::Inline("localhost ansible_connection=local\n".into());
        let inv = MaterializedInventory::build(&Snapshot::default(), &src).unwrap();
        assert_eq!(
            inv.to_ansible_yaml().unwrap(),
            "localhost ansible_connection=local\n"
        );
    }

    #[test]
    fn yaml_rendering_nests_groups_under_all() {
        let inv = MaterializedInventory::build(&snapshot(), &InventorySource::Id(20)).unwrap();
        let yaml = inv.to_ansible_yaml().unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let all = &parsed["all"];
        assert_eq!(all["vars"]["ansible_user"], serde_yaml::Value::from("deploy"));
        assert_eq!(all["children"]["web"]["hosts"].as_mapping().unwrap().len(), 2);
        assert!(all["children"]["services"]["children"]
            .as_mapping()
            .unwrap()
            .get("db")
            .is_some());
        assert_eq!(
            all["hosts"]["db01"]["ansible_ssh_pass"],
            serde_yaml::Value::from("pw-db01")
        );
    }

    #[test]
    fn same_host_through_two_groups_is_fine() {
        let mut s = snapshot();
        s.hierarchy.add_host(EntityRef::group(12), 1).unwrap();
        let inv = MaterializedInventory::build(&s, &InventorySource::Id(20)).unwrap();
        let MaterializedInventory::Stored { hosts, .. } = inv else {
            panic!("expected stored inventory");
        };
        assert_eq!(hosts.len(), 3);
    }

    #[test]
    fn distinct_hosts_sharing_a_name_are_rejected() {
        let mut s = snapshot();
        let mut vars = Variables::new();
        vars.set("ansible_host", json!("10.0.0.9")).unwrap();
        s.insert(Host {
            id: 4,
            name: "web01".into(),
            host_type: HostType::Host,
            acl: Acl::new(1),
            vars,
            notes: String::new(),
        });
        s.hierarchy.add_host(EntityRef::group(12), 4).unwrap();

        let err = MaterializedInventory::build(&s, &InventorySource::Id(20)).unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(ref m) if m.contains("web01")));
    }

    #[test]
    fn distinct_groups_sharing_a_name_are_rejected() {
        let mut s = snapshot();
        s.insert(Group {
            id: 13,
            name: "web".into(),
            children: false,
            acl: Acl::new(1),
            vars: Variables::new(),
            notes: String::new(),
        });
        s.hierarchy.register_group(13, false).unwrap();
        s.hierarchy.add_subgroup(10, 13).unwrap();

        let err = MaterializedInventory::build(&s, &InventorySource::Id(20)).unwrap_err();
        assert!(matches!(err, ArmadaError::Validation(_)));
    }

    #[test]
    fn missing_inventory_is_not_found() {
        let err = MaterializedInventory::build(&Snapshot::default(), &InventorySource::Id(4))
            .unwrap_err();
        assert!(matches!(err, crate::error::ArmadaError::NotFound(_)));
    }
}
