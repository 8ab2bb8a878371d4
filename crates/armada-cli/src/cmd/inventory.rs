use crate::cmd::{cell, session};
use crate::output::{print_json, print_table};
use armada_core::types::{EntityRef, UserId};
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand)]
pub enum InventorySubcommand {
    /// Every host reachable from the inventory through its groups
    Hosts { id: u64 },
}

pub fn run(
    root: &Path,
    subcmd: InventorySubcommand,
    user: Option<UserId>,
    json: bool,
) -> anyhow::Result<()> {
    let s = session(root, user)?;
    match subcmd {
        InventorySubcommand::Hosts { id } => {
            let hosts = s.catalog.all_hosts(&s.who, EntityRef::inventory(id))?;
            if json {
                return print_json(&hosts);
            }
            if hosts.is_empty() {
                println!("Inventory {id} has no hosts.");
                return Ok(());
            }
            let rows = hosts
                .iter()
                .map(|h| ["id", "name", "type"].iter().map(|k| cell(&h[*k])).collect())
                .collect();
            print_table(&["ID", "NAME", "TYPE"], rows);
            Ok(())
        }
    }
}
