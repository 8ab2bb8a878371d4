use crate::cmd::{cell, session};
use crate::output::{print_json, print_table};
use armada_core::types::{EntityKind, EntityRef, UserId};
use clap::Subcommand;
use serde_json::Value;
use std::path::Path;

#[derive(Subcommand)]
pub enum HistorySubcommand {
    /// List runs, newest first
    List {
        /// Only runs of this project
        #[arg(long)]
        project: Option<u64>,
    },

    /// Show one run record
    Show { id: u64 },
}

pub fn run(
    root: &Path,
    subcmd: HistorySubcommand,
    user: Option<UserId>,
    json: bool,
) -> anyhow::Result<()> {
    let s = session(root, user)?;
    match subcmd {
        HistorySubcommand::List { project } => {
            let runs = match project {
                Some(id) => s.catalog.project_history(&s.who, id)?,
                None => {
                    let mut all = s.catalog.list(&s.who, EntityKind::History)?;
                    all.reverse();
                    all
                }
            };
            list(&runs, json)
        }
        HistorySubcommand::Show { id } => {
            let record = s.catalog.get(&s.who, EntityRef::history(id))?;
            show(&record, json)
        }
    }
}

fn list(runs: &[Value], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No runs.");
        return Ok(());
    }
    let rows = runs
        .iter()
        .map(|r| {
            ["id", "project", "kind", "mode", "status", "start_time"]
                .iter()
                .map(|k| cell(&r[*k]))
                .collect()
        })
        .collect();
    print_table(&["ID", "PROJECT", "KIND", "MODE", "STATUS", "STARTED"], rows);
    Ok(())
}

fn show(record: &Value, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(record);
    }
    for key in [
        "id",
        "project",
        "initiator_type",
        "initiator",
        "kind",
        "mode",
        "status",
        "start_time",
        "stop_time",
        "execution_time",
        "executor",
        "output_ref",
        "reason",
    ] {
        println!("{key:<15} {}", cell(&record[key]));
    }
    if let Some(args) = record["raw_args"].as_array() {
        let args: Vec<String> = args.iter().map(cell).collect();
        println!("{:<15} {}", "args", args.join(" "));
    }
    Ok(())
}
