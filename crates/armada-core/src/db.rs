//! redb-backed [`Persistence`].
//!
//! # Table design
//!
//! One table per stored kind, keyed by entity id (`u64`) with JSON-encoded
//! rows. The `meta` table holds the hierarchy arena and the id sequence under
//! fixed string keys. A commit writes only the rows that differ between the
//! two snapshots, all inside one write transaction.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

use crate::error::{ArmadaError, Result};
use crate::store::{diff_table, Persistence, Snapshot};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const HOSTS: TableDefinition<u64, &[u8]> = TableDefinition::new("hosts");
const GROUPS: TableDefinition<u64, &[u8]> = TableDefinition::new("groups");
const INVENTORIES: TableDefinition<u64, &[u8]> = TableDefinition::new("inventories");
const PROJECTS: TableDefinition<u64, &[u8]> = TableDefinition::new("projects");
const TEMPLATES: TableDefinition<u64, &[u8]> = TableDefinition::new("templates");
const PERIODIC_TASKS: TableDefinition<u64, &[u8]> = TableDefinition::new("periodic_tasks");
const HISTORY: TableDefinition<u64, &[u8]> = TableDefinition::new("history");

/// Key: fixed name. Value: JSON.
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const META_HIERARCHY: &str = "hierarchy";
const META_LAST_ID: &str = "last_id";

fn db_err(e: impl std::fmt::Display) -> ArmadaError {
    ArmadaError::Db(e.to_string())
}

// ---------------------------------------------------------------------------
// RedbPersistence
// ---------------------------------------------------------------------------

pub struct RedbPersistence {
    db: Database,
}

impl RedbPersistence {
    /// Open or create the database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        for def in [HOSTS, GROUPS, INVENTORIES, PROJECTS, TEMPLATES, PERIODIC_TASKS, HISTORY] {
            wt.open_table(def).map_err(db_err)?;
        }
        wt.open_table(META).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }
}

impl Persistence for RedbPersistence {
    fn load(&self) -> Result<Snapshot> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let mut snap = Snapshot {
            hosts: read_rows(&rt, HOSTS)?,
            groups: read_rows(&rt, GROUPS)?,
            inventories: read_rows(&rt, INVENTORIES)?,
            projects: read_rows(&rt, PROJECTS)?,
            templates: read_rows(&rt, TEMPLATES)?,
            periodic_tasks: read_rows(&rt, PERIODIC_TASKS)?,
            history: read_rows(&rt, HISTORY)?,
            ..Snapshot::default()
        };

        let meta = rt.open_table(META).map_err(db_err)?;
        if let Some(v) = meta.get(META_HIERARCHY).map_err(db_err)? {
            snap.hierarchy = serde_json::from_slice(v.value())?;
        }
        if let Some(v) = meta.get(META_LAST_ID).map_err(db_err)? {
            snap.last_id = serde_json::from_slice(v.value())?;
        }
        snap.reindex_runs();
        Ok(snap)
    }

    fn commit(&self, before: &Snapshot, after: &Snapshot) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        write_rows(&wt, HOSTS, &before.hosts, &after.hosts)?;
        write_rows(&wt, GROUPS, &before.groups, &after.groups)?;
        write_rows(&wt, INVENTORIES, &before.inventories, &after.inventories)?;
        write_rows(&wt, PROJECTS, &before.projects, &after.projects)?;
        write_rows(&wt, TEMPLATES, &before.templates, &after.templates)?;
        write_rows(&wt, PERIODIC_TASKS, &before.periodic_tasks, &after.periodic_tasks)?;
        write_rows(&wt, HISTORY, &before.history, &after.history)?;
        {
            let mut meta = wt.open_table(META).map_err(db_err)?;
            if before.hierarchy != after.hierarchy {
                let value = serde_json::to_vec(&after.hierarchy)?;
                meta.insert(META_HIERARCHY, value.as_slice()).map_err(db_err)?;
            }
            if before.last_id != after.last_id {
                let value = serde_json::to_vec(&after.last_id)?;
                meta.insert(META_LAST_ID, value.as_slice()).map_err(db_err)?;
            }
        }
        // Dropping an uncommitted transaction aborts it, so an early return
        // above leaves the file untouched.
        wt.commit().map_err(db_err)?;
        Ok(())
    }
}

fn read_rows<T: DeserializeOwned>(
    rt: &ReadTransaction,
    def: TableDefinition<'static, u64, &'static [u8]>,
) -> Result<BTreeMap<u64, T>> {
    let table = rt.open_table(def).map_err(db_err)?;
    let mut rows = BTreeMap::new();
    for entry in table.iter().map_err(db_err)? {
        let (k, v) = entry.map_err(db_err)?;
        rows.insert(k.value(), serde_json::from_slice(v.value())?);
    }
    Ok(rows)
}

fn write_rows<T: Serialize + PartialEq>(
    wt: &WriteTransaction,
    def: TableDefinition<'static, u64, &'static [u8]>,
    before: &BTreeMap<u64, T>,
    after: &BTreeMap<u64, T>,
) -> Result<()> {
    let diff = diff_table(before, after);
    if diff.is_empty() {
        return Ok(());
    }
    let mut table = wt.open_table(def).map_err(db_err)?;
    for (id, row) in diff.upserts {
        let value = serde_json::to_vec(row)?;
        table.insert(id, value.as_slice()).map_err(db_err)?;
    }
    for id in diff.deletes {
        table.remove(id).map_err(db_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
