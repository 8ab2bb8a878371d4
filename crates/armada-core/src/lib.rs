pub mod acl;
pub mod catalog;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod hierarchy;
pub mod history;
pub mod hooks;
pub mod identity;
pub mod io;
pub mod materialize;
pub mod paths;
pub mod permissions;
pub mod store;
pub mod template;
pub mod types;
pub mod variables;

pub use error::{ArmadaError, Result};

use std::path::Path;
use std::sync::Arc;

use catalog::Catalog;
use config::{Config, StorageBackend};
use dispatch::{Dispatcher, ExecutionEngine};
use hooks::HookRegistry;
use identity::IdentityProvider;
use permissions::PermissionEvaluator;
use store::{MemoryPersistence, Persistence, Store};

/// Open the configured persistence under `root` and load its snapshot.
pub fn open_store(root: &Path, config: &Config, hooks: HookRegistry) -> Result<Arc<Store>> {
    let persistence: Box<dyn Persistence> = match config.storage.backend {
        StorageBackend::Memory => Box::new(MemoryPersistence),
        StorageBackend::Redb => Box::new(db::RedbPersistence::open(&config.storage.db_path(root))?),
    };
    Ok(Arc::new(Store::open(persistence, hooks)?))
}

/// Everything a transport needs, wired over one store.
#[derive(Clone)]
pub struct Armada {
    pub store: Arc<Store>,
    pub identities: Arc<dyn IdentityProvider>,
    pub permissions: PermissionEvaluator,
    pub catalog: Catalog,
    pub dispatcher: Dispatcher,
}

impl Armada {
    /// Open the configured store under `root` and wire the services.
    pub fn open(
        root: &Path,
        config: &Config,
        engine: Arc<dyn ExecutionEngine>,
        hooks: HookRegistry,
    ) -> Result<Self> {
        let store = open_store(root, config, hooks)?;
        let identities: Arc<dyn IdentityProvider> = Arc::new(config.directory.clone());
        Ok(Self::from_parts(store, identities, engine))
    }

    pub fn from_parts(
        store: Arc<Store>,
        identities: Arc<dyn IdentityProvider>,
        engine: Arc<dyn ExecutionEngine>,
    ) -> Self {
        Self {
            permissions: PermissionEvaluator::new(store.clone(), identities.clone()),
            catalog: Catalog::new(store.clone()),
            dispatcher: Dispatcher::new(store.clone(), identities.clone(), engine),
            store,
            identities,
        }
    }
}

impl std::fmt::Debug for Armada {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Armada")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
