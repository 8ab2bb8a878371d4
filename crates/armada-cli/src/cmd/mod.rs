pub mod config;
pub mod history;
pub mod init;
pub mod inventory;
pub mod serve;

use std::path::Path;

use anyhow::Context;
use armada_core::catalog::Catalog;
use armada_core::config::Config;
use armada_core::hooks::HookRegistry;
use armada_core::identity::{Identity, IdentityProvider};
use armada_core::types::UserId;

/// Read-side access to the store, acting as one directory user.
pub struct Session {
    pub catalog: Catalog,
    pub who: Identity,
}

/// Open the store under `root` as `user`, or as the first superuser in the
/// directory when no user is given.
pub fn session(root: &Path, user: Option<UserId>) -> anyhow::Result<Session> {
    let config = Config::load(root).context("failed to load config")?;
    let user = match user {
        Some(id) => id,
        None => config
            .directory
            .users
            .iter()
            .find(|u| u.superuser)
            .map(|u| u.id)
            .context("no superuser in the directory; pass --user")?,
    };
    let who = config
        .directory
        .resolve(user)
        .with_context(|| format!("cannot act as user {user}"))?;
    let store = armada_core::open_store(root, &config, HookRegistry::new())
        .context("failed to open the store (is a server holding it?)")?;
    Ok(Session {
        catalog: Catalog::new(store),
        who,
    })
}

/// Render a JSON scalar for a table cell.
pub fn cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "-".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
