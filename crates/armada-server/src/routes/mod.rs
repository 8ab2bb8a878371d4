pub mod entities;
pub mod execute;
pub mod hierarchy;
pub mod history;
pub mod owner;
pub mod permissions;
pub mod variables;

use armada_core::types::{EntityKind, EntityRef};

use crate::error::AppError;

/// Run a blocking core operation off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> armada_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))?;
    Ok(result?)
}

/// `/api/{kind}` segment to an entity kind.
pub(crate) fn kind(collection: &str) -> Result<EntityKind, AppError> {
    EntityKind::from_collection(collection)
        .ok_or_else(|| AppError::not_found(format!("unknown collection '{collection}'")))
}

pub(crate) fn target(collection: &str, id: u64) -> Result<EntityRef, AppError> {
    Ok(EntityRef::new(kind(collection)?, id))
}

/// Like [`target`], restricted to the kinds a route applies to.
pub(crate) fn target_of(collection: &str, id: u64, allowed: &[EntityKind]) -> Result<EntityRef, AppError> {
    let target = target(collection, id)?;
    if !allowed.contains(&target.kind) {
        return Err(AppError::not_found(format!(
            "route not available for {collection}"
        )));
    }
    Ok(target)
}
