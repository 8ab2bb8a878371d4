use armada_core::Armada;
use std::path::PathBuf;

/// Shared application state passed to all route handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub root: PathBuf,
    pub armada: Armada,
}

impl AppState {
    pub fn new(root: PathBuf, armada: Armada) -> Self {
        Self { root, armada }
    }
}
