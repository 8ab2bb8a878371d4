use std::path::{Path, PathBuf};

use armada_core::paths::ARMADA_DIR;

/// Resolve the workspace root.
///
/// `--root` / `ARMADA_ROOT` wins; otherwise walk upward from the current
/// directory looking for `.armada/`, falling back to the current directory.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root(&cwd).unwrap_or(cwd)
}

fn find_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(ARMADA_DIR).is_dir())
        .map(Path::to_path_buf)
}
