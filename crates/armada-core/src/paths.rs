use crate::error::{ArmadaError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const ARMADA_DIR: &str = ".armada";
pub const CONFIG_FILE: &str = ".armada/config.yaml";
pub const DB_FILE: &str = ".armada/armada.db";
pub const RUNS_DIR: &str = ".armada/runs";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn armada_dir(root: &Path) -> PathBuf {
    root.join(ARMADA_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

/// Default working directory for engine runs.
pub fn runs_dir(root: &Path) -> PathBuf {
    root.join(RUNS_DIR)
}

/// Output file the process engine writes for one history record.
pub fn run_output(root: &Path, history_id: u64) -> PathBuf {
    runs_dir(root).join(format!("{history_id}.log"))
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-:\[\]]*$").unwrap())
}

/// Entity names are inventory identifiers: no whitespace, at most 512 chars.
/// Brackets and colons are allowed for host ranges such as `web[01:10]`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 512 || !name_re().is_match(name) {
        return Err(ArmadaError::Validation(format!("invalid name '{name}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in ["web01", "db.example.com", "web[01:10]", "_meta", "eu-west-1"] {
            validate_name(name).unwrap_or_else(|_| panic!("expected valid: {name}"));
        }
    }

    #[test]
    fn invalid_names() {
        for name in ["", "has space", "-leading", "tab\tname"] {
            assert!(validate_name(name).is_err(), "expected invalid: {name}");
        }
    }

    #[test]
    fn run_output_lives_under_runs_dir() {
        let root = Path::new("/srv/armada");
        assert_eq!(
            run_output(root, 7),
            PathBuf::from("/srv/armada/.armada/runs/7.log")
        );
    }
}
