use crate::error::{ArmadaError, Result};
use crate::identity::Directory;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8640".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

// ---------------------------------------------------------------------------
// StorageConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Nothing survives a restart.
    Memory,
    #[default]
    Redb,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database file, relative to the root. Defaults to `.armada/armada.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn db_path(&self, root: &Path) -> PathBuf {
        match &self.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => root.join(p),
            None => paths::db_path(root),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_playbook_bin")]
    pub playbook_bin: String,
    #[serde(default = "default_module_bin")]
    pub module_bin: String,
    /// Working directory for runs. Defaults to the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
}

fn default_playbook_bin() -> String {
    "ansible-playbook".to_string()
}

fn default_module_bin() -> String {
    "ansible".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            playbook_bin: default_playbook_bin(),
            module_bin: default_module_bin(),
            workdir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub directory: Directory,
}

impl Config {
    /// Default config with one superuser named `admin`.
    pub fn new() -> Self {
        let mut cfg = Self::default();
        cfg.directory.add_user(1, "admin", true);
        cfg
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ArmadaError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let mut user_ids = BTreeSet::new();
        for user in &self.directory.users {
            if !user_ids.insert(user.id) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("duplicate user id {} in directory.users", user.id),
                });
            }
        }

        let mut team_ids = BTreeSet::new();
        for team in &self.directory.teams {
            if !team_ids.insert(team.id) {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("duplicate team id {} in directory.teams", team.id),
                });
            }
            for member in &team.members {
                if !user_ids.contains(member) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!(
                            "team '{}' lists member {member}, which is not a known user",
                            team.name
                        ),
                    });
                }
            }
        }

        if !self.directory.users.iter().any(|u| u.superuser) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "no superuser in directory.users; entities can only be managed by their owners"
                    .to_string(),
            });
        }

        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("server.bind '{}' is not a socket address", self.server.bind),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::new();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server.bind, "127.0.0.1:8640");
        assert_eq!(parsed.storage.backend, StorageBackend::Redb);
        assert_eq!(parsed.engine.playbook_bin, "ansible-playbook");
        assert_eq!(parsed.directory, cfg.directory);
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("storage:\n  backend: memory\n").unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.engine.module_bin, "ansible");
        assert!(cfg.directory.users.is_empty());
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ArmadaError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::new();
        cfg.server.bind = "0.0.0.0:9000".into();
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn db_path_resolves_relative_to_root() {
        let root = Path::new("/srv/armada");
        let mut storage = StorageConfig::default();
        assert_eq!(storage.db_path(root), root.join(".armada/armada.db"));
        storage.path = Some("data/a.db".into());
        assert_eq!(storage.db_path(root), root.join("data/a.db"));
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(Config::new().validate().is_empty());
    }

    #[test]
    fn validate_reports_directory_problems() {
        let mut cfg = Config::default();
        cfg.directory
            .add_user(1, "alice", false)
            .add_user(1, "bob", false)
            .add_team(10, "ops", [1, 7]);
        let warnings = cfg.validate();
        let messages: Vec<&str> = warnings.iter().map(|w| w.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("duplicate user id 1")));
        assert!(messages.iter().any(|m| m.contains("member 7")));
        assert!(messages.iter().any(|m| m.contains("no superuser")));
        assert!(warnings.iter().any(|w| w.level == WarnLevel::Error));
    }

    #[test]
    fn validate_rejects_bad_bind() {
        let mut cfg = Config::new();
        cfg.server.bind = "localhost".into();
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].level, WarnLevel::Error);
    }
}
