//! Runtime configuration

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{GateError, Result};

/// Who may set a view-role override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewRolePolicy {
    /// Any user, bounded to roles at or below their own
    #[default]
    AnyUser,
    /// Only superadmins
    SuperadminOnly,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    /// LMDB directory for the membership store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// LMDB map size in bytes
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub view_role_policy: ViewRolePolicy,

    /// How many applied membership changes the admin keeps for display
    #[serde(default = "default_recent_changes")]
    pub recent_changes: usize,
}

fn default_db_path() -> String {
    "data/sopgate".to_string()
}

fn default_map_size() -> usize {
    1 << 30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_recent_changes() -> usize {
    50
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            db_path: default_db_path(),
            map_size: default_map_size(),
            log_level: default_log_level(),
            view_role_policy: ViewRolePolicy::default(),
            recent_changes: default_recent_changes(),
        }
    }
}

impl GateConfig {
    /// Load from `SOPGATE_*` environment variables
    pub fn from_env() -> Result<Self> {
        let cfg: GateConfig = Config::builder()
            .add_source(Environment::with_prefix("SOPGATE").try_parsing(true))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file, with `SOPGATE_*` variables taking precedence
    pub fn from_file(path: &str) -> Result<Self> {
        let cfg: GateConfig = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("SOPGATE").try_parsing(true))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(GateError::InvalidConfig("db_path is empty".into()));
        }
        if self.map_size < 1 << 20 {
            return Err(GateError::InvalidConfig(format!("map_size {} below 1 MiB", self.map_size)));
        }
        if !matches!(self.log_level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
            return Err(GateError::InvalidConfig(format!("unknown log level {}", self.log_level)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-wide
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for k in ["SOPGATE_DB_PATH", "SOPGATE_LOG_LEVEL", "SOPGATE_VIEW_ROLE_POLICY", "SOPGATE_MAP_SIZE", "SOPGATE_RECENT_CHANGES"] {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn defaults_without_env() {
        let _lock = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        let cfg = GateConfig::from_env().unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.view_role_policy, ViewRolePolicy::AnyUser);
        assert_eq!(cfg.recent_changes, 50);
    }

    #[test]
    fn env_overrides() {
        let _lock = TEST_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        clear_env();
        std::env::set_var("SOPGATE_LOG_LEVEL", "debug");
        std::env::set_var("SOPGATE_VIEW_ROLE_POLICY", "superadmin_only");
        std::env::set_var("SOPGATE_MAP_SIZE", "2097152");
        let cfg = GateConfig::from_env().unwrap();
        clear_env();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.view_role_policy, ViewRolePolicy::SuperadminOnly);
        assert_eq!(cfg.map_size, 2 * 1024 * 1024);
    }

    #[test]
    fn rejects_unknown_log_level() {
        let cfg = GateConfig { log_level: "loud".into(), ..GateConfig::default() };
        assert!(matches!(cfg.validate(), Err(GateError::InvalidConfig(_))));
    }
}
