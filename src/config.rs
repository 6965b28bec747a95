//! Environment-variable configuration, validated at startup.

use std::path::PathBuf;

use anyhow::{Context, Result};
use errors::ConfigError;

pub const GRAPH_BATCH_LIMIT: usize = 20;
pub const WORKER_LIMIT: usize = 4;
pub const CHUNK_SIZE: usize = 64 * 1024;
pub const SAVES_DIR: &str = "saves";
pub const LOGS_DIR: &str = "logs";

mod errors {
    use std::fmt;

    /// Mirrors `spec.md`'s `ConfigError` kind: a missing or malformed
    /// required environment variable, fatal at startup.
    #[derive(Debug)]
    pub enum ConfigError {
        MissingEnv(&'static str),
        InvalidDrives(String),
    }

    impl fmt::Display for ConfigError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ConfigError::MissingEnv(name) => write!(f, "missing environment variable {name}"),
                ConfigError::InvalidDrives(e) => write!(f, "invalid DRIVES: {e}"),
            }
        }
    }

    impl std::error::Error for ConfigError {}
}

/// Runtime configuration for a sync run, externalized from the module-level
/// constants the source mixes in with per-instance state.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub site_id: String,
    pub local_root: PathBuf,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub drives: Vec<String>,
    pub enable_logging: bool,
    pub log_level: LogLevel,
    /// Opt-in: delete local files archived during deletion reconciliation.
    /// Default false — archive-only, per spec.md §9.
    pub prune: bool,
    pub graph_base_url: String,
    pub batch_limit: usize,
    pub worker_limit: usize,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Info,
    Debug,
}

impl LogLevel {
    fn from_str(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => LogLevel::Error,
            "DEBUG" => LogLevel::Debug,
            _ => LogLevel::Info,
        }
    }
}

impl SyncConfig {
    /// Load configuration from the environment, per spec.md §6:
    /// `SITE_ID`, `LOCAL_ROOT`, `TENANT_ID`, `CLIENT_ID`, `CLIENT_SECRET`
    /// are required; `DRIVES`, `ENABLE_LOGGING`, `LOG_LEVEL` are optional.
    pub fn from_env() -> Result<Self> {
        let site_id = env_or_fail("SITE_ID")?;
        let local_root = env_or_fail("LOCAL_ROOT")?.into();
        let tenant_id = env_or_fail("TENANT_ID")?;
        let client_id = env_or_fail("CLIENT_ID")?;
        let client_secret = env_or_fail("CLIENT_SECRET")?;

        let drives_raw = std::env::var("DRIVES").unwrap_or_else(|_| "[]".to_string());
        let drives: Vec<String> = serde_json::from_str(&drives_raw)
            .map_err(|e| ConfigError::InvalidDrives(e.to_string()))
            .context("parse DRIVES")?;

        let enable_logging = std::env::var("ENABLE_LOGGING")
            .map(|v| parse_truthy(&v))
            .unwrap_or(true);
        let log_level = std::env::var("LOG_LEVEL")
            .map(|v| LogLevel::from_str(&v))
            .unwrap_or(LogLevel::Info);
        let prune = std::env::var("PRUNE")
            .map(|v| parse_truthy(&v))
            .unwrap_or(false);

        Ok(SyncConfig {
            site_id,
            local_root,
            tenant_id,
            client_id,
            client_secret,
            drives,
            enable_logging,
            log_level,
            prune,
            graph_base_url: "https://graph.microsoft.com/v1.0".to_string(),
            batch_limit: GRAPH_BATCH_LIMIT,
            worker_limit: WORKER_LIMIT,
            chunk_size: CHUNK_SIZE,
        })
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.local_root.join(LOGS_DIR)
    }

    pub fn saves_dir(&self) -> PathBuf {
        self.local_root.join(SAVES_DIR)
    }
}

fn env_or_fail(name: &'static str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnv(name).into()),
    }
}

fn parse_truthy(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for var in [
            "SITE_ID",
            "LOCAL_ROOT",
            "TENANT_ID",
            "CLIENT_ID",
            "CLIENT_SECRET",
            "DRIVES",
            "ENABLE_LOGGING",
            "LOG_LEVEL",
            "PRUNE",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_var_is_fatal() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let err = SyncConfig::from_env().expect_err("should fail without SITE_ID");
        assert!(err.to_string().contains("SITE_ID"));
    }

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SITE_ID", "site");
        std::env::set_var("LOCAL_ROOT", "/tmp/mirror");
        std::env::set_var("TENANT_ID", "tenant");
        std::env::set_var("CLIENT_ID", "client");
        std::env::set_var("CLIENT_SECRET", "secret");

        let cfg = SyncConfig::from_env().unwrap();
        assert!(cfg.drives.is_empty());
        assert!(cfg.enable_logging);
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert!(!cfg.prune);
        clear_env();
    }

    #[test]
    fn drives_parses_json_array() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("SITE_ID", "site");
        std::env::set_var("LOCAL_ROOT", "/tmp/mirror");
        std::env::set_var("TENANT_ID", "tenant");
        std::env::set_var("CLIENT_ID", "client");
        std::env::set_var("CLIENT_SECRET", "secret");
        std::env::set_var("DRIVES", r#"["DriveA","DriveB"]"#);

        let cfg = SyncConfig::from_env().unwrap();
        assert_eq!(cfg.drives, vec!["DriveA".to_string(), "DriveB".to_string()]);
        clear_env();
    }
}
