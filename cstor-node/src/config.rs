//! Configuration management for the cStor controllers.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use cstor_engine::TargetPaths;

use crate::cli::StartArgs;
use crate::reconcile::ReplicaSettings;

/// Location probed when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cstor/config.yaml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Work queue and informer settings
    pub controller: ControllerConfig,
    /// Pool and dataset tooling
    pub pool: PoolConfig,
    /// istgt target locations
    pub target: TargetConfig,
    /// Log output
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the file named on the command line, or the default location.
    ///
    /// A missing default file means defaults; a missing named file is an error.
    pub fn resolve(args: &StartArgs) -> Result<Self> {
        let config = match &args.config {
            Some(path) => Self::load(path)?,
            None => match Self::load(DEFAULT_CONFIG_PATH) {
                Ok(cfg) => cfg,
                Err(_) if !Path::new(DEFAULT_CONFIG_PATH).exists() => Self::default(),
                Err(e) => return Err(e),
            },
        };
        Ok(config.with_env().with_cli_overrides(args))
    }

    /// Apply `RESYNC_INTERVAL` from the environment.
    pub fn with_env(mut self) -> Self {
        let fallback = Duration::from_secs(self.controller.resync_seconds);
        self.controller.resync_seconds = cstor_common::env::resync_interval(fallback).as_secs();
        self
    }

    /// Apply CLI argument overrides to the configuration.
    pub fn with_cli_overrides(mut self, args: &StartArgs) -> Self {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.log_json {
            self.logging.json = true;
        }

        if let Some(workers) = args.workers {
            self.controller.workers = workers;
        }

        self
    }

    /// Log a one-line summary of the effective settings.
    pub fn log_summary(&self) {
        info!(
            workers = self.controller.workers,
            namespace = %self.controller.namespace,
            resync_secs = self.controller.resync_seconds,
            pool_tool = %self.pool.pool_tool,
            istgt_conf = %self.target.config_path.display(),
            "Controller configured"
        );
    }
}

/// Work queue and informer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    /// Worker tasks per reconciler
    pub workers: usize,
    /// Namespace watched for replicas and volumes; empty watches all
    pub namespace: String,
    /// Informer periodic resync in seconds
    pub resync_seconds: u64,
    /// Give up on the initial cache sync after this long
    pub cache_sync_timeout_seconds: u64,
    /// Retry interval while the custom resource definitions are missing
    pub crd_retry_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            namespace: "openebs".to_string(),
            resync_seconds: cstor_common::env::DEFAULT_RESYNC.as_secs(),
            cache_sync_timeout_seconds: 120,
            crd_retry_seconds: 10,
        }
    }
}

impl ControllerConfig {
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_seconds.max(1))
    }

    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_seconds)
    }

    pub fn crd_retry(&self) -> Duration {
        Duration::from_secs(self.crd_retry_seconds.max(1))
    }

    /// Namespace filter for namespaced kinds.
    pub fn namespace(&self) -> Option<&str> {
        Some(self.namespace.as_str()).filter(|ns| !ns.is_empty())
    }
}

/// Pool and dataset tool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    pub pool_tool: String,
    pub dataset_tool: String,
    pub probe_interval_seconds: u64,
    /// Times the replica reconciler asks for the active pool before failing
    pub pool_name_attempts: u32,
    pub pool_name_interval_seconds: u64,
    pub watchdog_interval_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_tool: cstor_engine::pool::POOL_TOOL.to_string(),
            dataset_tool: cstor_engine::dataset::DATASET_TOOL.to_string(),
            probe_interval_seconds: cstor_engine::PROBE_INTERVAL.as_secs(),
            pool_name_attempts: 10,
            pool_name_interval_seconds: 5,
            watchdog_interval_seconds: 3,
        }
    }
}

impl PoolConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds.max(1))
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_seconds.max(1))
    }

    pub fn replica_settings(&self) -> ReplicaSettings {
        ReplicaSettings {
            pool_name_attempts: self.pool_name_attempts.max(1),
            pool_name_interval: Duration::from_secs(self.pool_name_interval_seconds),
        }
    }
}

/// istgt target configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TargetConfig {
    pub config_path: PathBuf,
    pub socket_path: PathBuf,
    pub backing_dir: PathBuf,
    pub probe_interval_seconds: u64,
    pub socket_timeout_seconds: u64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        let paths = TargetPaths::default();
        Self {
            config_path: paths.config_path,
            socket_path: paths.socket_path,
            backing_dir: paths.backing_dir,
            probe_interval_seconds: cstor_engine::PROBE_INTERVAL.as_secs(),
            socket_timeout_seconds: paths.socket_timeout.as_secs(),
        }
    }
}

impl TargetConfig {
    pub fn paths(&self) -> TargetPaths {
        TargetPaths {
            config_path: self.config_path.clone(),
            socket_path: self.socket_path.clone(),
            backing_dir: self.backing_dir.clone(),
            socket_timeout: Duration::from_secs(self.socket_timeout_seconds.max(1)),
        }
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds.max(1))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.controller.namespace(), Some("openebs"));
        assert_eq!(config.pool.pool_tool, "zpool");
        assert_eq!(config.pool.replica_settings().pool_name_interval, Duration::from_secs(5));
        assert_eq!(
            config.target.config_path,
            PathBuf::from("/usr/local/etc/istgt/istgt.conf")
        );
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "controller:\n  workers: 4\n  namespace: \"\"\npool:\n  poolNameAttempts: 3\ntarget:\n  socketPath: /run/istgt.sock\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.controller.workers, 4);
        assert_eq!(config.controller.namespace(), None);
        assert_eq!(config.controller.crd_retry_seconds, 10);
        assert_eq!(config.pool.pool_name_attempts, 3);
        assert_eq!(config.pool.dataset_tool, "zfs");
        assert_eq!(config.target.socket_path, PathBuf::from("/run/istgt.sock"));
    }

    #[test]
    fn test_named_missing_file_is_an_error() {
        let args = StartArgs {
            config: Some("/nonexistent/cstor.yaml".into()),
            ..Default::default()
        };
        assert!(Config::resolve(&args).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let args = StartArgs {
            log_level: Some("debug".into()),
            log_json: true,
            workers: Some(8),
            ..Default::default()
        };
        let config = Config::default().with_cli_overrides(&args);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.controller.workers, 8);
    }
}
