//! iSCSI target management for istgt.
//!
//! A target is brought in line with its declaration in four steps:
//! validate, ensure the sparse backing file, write istgt.conf atomically,
//! then signal `REFRESH` on the control socket.

mod render;
mod socket;
mod writer;

pub use render::{backing_path, render, DATA_PORT, NODE_BASE, UNIT_CONTROL_PORT};
pub use socket::{ControlSocket, ISTGT_SOCKET, REFRESH_CMD, STATUS_CMD};
pub use writer::write_atomic;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::error::{EngineError, Result};
use crate::runner::{display_command, CommandRunner};

/// Default location of the daemon configuration.
pub const ISTGT_CONF: &str = "/usr/local/etc/istgt/istgt.conf";

/// Directory holding one sparse backing file per volume.
pub const BACKING_DIR: &str = "/tmp/cstor";

/// Mode of the written configuration file.
pub const CONF_MODE: u32 = 0o644;

/// What the renderer needs to know about a declared target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDefinition {
    /// Stable identity of the volume resource.
    pub uid: String,
    pub volume_name: String,
    /// Size string handed verbatim to `truncate` and istgt.
    pub capacity: String,
    pub target_ip: String,
    pub replication_factor: u32,
    pub consistency_factor: u32,
}

impl TargetDefinition {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("uid", &self.uid),
            ("volumeName", &self.volume_name),
            ("capacity", &self.capacity),
            ("targetIP", &self.target_ip),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(EngineError::InvalidSpec(format!("{} cannot be empty", field)));
        }
        validate_volume_name(&self.volume_name)?;
        if self.replication_factor == 0 {
            return Err(EngineError::InvalidSpec("replicationFactor cannot be zero".into()));
        }
        if self.consistency_factor == 0 {
            return Err(EngineError::InvalidSpec("consistencyFactor cannot be zero".into()));
        }
        if self.replication_factor < self.consistency_factor {
            return Err(EngineError::InvalidSpec(format!(
                "replicationFactor {} is less than consistencyFactor {}",
                self.replication_factor, self.consistency_factor
            )));
        }
        Ok(())
    }
}

/// The volume name becomes a file name under the backing directory, so it
/// must be a single plain path component.
fn validate_volume_name(name: &str) -> Result<()> {
    if name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(EngineError::InvalidSpec(format!(
            "volumeName '{}' is not a valid file name",
            name.escape_default()
        )));
    }
    Ok(())
}

/// Filesystem and socket locations the target manager works with.
#[derive(Debug, Clone)]
pub struct TargetPaths {
    pub config_path: PathBuf,
    pub socket_path: PathBuf,
    pub backing_dir: PathBuf,
    pub socket_timeout: Duration,
}

impl Default for TargetPaths {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(ISTGT_CONF),
            socket_path: PathBuf::from(ISTGT_SOCKET),
            backing_dir: PathBuf::from(BACKING_DIR),
            socket_timeout: Duration::from_secs(5),
        }
    }
}

/// Applies target definitions to the local istgt daemon.
pub struct TargetManager {
    runner: Arc<dyn CommandRunner>,
    paths: TargetPaths,
    socket: ControlSocket,
}

impl TargetManager {
    pub fn new(runner: Arc<dyn CommandRunner>, paths: TargetPaths) -> Self {
        let socket = ControlSocket::new(paths.socket_path.clone(), paths.socket_timeout);
        Self {
            runner,
            paths,
            socket,
        }
    }

    pub fn paths(&self) -> &TargetPaths {
        &self.paths
    }

    pub fn socket(&self) -> &ControlSocket {
        &self.socket
    }

    pub fn backing_file(&self, volume_name: &str) -> PathBuf {
        PathBuf::from(backing_path(&self.paths.backing_dir.to_string_lossy(), volume_name))
    }

    pub fn render(&self, target: &TargetDefinition) -> String {
        render(target, &self.paths.backing_dir.to_string_lossy())
    }

    /// `touch` then `truncate -s <capacity>` the backing file.
    #[instrument(skip(self, target), fields(volume = %target.volume_name))]
    pub async fn ensure_backing_file(&self, target: &TargetDefinition) -> Result<()> {
        tokio::fs::create_dir_all(&self.paths.backing_dir)
            .await
            .map_err(|e| EngineError::io(self.paths.backing_dir.display().to_string(), e))?;
        let file = backing_path(&self.paths.backing_dir.to_string_lossy(), &target.volume_name);

        for (program, args) in [
            ("touch", vec![file.clone()]),
            ("truncate", vec!["-s".to_string(), target.capacity.clone(), file.clone()]),
        ] {
            let output = self.runner.run(program, &args).await?;
            output.into_result(&display_command(program, &args))?;
        }

        info!(file = %file, capacity = %target.capacity, "Backing file ready");
        Ok(())
    }

    /// Render and atomically write istgt.conf.
    #[instrument(skip(self, target), fields(volume = %target.volume_name))]
    pub async fn write_config(&self, target: &TargetDefinition) -> Result<()> {
        let contents = self.render(target);
        let path = self.paths.config_path.clone();

        tokio::task::spawn_blocking(move || write_atomic(&path, contents.as_bytes(), CONF_MODE))
            .await
            .map_err(|e| EngineError::Internal(format!("config writer task failed: {}", e)))??;

        info!(path = %self.paths.config_path.display(), "Target configuration written");
        Ok(())
    }

    /// Signal `REFRESH`; delivery failures are tolerated.
    pub async fn refresh(&self) -> bool {
        self.socket.refresh().await
    }

    /// Full apply: backing file, config, refresh.
    pub async fn apply(&self, target: &TargetDefinition) -> Result<()> {
        target.validate()?;
        self.ensure_backing_file(target).await?;
        self.write_config(target).await?;
        self.refresh().await;
        Ok(())
    }

    pub fn config_path(&self) -> &Path {
        &self.paths.config_path
    }
}
