//! Dataset executor: thin volumes inside the active pool (`zfs`).

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::runner::{display_command, CommandOutput, CommandRunner};

/// Default dataset tool binary.
pub const DATASET_TOOL: &str = "zfs";

/// One line of `zfs get volsize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    /// Fully qualified `<pool>/<volName>`.
    pub name: String,
    pub volsize: String,
}

impl DatasetInfo {
    /// Leaf name after the pool prefix.
    pub fn vol_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Compose `<pool>/<volName>`.
pub fn qualified_name(pool_name: &str, vol_name: &str) -> String {
    format!("{}/{}", pool_name, vol_name)
}

/// Parse `zfs get volsize` output, keeping datasets under `pool_name`.
///
/// ```text
/// NAME       PROPERTY  VALUE  SOURCE
/// cp1/vol1   volsize   100M   local
/// ```
pub fn parse_volsize_listing(output: &str, pool_name: &str) -> Vec<DatasetInfo> {
    let prefix = format!("{}/", pool_name);
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let name = cols.next()?;
            let property = cols.next()?;
            let value = cols.next()?;
            if !name.starts_with(&prefix) || property != "volsize" {
                return None;
            }
            Some(DatasetInfo {
                name: name.to_string(),
                volsize: value.to_string(),
            })
        })
        .collect()
}

/// Executes dataset operations through the dataset tool.
pub struct DatasetExecutor {
    runner: Arc<dyn CommandRunner>,
    tool: String,
}

impl DatasetExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_tool(runner, DATASET_TOOL)
    }

    pub fn with_tool(runner: Arc<dyn CommandRunner>, tool: impl Into<String>) -> Self {
        Self {
            runner,
            tool: tool.into(),
        }
    }

    /// Create a sparse volume of `capacity` at `fq_name`.
    #[instrument(skip(self))]
    pub async fn create_thin_volume(&self, fq_name: &str, capacity: &str) -> Result<()> {
        if capacity.trim().is_empty() {
            return Err(EngineError::InvalidSpec("capacity cannot be empty".into()));
        }
        if !fq_name.contains('/') {
            return Err(EngineError::InvalidSpec(format!(
                "dataset name '{}' is not pool qualified",
                fq_name
            )));
        }

        let args = vec![
            "create".to_string(),
            "-s".to_string(),
            "-V".to_string(),
            capacity.to_string(),
            fq_name.to_string(),
        ];
        self.run_checked(&args).await?;
        info!("Thin volume created");
        Ok(())
    }

    /// Destroy a dataset and its dependents. A missing dataset counts as destroyed.
    #[instrument(skip(self))]
    pub async fn destroy(&self, fq_name: &str) -> Result<()> {
        let args = vec!["destroy".to_string(), "-R".to_string(), fq_name.to_string()];
        let output = self.runner.run(&self.tool, &args).await?;
        if !output.success() && output.combined().contains("dataset does not exist") {
            warn!(dataset = %fq_name, "Dataset already gone");
            return Ok(());
        }
        output.into_result(&display_command(&self.tool, &args))?;
        info!("Dataset destroyed");
        Ok(())
    }

    /// Datasets currently present under `pool_name`.
    pub async fn list(&self, pool_name: &str) -> Result<Vec<DatasetInfo>> {
        let args = vec!["get".to_string(), "volsize".to_string()];
        let output = self.run_checked(&args).await?;
        Ok(parse_volsize_listing(&output.stdout, pool_name))
    }

    async fn run_checked(&self, args: &[String]) -> Result<CommandOutput> {
        let output = self.runner.run(&self.tool, args).await?;
        output.into_result(&display_command(&self.tool, args))
    }
}
