//! Pool executor: a thin wrapper over the external pool tool (`zpool`).
//!
//! Every operation builds an argv, runs it through the [`CommandRunner`]
//! and classifies the exit. No retries happen here; the caller's work
//! queue owns back-off.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{EngineError, Result};
use crate::runner::{display_command, CommandOutput, CommandRunner};

/// Default pool tool binary.
pub const POOL_TOOL: &str = "zpool";

/// Substring the pool tool prints once every pool is gone.
pub const NO_POOLS_AVAILABLE: &str = "no pools available";

const NOT_PRESENT_MARKERS: &[&str] = &["no such pool", "cannot import"];

/// Vdev layout of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolLayout {
    #[default]
    Striped,
    Mirrored,
    Raidz,
    Raidz2,
}

impl FromStr for PoolLayout {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "striped" | "stripe" => Ok(PoolLayout::Striped),
            "mirrored" | "mirror" => Ok(PoolLayout::Mirrored),
            "raidz" | "raidz1" => Ok(PoolLayout::Raidz),
            "raidz2" => Ok(PoolLayout::Raidz2),
            other => Err(EngineError::InvalidSpec(format!("unknown pool type '{}'", other))),
        }
    }
}

impl fmt::Display for PoolLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolLayout::Striped => "striped",
            PoolLayout::Mirrored => "mirrored",
            PoolLayout::Raidz => "raidz",
            PoolLayout::Raidz2 => "raidz2",
        };
        f.write_str(s)
    }
}

/// What the executor needs to know about a declared pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolDefinition {
    /// Name the pool carries inside the pool tool.
    pub pool_name: String,
    /// Devices or image files, in order.
    pub disks: Vec<String>,
    /// Cache file for faster re-import.
    pub cache_file: Option<String>,
    /// Raw pool type as declared; parsed by [`PoolDefinition::layout`].
    pub pool_type: String,
}

impl PoolDefinition {
    pub fn layout(&self) -> Result<PoolLayout> {
        self.pool_type.parse()
    }
}

/// Result of an import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported,
    NotPresent,
}

/// Parsed `zpool status` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStatus {
    /// Value of the first `pool:` line.
    pub name: Option<String>,
    /// Value of the first `state:` line (ONLINE, DEGRADED, ...).
    pub state: Option<String>,
    pub raw: String,
}

impl PoolStatus {
    pub fn parse(output: &str) -> Self {
        Self {
            name: labelled_value(output, "pool:"),
            state: labelled_value(output, "state:"),
            raw: output.to_string(),
        }
    }

    pub fn no_pools(&self) -> bool {
        self.raw.contains(NO_POOLS_AVAILABLE)
    }
}

/// Value of the first line whose first token is `label`.
fn labelled_value(output: &str, label: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(label))
        .map(|rest| rest.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_not_present(output: &CommandOutput) -> bool {
    let text = output.combined().to_ascii_lowercase();
    NOT_PRESENT_MARKERS.iter().any(|m| text.contains(m))
}

/// Executes pool operations through the pool tool.
pub struct PoolExecutor {
    runner: Arc<dyn CommandRunner>,
    tool: String,
}

impl PoolExecutor {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_tool(runner, POOL_TOOL)
    }

    pub fn with_tool(runner: Arc<dyn CommandRunner>, tool: impl Into<String>) -> Self {
        Self {
            runner,
            tool: tool.into(),
        }
    }

    /// Check the definition before any tool runs.
    pub fn validate(&self, pool: &PoolDefinition) -> Result<()> {
        if pool.pool_name.trim().is_empty() {
            return Err(EngineError::InvalidSpec("pool name cannot be empty".into()));
        }
        if pool.disks.is_empty() {
            return Err(EngineError::InvalidSpec("disk list cannot be empty".into()));
        }
        if pool.disks.iter().any(|d| d.trim().is_empty()) {
            return Err(EngineError::InvalidSpec("disk path cannot be empty".into()));
        }
        if pool.layout()? == PoolLayout::Mirrored && pool.disks.len() % 2 != 0 {
            return Err(EngineError::InvalidSpec(
                "mirrored pool needs an even number of disks".into(),
            ));
        }
        Ok(())
    }

    pub fn import_args(pool: &PoolDefinition) -> Vec<String> {
        let mut args = vec!["import".to_string()];
        if let Some(cache) = pool.cache_file.as_deref().filter(|c| !c.is_empty()) {
            args.push("-c".into());
            args.push(cache.to_string());
        }
        args.push(pool.pool_name.clone());
        args
    }

    pub fn create_args(pool: &PoolDefinition) -> Result<Vec<String>> {
        let mut args = vec!["create".to_string(), "-f".to_string()];
        if let Some(cache) = pool.cache_file.as_deref().filter(|c| !c.is_empty()) {
            args.push("-o".into());
            args.push(format!("cachefile={}", cache));
        }
        args.push(pool.pool_name.clone());

        match pool.layout()? {
            PoolLayout::Striped => args.extend(pool.disks.iter().cloned()),
            PoolLayout::Mirrored => {
                for pair in pool.disks.chunks(2) {
                    args.push("mirror".into());
                    args.extend(pair.iter().cloned());
                }
            }
            PoolLayout::Raidz | PoolLayout::Raidz2 => {
                args.push(pool.layout()?.to_string());
                args.extend(pool.disks.iter().cloned());
            }
        }
        Ok(args)
    }

    /// Import the pool. A missing pool is [`ImportOutcome::NotPresent`], not an error.
    ///
    /// A failed cachefile import is retried by scanning the disks, since a
    /// stale or missing cachefile does not mean the pool is gone.
    #[instrument(skip(self, pool), fields(pool = %pool.pool_name))]
    pub async fn import(&self, pool: &PoolDefinition) -> Result<ImportOutcome> {
        let mut args = Self::import_args(pool);
        let mut output = self.run(&args).await?;

        if !output.success() && pool.cache_file.as_deref().is_some_and(|c| !c.is_empty()) {
            debug!(output = %output.combined().trim(), "Cachefile import failed, retrying without it");
            args = vec!["import".to_string(), pool.pool_name.clone()];
            output = self.run(&args).await?;
        }

        if output.success() {
            info!("Pool imported");
            return Ok(ImportOutcome::Imported);
        }
        if is_not_present(&output) {
            debug!(output = %output.combined().trim(), "Pool not present for import");
            return Ok(ImportOutcome::NotPresent);
        }
        output
            .into_result(&display_command(&self.tool, &args))
            .map(|_| ImportOutcome::Imported)
    }

    #[instrument(skip(self, pool), fields(pool = %pool.pool_name, disks = pool.disks.len()))]
    pub async fn create(&self, pool: &PoolDefinition) -> Result<()> {
        let args = Self::create_args(pool)?;
        let output = self.run(&args).await?;
        output.into_result(&display_command(&self.tool, &args))?;
        info!("Pool created");
        Ok(())
    }

    /// Destroy the pool. A pool that no longer exists counts as destroyed.
    #[instrument(skip(self))]
    pub async fn destroy(&self, pool_name: &str) -> Result<()> {
        let args = vec!["destroy".to_string(), "-f".to_string(), pool_name.to_string()];
        let output = self.run(&args).await?;
        if !output.success() && output.combined().to_ascii_lowercase().contains("no such pool") {
            warn!(pool = %pool_name, "Pool already gone, treating destroy as done");
            return Ok(());
        }
        output.into_result(&display_command(&self.tool, &args))?;
        info!(pool = %pool_name, "Pool destroyed");
        Ok(())
    }

    /// Wipe pool labels from a disk so it can be reused.
    pub async fn label_clear(&self, disk: &str) -> Result<()> {
        let args = vec!["labelclear".to_string(), "-f".to_string(), disk.to_string()];
        let output = self.run(&args).await?;
        output.into_result(&display_command(&self.tool, &args))?;
        Ok(())
    }

    /// Run `zpool status` and parse it.
    pub async fn status(&self) -> Result<PoolStatus> {
        let args = vec!["status".to_string()];
        let output = self.run(&args).await?;
        let output = output.into_result(&display_command(&self.tool, &args))?;
        Ok(PoolStatus::parse(&output.combined()))
    }

    /// Name of the pool currently active on this node, if any.
    pub async fn current_pool_name(&self) -> Result<Option<String>> {
        Ok(self.status().await?.name)
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        self.runner.run(&self.tool, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedRunner;

    const STATUS: &str = "  pool: cstor-530c9c4f
 state: ONLINE
  scan: none requested
config:

\tNAME            STATE     READ WRITE CKSUM
\tcstor-530c9c4f  ONLINE       0     0     0
\t  /dev/sdb      ONLINE       0     0     0

errors: No known data errors
";

    fn pool(pool_type: &str, disks: &[&str]) -> PoolDefinition {
        PoolDefinition {
            pool_name: "cp1".into(),
            disks: disks.iter().map(|d| d.to_string()).collect(),
            cache_file: Some("/tmp/cp1.cache".into()),
            pool_type: pool_type.into(),
        }
    }

    #[test]
    fn test_status_parsing() {
        let status = PoolStatus::parse(STATUS);
        assert_eq!(status.name.as_deref(), Some("cstor-530c9c4f"));
        assert_eq!(status.state.as_deref(), Some("ONLINE"));
        assert!(!status.no_pools());

        let empty = PoolStatus::parse("no pools available\n");
        assert_eq!(empty.name, None);
        assert!(empty.no_pools());
        assert_eq!(PoolStatus::parse("").name, None);
    }

    #[test]
    fn test_create_args_per_layout() {
        let striped = PoolExecutor::create_args(&pool("striped", &["/dev/sdb", "/dev/sdc"])).unwrap();
        assert_eq!(
            striped.join(" "),
            "create -f -o cachefile=/tmp/cp1.cache cp1 /dev/sdb /dev/sdc"
        );

        let mirrored = PoolExecutor::create_args(&pool("mirrored", &["a", "b", "c", "d"])).unwrap();
        assert_eq!(
            mirrored.join(" "),
            "create -f -o cachefile=/tmp/cp1.cache cp1 mirror a b mirror c d"
        );

        let raidz2 = PoolExecutor::create_args(&pool("raidz2", &["a", "b", "c", "d"])).unwrap();
        assert_eq!(raidz2.join(" "), "create -f -o cachefile=/tmp/cp1.cache cp1 raidz2 a b c d");

        let mut no_cache = pool("", &["/dev/sdb"]);
        no_cache.cache_file = None;
        assert_eq!(PoolExecutor::create_args(&no_cache).unwrap().join(" "), "create -f cp1 /dev/sdb");
        assert_eq!(PoolExecutor::import_args(&no_cache).join(" "), "import cp1");
    }

    #[test]
    fn test_validate_rejects_bad_shapes() {
        let exec = PoolExecutor::new(Arc::new(ScriptedRunner::new()));
        assert!(exec.validate(&pool("striped", &["/dev/sdb"])).is_ok());
        assert!(exec.validate(&pool("striped", &[])).is_err());
        assert!(exec.validate(&pool("mirrored", &["a", "b", "c"])).is_err());
        assert!(exec.validate(&pool("raid5", &["a"])).is_err());

        let mut unnamed = pool("striped", &["/dev/sdb"]);
        unnamed.pool_name = String::new();
        assert!(matches!(exec.validate(&unnamed), Err(EngineError::InvalidSpec(_))));
    }

    #[tokio::test]
    async fn test_import_classification() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .script(
                "zpool import -c /tmp/cp1.cache cp1",
                CommandOutput::failed(1, "cannot import 'cp1': no such pool available"),
            )
            .script("zpool import -c /tmp/cp1.cache cp1", CommandOutput::ok(""))
            .script("zpool import -c /tmp/cp1.cache cp1", CommandOutput::failed(1, "I/O error"))
            .script("zpool import cp1", CommandOutput::failed(1, "cannot import 'cp1': no such pool available"))
            .script("zpool import cp1", CommandOutput::failed(1, "I/O error"));
        let exec = PoolExecutor::new(runner.clone());
        let def = pool("striped", &["/dev/sdb"]);

        assert_eq!(exec.import(&def).await.unwrap(), ImportOutcome::NotPresent);
        assert_eq!(exec.import(&def).await.unwrap(), ImportOutcome::Imported);
        let err = exec.import(&def).await.unwrap_err();
        assert!(err.is_tool_failure());
        assert_eq!(runner.count("zpool import cp1"), 2);
    }

    #[tokio::test]
    async fn test_import_retries_without_stale_cachefile() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .script(
                "zpool import -c /tmp/cp1.cache cp1",
                CommandOutput::failed(1, "failed to open cache file: No such file or directory"),
            )
            .script("zpool import cp1", CommandOutput::ok(""));
        let exec = PoolExecutor::new(runner.clone());

        let mut def = pool("striped", &["/dev/sdb"]);
        assert_eq!(exec.import(&def).await.unwrap(), ImportOutcome::Imported);
        assert_eq!(
            runner.calls(),
            vec!["zpool import -c /tmp/cp1.cache cp1".to_string(), "zpool import cp1".to_string()]
        );

        runner.clear_calls();
        def.cache_file = None;
        assert_eq!(exec.import(&def).await.unwrap(), ImportOutcome::Imported);
        assert_eq!(runner.calls(), vec!["zpool import cp1".to_string()]);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .script("zpool destroy -f cp1", CommandOutput::failed(1, "cannot open 'cp1': no such pool"))
            .script("zpool destroy -f cp2", CommandOutput::failed(1, "pool is busy"));
        let exec = PoolExecutor::new(runner);

        assert!(exec.destroy("cp1").await.is_ok());
        assert!(exec.destroy("cp2").await.is_err());
    }

    #[tokio::test]
    async fn test_current_pool_name() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .script("zpool status", CommandOutput::ok(""))
            .script("zpool status", CommandOutput::ok(STATUS));
        let exec = PoolExecutor::new(runner);

        assert_eq!(exec.current_pool_name().await.unwrap(), None);
        assert_eq!(exec.current_pool_name().await.unwrap().as_deref(), Some("cstor-530c9c4f"));
    }
}
