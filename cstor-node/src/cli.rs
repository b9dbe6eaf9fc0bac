//! Command-line argument parsing shared by the three binaries.

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

/// cStor node controllers
#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the controller and block until SIGTERM/SIGINT
    Start(StartArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Path to a kubeconfig; in-cluster discovery is used when unset
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,

    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Worker tasks per reconciler
    #[arg(long)]
    pub workers: Option<usize>,
}

impl Cli {
    /// Parse the process arguments, naming the command after `binary` in help output.
    pub fn parse_as(binary: &'static str, about: &'static str) -> Self {
        let matches = Self::command().name(binary).about(about).get_matches();
        Self::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
    }
}
