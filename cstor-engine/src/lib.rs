//! # cStor Engine
//!
//! Node-side storage plumbing for the cStor controllers.
//!
//! This crate wraps the external tools that own on-disk state:
//! - **Pool tool** (`zpool`) - import, create, destroy, status
//! - **Dataset tool** (`zfs`) - thin volumes inside the active pool
//! - **istgt** - iSCSI target configuration and control socket
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │  PoolExecutor  │ │ DatasetExecutor │ │  TargetManager  │
//! └───────┬────────┘ └────────┬────────┘ └───┬─────────┬───┘
//!         │                   │              │         │
//!         └─────────┬─────────┘──────────────┘         ▼
//!                   ▼                           ┌──────────────┐
//!          ┌─────────────────┐                  │ ControlSocket│
//!          │  CommandRunner  │                  │ (REFRESH)    │
//!          └────────┬────────┘                  └──────────────┘
//!          ┌────────┴────────┐
//!          ▼                 ▼
//!    ┌───────────┐   ┌────────────────┐
//!    │ HostRunner│   │ ScriptedRunner │
//!    └───────────┘   └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cstor_engine::{HostRunner, PoolDefinition, PoolExecutor, ImportOutcome};
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = PoolExecutor::new(Arc::new(HostRunner::new()));
//!     let def = PoolDefinition {
//!         pool_name: "cp1".into(),
//!         disks: vec!["/dev/sdb".into()],
//!         ..Default::default()
//!     };
//!
//!     pool.validate(&def).unwrap();
//!     if pool.import(&def).await.unwrap() == ImportOutcome::NotPresent {
//!         pool.create(&def).await.unwrap();
//!     }
//! }
//! ```

pub mod dataset;
pub mod error;
pub mod mock;
pub mod pool;
pub mod probe;
pub mod runner;
pub mod target;

pub use dataset::{qualified_name, DatasetExecutor, DatasetInfo};
pub use error::{EngineError, Result};
pub use mock::ScriptedRunner;
pub use pool::{ImportOutcome, PoolDefinition, PoolExecutor, PoolLayout, PoolStatus};
pub use probe::{pool_watchdog, wait_for_istgt, wait_for_pool_tool, WatchdogExit, PROBE_INTERVAL};
pub use runner::{CommandOutput, CommandRunner, HostRunner};
pub use target::{ControlSocket, TargetDefinition, TargetManager, TargetPaths};
