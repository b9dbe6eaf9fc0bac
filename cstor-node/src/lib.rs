//! # cStor Node Controllers
//!
//! Node-local reconcilers for cStor custom resources. Each binary watches
//! one or more kinds, queues their changes, and drives the local pool
//! tool, dataset tool or iSCSI target until they match.
//!
//! ```text
//!  API server ──watch──► Informer ──► EventIngest ──► WorkQueue
//!                          (Cache)   (gate, classify)     │
//!                                                         ▼
//!  status ◄── ResourceStore ◄── Controller ◄── workers ◄──┘
//!                                   │
//!                                   ▼
//!                      Reconciler (pool | replica | volume)
//!                                   │
//!                                   ▼
//!                              cstor-engine
//! ```
//!
//! ## Binaries
//! - `cstor-pool-mgmt`: pools and replicas on a storage node
//! - `cstor-volume-mgmt`: istgt configuration for one volume
//! - `cstor-repl-ctrl`: replicas inside an externally managed pool

pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod crd;
pub mod error;
pub mod events;
pub mod informer;
pub mod ingest;
pub mod queue;
pub mod reconcile;
pub mod store;
pub mod supervisor;
pub mod tombstone;

pub use config::Config;
pub use context::ImportedVolumes;
pub use crd::{CStorPool, CStorResource, CStorVolume, CStorVolumeReplica, Phase};
pub use error::{ReconcileError, StoreError};
pub use queue::{Operation, QueueItem, WorkQueue};
