//! # cStor Common
//!
//! Shared utilities for the cStor node controllers.
//!
//! ## Logging
//!
//! ```rust
//! use cstor_common::{init_logging, LogFormat};
//!
//! init_logging("info").unwrap();
//! assert_eq!(LogFormat::from_json_flag(false), LogFormat::Text);
//! ```
//!
//! ## Environment
//!
//! Identity and resync settings are read through [`env`] so that every
//! binary interprets them the same way.

pub mod env;
pub mod logging;

pub use logging::{init, init_logging, init_logging_json, LogFormat};
