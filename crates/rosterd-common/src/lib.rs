//! Rosterd Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the rosterd workspace.
//!
//! # Overview
//!
//! This crate provides functionality used by all rosterd workspace members:
//!
//! - **Error Handling**: the [`RosterError`] type and a `Result` alias
//! - **Logging**: tracing initialization with env-driven configuration
//!
//! # Example
//!
//! ```no_run
//! use rosterd_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> rosterd_common::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     tracing::info!("started");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, RosterError};
