//! thoscy Bridge Framework
//!
//! Common abstractions for building the thoscy relays.
//!
//! # Overview
//!
//! This framework provides:
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing relay lifecycle (startup, shutdown, signal handling)
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use thoscy_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MyRelayConfig::load_or_default(args.bridge.config.as_deref())?;
//!
//!     let mut runner = BridgeRunner::new_with_args("myrelay", config, Some(&args.bridge))?;
//!
//!     // Spawn direction-specific workers
//!     runner.spawn(my_worker(runner.shutdown_signal()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod runner;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use runner::{BridgeRunner, until_shutdown, wait_for_signal};

// Re-export commonly used types from thoscy-common
pub use thoscy_common::{BaseConfig, LogFormat, LoggingConfig, ThingsBoardConfig};
