//! batchguard: supervised batch processing over file trees, with a restarting watchdog driver.
//!
//! A run crawls a source into a bounded queue, hands items to a pool of consumers, watches them for
//! stale items, and always ends with an [`AggregateResult`] whose exit status tells a driver
//! whether to relaunch.

pub mod driver;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use driver::{Driver, DriverReport, StopReason};
pub use error::BatchError;
pub use pipeline::{BatchPlugins, run_batch};

/// Result alias used by the public API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
