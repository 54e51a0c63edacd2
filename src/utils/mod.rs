pub mod batch_toml;
pub mod config;
pub mod logger;

pub use config::*;
pub use logger::{LogRole, setup_logging};
