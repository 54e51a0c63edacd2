//! Engine: CLI surface, plugins (selector, processor, SQLite source) and shared helpers.

pub mod arg_parser;
pub mod cli;
pub mod db_source;
pub mod handlers;
pub mod processor;
pub mod progress;
pub mod selector;
pub mod tools;

pub use arg_parser::{Cli, Commands, DriveArgs, RunArgs};
pub use db_source::{add_listing_paths, create_listing, open_listing, sqlite_source};
pub use handlers::{build_source, handle_drive, handle_run};
pub use processor::{CommandProcessor, CommandSettings, FileProcessor, ProcessorStats};
pub use selector::{FileSelector, Selector};
