//! Config resolution for the CLI: defaults, then the TOML file, then flags.

use anyhow::Result;
use log::debug;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::arg_parser::{Cli, DriveArgs, RunArgs};
use crate::error::BatchError;
use crate::utils::batch_toml::{apply_file_to_config, load_batch_toml};
use crate::utils::config::PackagePaths;
use crate::{AppConfig, SourceKind};

/// Overwrite a config field from a CLI flag when given.
macro_rules! apply_flag {
    ($args:expr, $cfg:expr, $flag:ident => $target:ident) => {
        if let Some(v) = $args.$flag.clone() {
            $cfg.$target = v;
        }
    };
    ($args:expr, $cfg:expr, $flag:ident => $target:ident, $conv:expr) => {
        if let Some(v) = $args.$flag.clone() {
            $cfg.$target = $conv(v);
        }
    };
}

/// Defaults overlaid with the config file (explicit `--config` must exist).
pub fn load_file_config(cli: &Cli) -> Result<AppConfig> {
    let mut cfg = AppConfig::default();
    let (path, explicit) = match &cli.config {
        Some(p) => (p.clone(), true),
        None => (PathBuf::from(PackagePaths::get().config_filename()), false),
    };
    match load_batch_toml(&path)? {
        Some(file) => {
            debug!("config: loaded {}", path.display());
            apply_file_to_config(&file, &mut cfg);
        }
        None if explicit => {
            return Err(BatchError::Config(format!("{} not found", path.display())).into());
        }
        None => {}
    }
    Ok(cfg)
}

/// Apply `run` flags over `cfg`.
pub fn apply_run_args(args: &RunArgs, cfg: &mut AppConfig) {
    let ms = Duration::from_millis;

    let rc = &mut cfg.run;
    apply_flag!(args, rc, consumers => num_consumers);
    apply_flag!(args, rc, queue_capacity => queue_capacity);
    apply_flag!(args, rc, stale_threshold_ms => stale_threshold, ms);
    apply_flag!(args, rc, pause_ms => pause_on_early_termination, ms);
    apply_flag!(args, rc, max_alive_secs => max_alive_time, |v| Some(Duration::from_secs(v)));
    apply_flag!(args, rc, max_files => max_files, Some);
    apply_flag!(args, rc, strict => strict);
    apply_flag!(args, rc, interrupt_on_stdin => interrupt_on_stdin);
    apply_flag!(args, rc, progress => progress_bar);
    apply_flag!(args, rc, summary_json => summary_json, Some);

    let sc = &mut cfg.source;
    apply_flag!(args, sc, root => root, Some);
    apply_flag!(args, sc, follow_links => follow_links);
    apply_flag!(args, sc, parallel_walk => parallel_walk);
    if let Some(list) = &args.list {
        sc.kind = SourceKind::List;
        sc.list_path = Some(list.clone());
    }
    if let Some(db) = &args.db {
        sc.kind = SourceKind::Sqlite;
        sc.db_path = Some(db.clone());
    }

    let sl = &mut cfg.select;
    if !args.include.is_empty() {
        sl.include = args.include.clone();
    }
    if !args.exclude.is_empty() {
        sl.exclude = args.exclude.clone();
    }
    apply_flag!(args, sl, min_size => min_size, Some);
    apply_flag!(args, sl, max_size => max_size, Some);

    let ec = &mut cfg.extract;
    apply_flag!(args, ec, output_dir => output_dir);
    apply_flag!(args, ec, suffix => output_suffix);
    apply_flag!(args, ec, overwrite => overwrite);
    if !args.command.is_empty() {
        ec.command = args.command.clone();
    }
}

/// Apply `drive` flags over `cfg`.
pub fn apply_drive_args(args: &DriveArgs, cfg: &mut AppConfig) {
    let dc = &mut cfg.driver;
    apply_flag!(args, dc, max_restarts => max_restarts, Some);
    apply_flag!(args, dc, pulse_ms => pulse, Duration::from_millis);
    apply_flag!(args, dc, wait_after_shutdown_ms => wait_after_shutdown, Duration::from_millis);
}
