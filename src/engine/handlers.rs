//! Command handlers for `run` and `drive`. Each returns the process exit code.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use log::{error, info, warn};
use std::sync::Arc;

use crate::driver::Driver;
use crate::engine::arg_parser::{Cli, DriveArgs, RunArgs};
use crate::engine::cli::{apply_drive_args, apply_run_args, load_file_config};
use crate::engine::db_source::sqlite_source;
use crate::engine::processor::{CommandProcessor, CommandSettings};
use crate::engine::selector::FileSelector;
use crate::pipeline::{
    BatchPlugins, CrawlSource, WalkContext, directory_source, interrupt_channel, list_source,
    run_batch, watch_stdin,
};
use crate::utils::config::RESTART_SENTINEL;
use crate::utils::{LogRole, setup_logging};
use crate::{AggregateResult, AppConfig, ExitStatus, SourceKind};

/// Forward Ctrl+C into the interrupt channel. Only one handler per process can be installed.
fn install_ctrlc(tx: Sender<String>) {
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send("Ctrl+C".to_string());
    }) {
        warn!("could not install Ctrl+C handler: {}", e);
    }
}

/// Build the crawl source named by the config.
pub fn build_source(cfg: &AppConfig) -> Result<CrawlSource> {
    let src = &cfg.source;
    let root = src
        .root
        .clone()
        .context("source root is not set")?;
    Ok(match src.kind {
        SourceKind::Dir => directory_source(WalkContext {
            root,
            exclude_dir: Some(cfg.extract.output_dir.clone()),
            follow_links: src.follow_links,
            parallel_walk: src.parallel_walk,
        }),
        SourceKind::List => list_source(root, src.list_path.clone().context("list_path is not set")?),
        SourceKind::Sqlite => sqlite_source(root, src.db_path.clone().context("db_path is not set")?),
    })
}

fn build_plugins(cfg: &AppConfig, tx: &Sender<String>, rx: crossbeam_channel::Receiver<String>) -> Result<BatchPlugins> {
    let source = build_source(cfg)?;
    let selector = FileSelector {
        include: cfg.select.include.clone(),
        exclude: cfg.select.exclude.clone(),
        min_size: cfg.select.min_size,
        max_size: cfg.select.max_size,
    };
    let processor = CommandProcessor::new(CommandSettings {
        command: cfg.extract.command.clone(),
        output_dir: cfg.extract.output_dir.clone(),
        output_suffix: cfg.extract.output_suffix.clone(),
        overwrite: cfg.extract.overwrite,
    })?;

    install_ctrlc(tx.clone());
    if cfg.run.interrupt_on_stdin {
        watch_stdin(tx.clone());
    }
    Ok(BatchPlugins {
        source,
        selector: Arc::new(selector),
        processor: Arc::new(processor),
        interrupts: Some(rx),
    })
}

fn write_summary(cfg: &AppConfig, result: &AggregateResult) {
    let Some(path) = &cfg.run.summary_json else {
        return;
    };
    let written = serde_json::to_string_pretty(result)
        .context("serialize summary")
        .and_then(|json| std::fs::write(path, json).context("write summary"));
    if let Err(e) = written {
        warn!("{}: {:#}", path.display(), e);
    }
}

fn resolve_run_config(cli: &Cli, args: &RunArgs) -> Result<AppConfig> {
    let mut cfg = load_file_config(cli)?;
    apply_run_args(args, &mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// One supervised run. Setup errors exit with the no-restart code; a restart request also prints
/// the sentinel line on stderr for the driver.
pub fn handle_run(cli: &Cli, args: &RunArgs) -> i32 {
    setup_logging(cli.verbose(), LogRole::Run);
    let (tx, rx) = interrupt_channel();
    let setup = resolve_run_config(cli, args)
        .and_then(|cfg| build_plugins(&cfg, &tx, rx).map(|plugins| (cfg, plugins)));
    // Only the installed sources (Ctrl+C, stdin) keep the channel open.
    drop(tx);
    let (cfg, plugins) = match setup {
        Ok(v) => v,
        Err(e) => {
            error!("{:#}", e);
            return ExitStatus::NoRestart.code();
        }
    };
    log::debug!("{} CONFIG:{:#?}", env!("CARGO_PKG_NAME").to_uppercase(), cfg);

    let result = run_batch(&cfg.run, plugins);
    write_summary(&cfg, &result);
    if result.exit_status == ExitStatus::Restart {
        eprintln!("{} >> {}", RESTART_SENTINEL, result.termination_cause);
    }
    result.exit_status.code()
}

/// Drive a child command. Always exits 0 once the driver stops on its own terms.
pub fn handle_drive(cli: &Cli, args: &DriveArgs) -> i32 {
    setup_logging(cli.verbose(), LogRole::Driver);
    let mut cfg = match load_file_config(cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            return ExitStatus::NoRestart.code();
        }
    };
    apply_drive_args(args, &mut cfg);

    let (tx, rx) = interrupt_channel();
    install_ctrlc(tx.clone());
    watch_stdin(tx);
    let report = Driver::new(args.child.clone(), cfg.driver, Some(rx)).run();
    info!(
        "driver: {} launches, {} restarts, stopped: {:?}",
        report.launches, report.restarts, report.stop_reason
    );
    ExitStatus::Normal.code()
}
