//! Load `batchguard.toml` (or the file given with `--config`) and lay it over the defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BatchError;
use crate::{AppConfig, SourceKind};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct BatchToml {
    #[serde(default)]
    run: RunSection,
    #[serde(default)]
    source: SourceSection,
    #[serde(default)]
    select: SelectSection,
    #[serde(default)]
    extract: ExtractSection,
    #[serde(default)]
    driver: DriverSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunSection {
    num_consumers: Option<usize>,
    queue_capacity: Option<usize>,
    stale_threshold_ms: Option<u64>,
    stale_check_pulse_ms: Option<u64>,
    max_stale_consumers: Option<usize>,
    consumer_poll_timeout_ms: Option<u64>,
    consumer_max_consec_wait_ms: Option<u64>,
    crawler_max_consec_wait_ms: Option<u64>,
    crawler_offer_pulse_ms: Option<u64>,
    pause_on_early_termination_ms: Option<u64>,
    max_alive_secs: Option<u64>,
    supervisor_pulse_ms: Option<u64>,
    report_interval_secs: Option<u64>,
    max_files: Option<usize>,
    interrupt_on_stdin: Option<bool>,
    progress_bar: Option<bool>,
    summary_json: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceSection {
    kind: Option<SourceKind>,
    root: Option<PathBuf>,
    list_path: Option<PathBuf>,
    db_path: Option<PathBuf>,
    follow_links: Option<bool>,
    parallel_walk: Option<bool>,
    strict: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectSection {
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    min_size: Option<u64>,
    max_size: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtractSection {
    command: Option<Vec<String>>,
    output_dir: Option<PathBuf>,
    output_suffix: Option<String>,
    overwrite: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DriverSection {
    max_restarts: Option<u32>,
    pulse_ms: Option<u64>,
    wait_after_shutdown_ms: Option<u64>,
}

/// Read and parse `path`. A missing file is `Ok(None)`; a malformed one is a config error.
pub(crate) fn load_batch_toml(path: &Path) -> Result<Option<BatchToml>, BatchError> {
    let s = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    parse_batch_toml(&s)
        .map(Some)
        .map_err(|e| BatchError::Config(format!("{}: {}", path.display(), e)))
}

pub(crate) fn parse_batch_toml(s: &str) -> Result<BatchToml, toml::de::Error> {
    toml::from_str(s)
}

/// Overwrite a config field from the file when present, optionally converting the value.
macro_rules! apply_file_opt {
    ($sec:expr, $cfg:expr, $field:ident => $target:ident) => {
        if let Some(v) = $sec.$field.clone() {
            $cfg.$target = v;
        }
    };
    ($sec:expr, $cfg:expr, $field:ident => $target:ident, $conv:expr) => {
        if let Some(v) = $sec.$field.clone() {
            $cfg.$target = $conv(v);
        }
    };
}

/// Apply file values to `cfg` (only fields present in the file). Call before applying CLI flags.
pub(crate) fn apply_file_to_config(file: &BatchToml, cfg: &mut AppConfig) {
    let ms = Duration::from_millis;
    let secs = Duration::from_secs;

    let run = &file.run;
    let rc = &mut cfg.run;
    apply_file_opt!(run, rc, num_consumers => num_consumers);
    apply_file_opt!(run, rc, queue_capacity => queue_capacity);
    apply_file_opt!(run, rc, stale_threshold_ms => stale_threshold, ms);
    apply_file_opt!(run, rc, stale_check_pulse_ms => stale_check_pulse, ms);
    apply_file_opt!(run, rc, max_stale_consumers => max_stale_consumers);
    apply_file_opt!(run, rc, consumer_poll_timeout_ms => consumer_poll_timeout, ms);
    apply_file_opt!(run, rc, consumer_max_consec_wait_ms => consumer_max_consec_wait, ms);
    apply_file_opt!(run, rc, crawler_max_consec_wait_ms => crawler_max_consec_wait, ms);
    apply_file_opt!(run, rc, crawler_offer_pulse_ms => crawler_offer_pulse, ms);
    apply_file_opt!(run, rc, pause_on_early_termination_ms => pause_on_early_termination, ms);
    apply_file_opt!(run, rc, max_alive_secs => max_alive_time, |v| Some(secs(v)));
    apply_file_opt!(run, rc, supervisor_pulse_ms => supervisor_pulse, ms);
    apply_file_opt!(run, rc, report_interval_secs => report_interval, secs);
    apply_file_opt!(run, rc, max_files => max_files, Some);
    apply_file_opt!(run, rc, interrupt_on_stdin => interrupt_on_stdin);
    apply_file_opt!(run, rc, progress_bar => progress_bar);
    apply_file_opt!(run, rc, summary_json => summary_json, Some);
    apply_file_opt!(file.source, rc, strict => strict);

    let src = &file.source;
    let sc = &mut cfg.source;
    apply_file_opt!(src, sc, kind => kind);
    apply_file_opt!(src, sc, root => root, Some);
    apply_file_opt!(src, sc, list_path => list_path, Some);
    apply_file_opt!(src, sc, db_path => db_path, Some);
    apply_file_opt!(src, sc, follow_links => follow_links);
    apply_file_opt!(src, sc, parallel_walk => parallel_walk);

    let sel = &file.select;
    let sl = &mut cfg.select;
    apply_file_opt!(sel, sl, include => include);
    apply_file_opt!(sel, sl, exclude => exclude);
    apply_file_opt!(sel, sl, min_size => min_size, Some);
    apply_file_opt!(sel, sl, max_size => max_size, Some);

    let ext = &file.extract;
    let ec = &mut cfg.extract;
    apply_file_opt!(ext, ec, command => command);
    apply_file_opt!(ext, ec, output_dir => output_dir);
    apply_file_opt!(ext, ec, output_suffix => output_suffix);
    apply_file_opt!(ext, ec, overwrite => overwrite);

    let drv = &file.driver;
    let dc = &mut cfg.driver;
    apply_file_opt!(drv, dc, max_restarts => max_restarts, Some);
    apply_file_opt!(drv, dc, pulse_ms => pulse, ms);
    apply_file_opt!(drv, dc, wait_after_shutdown_ms => wait_after_shutdown, ms);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_present_fields_override() {
        let file = parse_batch_toml(
            r#"
            [run]
            num_consumers = 3
            stale_threshold_ms = 250
            max_alive_secs = 60

            [source]
            kind = "list"
            root = "/data"
            list_path = "/data/files.txt"
            strict = true

            [extract]
            command = ["cat", "{input}"]
            "#,
        )
        .unwrap();
        let mut cfg = AppConfig::default();
        let default_queue = cfg.run.queue_capacity;
        apply_file_to_config(&file, &mut cfg);

        assert_eq!(cfg.run.num_consumers, 3);
        assert_eq!(cfg.run.stale_threshold, Duration::from_millis(250));
        assert_eq!(cfg.run.max_alive_time, Some(Duration::from_secs(60)));
        assert_eq!(cfg.run.queue_capacity, default_queue);
        assert!(cfg.run.strict);
        assert_eq!(cfg.source.kind, SourceKind::List);
        assert_eq!(cfg.extract.command, vec!["cat", "{input}"]);
        assert!(cfg.driver.max_restarts.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_batch_toml("[run]\nnum_workers = 2\n").is_err());
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_batch_toml(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }
}
