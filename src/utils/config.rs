//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
    output_dirname: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!("{pkg}.toml"),
                output_dirname: format!("{pkg}-output"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Config file looked up in the working directory when `--config` is not given.
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Default extraction output directory name.
    pub fn output_dirname(&self) -> &str {
        &self.output_dirname
    }
}

// ---- Process boundary ----

/// Prefix of the stderr line a run prints when it wants the driver to restart it.
/// Full line: `<RESTART_SENTINEL> >> <reason>`.
pub const RESTART_SENTINEL: &str = "BATCH_PROCESS_FATAL_MUST_RESTART";

// ---- Run defaults ----

/// Defaults for [`BatchConfig`](crate::BatchConfig). Every one is overridable from file or CLI.
pub struct Defaults;

impl Defaults {
    pub const QUEUE_CAPACITY: usize = 10_000;
    /// An item in flight longer than this marks its consumer stale.
    pub const STALE_THRESHOLD: Duration = Duration::from_secs(120);
    pub const STALE_CHECK_PULSE: Duration = Duration::from_secs(1);
    pub const MAX_STALE_CONSUMERS: usize = 1;
    pub const CONSUMER_POLL_TIMEOUT: Duration = Duration::from_secs(1);
    pub const CONSUMER_MAX_CONSEC_WAIT: Duration = Duration::from_secs(300);
    pub const CRAWLER_MAX_CONSEC_WAIT: Duration = Duration::from_secs(300);
    pub const CRAWLER_OFFER_PULSE: Duration = Duration::from_millis(100);
    /// Polite wait after an early termination; same order as the stale threshold.
    pub const PAUSE_ON_EARLY_TERMINATION: Duration = Duration::from_secs(120);
    pub const SUPERVISOR_PULSE: Duration = Duration::from_secs(1);
    pub const REPORT_INTERVAL: Duration = Duration::from_secs(30);
    pub const OUTPUT_SUFFIX: &'static str = ".txt";

    /// One consumer per core, leaving one for the crawler and supervisor.
    pub fn num_consumers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }
}

/// Fixed supervisor timings (not user-facing).
pub struct SupervisorConsts;

impl SupervisorConsts {
    /// Pool slots beyond the consumers: crawler, monitor, interrupter, reporter.
    pub const EXTRA_TASKS: usize = 4;
    /// Step of the polite wait while consumers finish in-flight items.
    pub const POLITE_WAIT_STEP: Duration = Duration::from_millis(500);
    /// Per-result timeout when draining completions after force shutdown.
    pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(100);
}

// ---- Driver defaults ----

pub struct DriverDefaults;

impl DriverDefaults {
    pub const PULSE: Duration = Duration::from_secs(1);
    /// How long a child gets to exit on its own after a forwarded interrupt.
    pub const WAIT_AFTER_SHUTDOWN: Duration = Duration::from_secs(60);
    /// Token written to the child's stdin to request an interrupt.
    pub const INTERRUPT_TOKEN: &'static str = "interrupt";
}

// ---- Sources ----

/// Rows fetched per page from a SQLite file listing.
pub const DB_LIST_PAGE_SIZE: i64 = 1000;
