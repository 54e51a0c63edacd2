//! Data model shared by the crawler, consumers, supervisor and driver.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::BatchError;
use crate::utils::config::{Defaults, DriverDefaults, PackagePaths};

/// Key/value metadata attached to a resource. Used by the selector and to build output paths.
pub type Metadata = BTreeMap<String, String>;

/// Well-known metadata keys filled by the crawl sources.
pub struct MetaKeys;

impl MetaKeys {
    /// Relative path, `/`-separated.
    pub const PATH: &'static str = "path";
    pub const NAME: &'static str = "name";
    pub const EXTENSION: &'static str = "extension";
    /// Size in bytes (decimal string).
    pub const SIZE: &'static str = "size";
    pub const MTIME_NS: &'static str = "mtime_ns";
}

/// One unit of crawled work: an identifier, where to read it from, and its metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileResource {
    pub id: String,
    pub path: PathBuf,
    pub metadata: Metadata,
}

impl FileResource {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Relative path from metadata, falling back to the id.
    pub fn relative_path(&self) -> &str {
        self.metadata
            .get(MetaKeys::PATH)
            .map(String::as_str)
            .unwrap_or(&self.id)
    }

    pub fn size(&self) -> Option<u64> {
        self.metadata.get(MetaKeys::SIZE)?.parse().ok()
    }
}

/// What travels through the queue. `Poison` ends exactly one consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkItem {
    Resource(FileResource),
    Poison,
}

/// The item a consumer is working on and since when.
#[derive(Clone, Debug)]
pub struct InFlightMarker {
    pub resource_id: String,
    pub started: Instant,
}

impl InFlightMarker {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Consumer lifecycle. Anything past `Active` is terminal and never overwritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerState {
    NotStarted,
    Active,
    Retired,
    Stale,
    TimedOutWaiting,
    SwallowedPoison,
    ThreadInterrupted,
    WorkerException,
    WorkerError,
    Completed,
}

impl ConsumerState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ConsumerState::NotStarted | ConsumerState::Active)
    }

    /// Terminal states caused by the per-item callback failing.
    pub fn is_worker_failure(self) -> bool {
        matches!(
            self,
            ConsumerState::WorkerException | ConsumerState::WorkerError
        )
    }
}

/// The single reason a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationCause {
    CompletedNormally,
    SupervisorExceptionNoRestart,
    SupervisorException,
    CrawlerTimedOut,
    TooManyTimedOutConsumers,
    UserInterruption,
    AliveTooLong,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationCause::CompletedNormally => "completed normally",
            TerminationCause::SupervisorExceptionNoRestart => {
                "supervisor caught an error that should not be retried"
            }
            TerminationCause::SupervisorException => "supervisor caught an error",
            TerminationCause::CrawlerTimedOut => "crawler timed out adding work to the queue",
            TerminationCause::TooManyTimedOutConsumers => "too many consumers timed out",
            TerminationCause::UserInterruption => "interrupted by user",
            TerminationCause::AliveTooLong => "run exceeded its max alive time",
        };
        f.write_str(s)
    }
}

/// Process-level outcome; the numeric code is the contract with the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Normal,
    NoRestart,
    Restart,
}

impl ExitStatus {
    pub const NORMAL_CODE: i32 = 0;
    pub const NO_RESTART_CODE: i32 = 1;
    pub const RESTART_CODE: i32 = -1;

    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Normal => Self::NORMAL_CODE,
            ExitStatus::NoRestart => Self::NO_RESTART_CODE,
            ExitStatus::Restart => Self::RESTART_CODE,
        }
    }

    /// Map a child exit code back. On unix `exit(-1)` is observed as 255.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            Self::NORMAL_CODE => Some(ExitStatus::Normal),
            Self::NO_RESTART_CODE => Some(ExitStatus::NoRestart),
            Self::RESTART_CODE | 255 => Some(ExitStatus::Restart),
            _ => None,
        }
    }

    /// Exit status for a termination cause. `work_may_remain` is true when the crawler was still
    /// active or the queue still held items at shutdown.
    pub fn decide(cause: TerminationCause, work_may_remain: bool) -> Self {
        match cause {
            TerminationCause::UserInterruption | TerminationCause::SupervisorExceptionNoRestart => {
                ExitStatus::NoRestart
            }
            TerminationCause::CompletedNormally if !work_may_remain => ExitStatus::Normal,
            TerminationCause::CompletedNormally
            | TerminationCause::SupervisorException
            | TerminationCause::CrawlerTimedOut
            | TerminationCause::TooManyTimedOutConsumers
            | TerminationCause::AliveTooLong => ExitStatus::Restart,
        }
    }
}

/// Final outcome of one supervised run. Built once, at the end.
#[derive(Clone, Debug, Serialize)]
pub struct AggregateResult {
    pub items_considered: usize,
    pub items_added: usize,
    pub items_processed: usize,
    pub elapsed_secs: f64,
    pub exit_status: ExitStatus,
    pub termination_cause: TerminationCause,
    /// Ids of items whose consumer went stale (hung past the threshold), sorted.
    pub stale_items: Vec<String>,
}

/// Crawler counts and flags when the crawl task returns.
#[derive(Clone, Debug, Default)]
pub struct CrawlerResult {
    pub considered: usize,
    pub added: usize,
    pub timed_out: bool,
    pub completed_crawling: bool,
}

/// Why a worker callback ended its consumer.
#[derive(Clone, Debug)]
pub struct WorkerFailure {
    pub message: String,
    pub no_restart: bool,
}

#[derive(Clone, Debug)]
pub struct ConsumerResult {
    pub consumer_id: usize,
    pub state: ConsumerState,
    /// Still set when the consumer died mid-item.
    pub in_flight: Option<InFlightMarker>,
    pub processed: usize,
    pub failure: Option<WorkerFailure>,
}

#[derive(Clone, Debug, Default)]
pub struct MonitorResult {
    pub stale_count: usize,
    pub stale: Vec<InFlightMarker>,
}

#[derive(Clone, Debug)]
pub struct InterruptResult {
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
pub struct ReporterResult {
    pub reports: usize,
}

/// Result of any pooled task, matched exhaustively by the supervisor.
#[derive(Clone, Debug)]
pub enum TaskResult {
    Crawler(CrawlerResult),
    Consumer(ConsumerResult),
    Monitor(MonitorResult),
    Interrupter(InterruptResult),
    Reporter(ReporterResult),
}

/// Where candidates come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Walk a directory tree.
    #[default]
    Dir,
    /// One path per line in a text file, relative to the root.
    List,
    /// Paths from the `files` table of a SQLite database.
    Sqlite,
}

#[derive(Clone, Debug, Default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub root: Option<PathBuf>,
    pub list_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub follow_links: bool,
    pub parallel_walk: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SelectConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
}

/// External command run once per selected file.
#[derive(Clone, Debug)]
pub struct ExtractConfig {
    /// argv; `{input}` and `{output}` are replaced per file.
    pub command: Vec<String>,
    pub output_dir: PathBuf,
    pub output_suffix: String,
    pub overwrite: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            output_dir: PathBuf::from(PackagePaths::get().output_dirname()),
            output_suffix: Defaults::OUTPUT_SUFFIX.to_string(),
            overwrite: false,
        }
    }
}

/// Supervisor tuning for one run.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub num_consumers: usize,
    pub queue_capacity: usize,
    pub stale_threshold: Duration,
    pub stale_check_pulse: Duration,
    pub max_stale_consumers: usize,
    pub consumer_poll_timeout: Duration,
    pub consumer_max_consec_wait: Duration,
    pub crawler_max_consec_wait: Duration,
    pub crawler_offer_pulse: Duration,
    pub pause_on_early_termination: Duration,
    /// `None` lets the run live until it finishes.
    pub max_alive_time: Option<Duration>,
    pub supervisor_pulse: Duration,
    pub report_interval: Duration,
    pub max_files: Option<usize>,
    /// Fail the run (no restart) on the first unreadable path.
    pub strict: bool,
    pub interrupt_on_stdin: bool,
    pub progress_bar: bool,
    pub summary_json: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            num_consumers: Defaults::num_consumers(),
            queue_capacity: Defaults::QUEUE_CAPACITY,
            stale_threshold: Defaults::STALE_THRESHOLD,
            stale_check_pulse: Defaults::STALE_CHECK_PULSE,
            max_stale_consumers: Defaults::MAX_STALE_CONSUMERS,
            consumer_poll_timeout: Defaults::CONSUMER_POLL_TIMEOUT,
            consumer_max_consec_wait: Defaults::CONSUMER_MAX_CONSEC_WAIT,
            crawler_max_consec_wait: Defaults::CRAWLER_MAX_CONSEC_WAIT,
            crawler_offer_pulse: Defaults::CRAWLER_OFFER_PULSE,
            pause_on_early_termination: Defaults::PAUSE_ON_EARLY_TERMINATION,
            max_alive_time: None,
            supervisor_pulse: Defaults::SUPERVISOR_PULSE,
            report_interval: Defaults::REPORT_INTERVAL,
            max_files: None,
            strict: false,
            interrupt_on_stdin: false,
            progress_bar: false,
            summary_json: None,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.num_consumers == 0 {
            return Err(BatchError::Config("num_consumers must be at least 1".into()));
        }
        if self.max_stale_consumers == 0 {
            return Err(BatchError::Config(
                "max_stale_consumers must be at least 1".into(),
            ));
        }
        if self.supervisor_pulse.is_zero() || self.stale_check_pulse.is_zero() {
            return Err(BatchError::Config("pulse intervals must be non-zero".into()));
        }
        Ok(())
    }
}

/// Restart policy of the watchdog driver.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// `None` restarts without limit.
    pub max_restarts: Option<u32>,
    pub pulse: Duration,
    pub wait_after_shutdown: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_restarts: None,
            pulse: DriverDefaults::PULSE,
            wait_after_shutdown: DriverDefaults::WAIT_AFTER_SHUTDOWN,
        }
    }
}

/// Everything the CLI resolves from defaults, the TOML file and flags.
#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub run: BatchConfig,
    pub source: SourceConfig,
    pub select: SelectConfig,
    pub extract: ExtractConfig,
    pub driver: DriverConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), BatchError> {
        self.run.validate()?;
        let missing = match self.source.kind {
            SourceKind::Dir => self.source.root.is_none().then_some("source root"),
            SourceKind::List => (self.source.root.is_none() || self.source.list_path.is_none())
                .then_some("source root and list_path"),
            SourceKind::Sqlite => (self.source.root.is_none() || self.source.db_path.is_none())
                .then_some("source root and db_path"),
        };
        if let Some(what) = missing {
            return Err(BatchError::Config(format!(
                "{:?} source needs {}",
                self.source.kind, what
            )));
        }
        if self.extract.command.is_empty() {
            return Err(BatchError::Config("extract command is empty".into()));
        }
        if let (Some(min), Some(max)) = (self.select.min_size, self.select.max_size)
            && min > max
        {
            return Err(BatchError::Config(format!(
                "min_size {} is larger than max_size {}",
                min, max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_too_long_requests_restart() {
        assert_eq!(
            ExitStatus::decide(TerminationCause::AliveTooLong, false),
            ExitStatus::Restart
        );
        assert_eq!(ExitStatus::Restart.code(), -1);
    }

    #[test]
    fn user_interruption_never_restarts() {
        for remaining in [true, false] {
            assert_eq!(
                ExitStatus::decide(TerminationCause::UserInterruption, remaining),
                ExitStatus::NoRestart
            );
        }
    }

    #[test]
    fn completion_with_leftover_work_restarts() {
        assert_eq!(
            ExitStatus::decide(TerminationCause::CompletedNormally, false),
            ExitStatus::Normal
        );
        assert_eq!(
            ExitStatus::decide(TerminationCause::CompletedNormally, true),
            ExitStatus::Restart
        );
    }

    #[test]
    fn exit_code_255_reads_as_restart() {
        assert_eq!(ExitStatus::from_code(255), Some(ExitStatus::Restart));
        assert_eq!(ExitStatus::from_code(-1), Some(ExitStatus::Restart));
        assert_eq!(ExitStatus::from_code(1), Some(ExitStatus::NoRestart));
        assert_eq!(ExitStatus::from_code(7), None);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(BatchConfig::default().validate().is_ok());
        let zero = BatchConfig {
            num_consumers: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(BatchError::Config(_))));
    }

    #[test]
    fn terminal_states() {
        assert!(!ConsumerState::NotStarted.is_terminal());
        assert!(!ConsumerState::Active.is_terminal());
        assert!(ConsumerState::Stale.is_terminal());
        assert!(ConsumerState::WorkerError.is_worker_failure());
        assert!(!ConsumerState::Retired.is_worker_failure());
    }
}
