use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Supervised batch file extraction with a restarting watchdog.
#[derive(Clone, Debug, Parser)]
#[command(name = "batchguard", version)]
#[command(about = "Run a supervised batch over a file tree; `drive` restarts it when it asks to.")]
pub struct Cli {
    /// Config file. Default: `batchguard.toml` in the working directory, if present.
    #[arg(long, short = 'C', global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output.
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Run one supervised batch in this process. Exit code: 0 done, 1 do not restart, -1 restart.
    Run(RunArgs),
    /// Launch a child command and relaunch it whenever it asks for a restart.
    Drive(DriveArgs),
}

#[derive(Clone, Debug, Default, Args)]
pub struct RunArgs {
    /// Directory to crawl (or the root that listed paths are relative to).
    #[arg(value_name = "ROOT")]
    pub root: Option<PathBuf>,

    /// Crawl the paths listed in this text file instead of walking ROOT.
    #[arg(long, conflicts_with = "db")]
    pub list: Option<PathBuf>,

    /// Crawl the paths in the `files` table of this SQLite database.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Number of consumer threads.
    #[arg(long, short = 'n')]
    pub consumers: Option<usize>,

    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// An item in flight longer than this marks its consumer stale.
    #[arg(long, value_name = "MS")]
    pub stale_threshold_ms: Option<u64>,

    /// How long consumers get to finish in-flight items after an early termination.
    #[arg(long, value_name = "MS")]
    pub pause_ms: Option<u64>,

    /// End the run (and ask for a restart) after this many seconds.
    #[arg(long, value_name = "SECS")]
    pub max_alive_secs: Option<u64>,

    /// Stop crawling after this many files were queued.
    #[arg(long)]
    pub max_files: Option<usize>,

    /// Include globs, matched against file name or relative path.
    #[arg(long, short = 'i', num_args = 1..)]
    pub include: Vec<String>,

    /// Exclude globs (win over include).
    #[arg(long, short = 'e', num_args = 1..)]
    pub exclude: Vec<String>,

    #[arg(long)]
    pub min_size: Option<u64>,

    #[arg(long)]
    pub max_size: Option<u64>,

    /// Where extraction outputs go.
    #[arg(long, short = 'o')]
    pub output_dir: Option<PathBuf>,

    /// Appended to every output file name.
    #[arg(long)]
    pub suffix: Option<String>,

    /// Re-extract files whose output already exists.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub overwrite: Option<bool>,

    /// Fail (no restart) on the first unreadable path instead of skipping it.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub strict: Option<bool>,

    /// Follow symbolic links.
    #[arg(long, short = 'f', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub follow_links: Option<bool>,

    /// Walk the tree with jwalk's parallel walker.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub parallel_walk: Option<bool>,

    /// Treat any line on stdin as an interrupt (set by the driver on its children).
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub interrupt_on_stdin: Option<bool>,

    /// Show a progress counter instead of periodic status lines.
    #[arg(long, short = 'p', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub progress: Option<bool>,

    /// Write the final result as JSON to this path.
    #[arg(long)]
    pub summary_json: Option<PathBuf>,

    /// Extraction command; `{input}` and `{output}` are replaced per file.
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Clone, Debug, Args)]
pub struct DriveArgs {
    /// Stop after this many restarts. Default: unlimited.
    #[arg(long)]
    pub max_restarts: Option<u32>,

    /// How often the driver checks on its child.
    #[arg(long, value_name = "MS")]
    pub pulse_ms: Option<u64>,

    /// How long a child gets to exit after a forwarded interrupt before it is killed.
    #[arg(long, value_name = "MS")]
    pub wait_after_shutdown_ms: Option<u64>,

    /// Child command line, relaunched as-is.
    #[arg(last = true, required = true, value_name = "CHILD")]
    pub child: Vec<String>,
}

impl Cli {
    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}
