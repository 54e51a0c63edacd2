//! Status reporter: periodic progress line (counts, elapsed, memory), optionally a kdam counter.

use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use crate::{ConsumerState, ReporterResult};
use crate::engine::progress::{ProgressBar, create_counter, set_bar_position};

use super::consumer::Consumer;
use super::crawler::CrawlerStatus;
use super::signal::CancelToken;

pub struct StatusReporter {
    crawler: Arc<CrawlerStatus>,
    consumers: Vec<Arc<Consumer>>,
    interval: Duration,
    started: Instant,
    stop: CancelToken,
    bar: Option<ProgressBar>,
}

impl StatusReporter {
    pub fn new(
        crawler: Arc<CrawlerStatus>,
        consumers: Vec<Arc<Consumer>>,
        interval: Duration,
        stop: CancelToken,
        progress_bar: bool,
    ) -> Self {
        Self {
            crawler,
            consumers,
            interval,
            started: Instant::now(),
            stop,
            bar: progress_bar.then(|| create_counter("Processing")),
        }
    }

    fn processed(&self) -> usize {
        self.consumers.iter().map(|c| c.processed()).sum()
    }

    /// One progress line: counts, elapsed time, active consumers and, when known, memory.
    pub fn status_line(&self, memory_bytes: Option<u64>) -> String {
        let active = self.consumers.iter().filter(|c| c.is_active()).count();
        let stale = self
            .consumers
            .iter()
            .filter(|c| c.state() == ConsumerState::Stale)
            .count();
        let mut line = format!(
            "processed {} of {} queued ({} considered, {} unreadable) in {}s; {} of {} consumers active, {} stale",
            self.processed(),
            self.crawler.added(),
            self.crawler.considered(),
            self.crawler.skipped(),
            self.started.elapsed().as_secs(),
            active,
            self.consumers.len(),
            stale,
        );
        if let Some(bytes) = memory_bytes {
            line.push_str(&format!("; rss {} MiB", bytes / (1024 * 1024)));
        }
        line
    }

    pub fn run(&self) -> ReporterResult {
        let mut sys = System::new();
        let pid = sysinfo::get_current_pid().ok();
        let mut result = ReporterResult::default();
        while !self.stop.sleep(self.interval) {
            let memory = pid.and_then(|pid| {
                sys.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory(),
                );
                sys.process(pid).map(|p| p.memory())
            });
            match &self.bar {
                Some(bar) => set_bar_position(bar, self.processed()),
                None => info!("{}", self.status_line(memory)),
            }
            result.reports += 1;
        }
        result
    }
}
