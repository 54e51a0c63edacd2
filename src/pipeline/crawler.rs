//! Crawler: pulls candidates from a crawl source, filters them, and feeds the bounded queue.
//! Ends by placing one poison item per consumer.

use anyhow::Result;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::engine::selector::Selector;
use crate::error::BatchError;
use crate::{CrawlerResult, FileResource, WorkItem};

use super::queue::BoundedQueue;
use super::signal::CancelToken;
use super::walk::{CrawlOutcome, CrawlSource};

/// Longest single offer between backoff steps.
const MAX_OFFER_PAUSE: Duration = Duration::from_secs(1);

/// Crawler tuning, copied out of the run config.
#[derive(Clone, Debug)]
pub struct CrawlerSettings {
    pub num_consumers: usize,
    /// Give up on a full queue after waiting this long for one item (or for all poison).
    pub max_consec_wait: Duration,
    /// First offer timeout; doubles on every failed offer up to one second.
    pub offer_pulse: Duration,
    /// Stop (orderly, no timeout) once this many items were added.
    pub max_files: Option<usize>,
    /// Fail the crawl on the first unreadable path instead of skipping it.
    pub strict: bool,
}

/// Live crawler flags and counters. Written by the crawler thread only.
#[derive(Debug)]
pub struct CrawlerStatus {
    active: AtomicBool,
    completed_crawling: AtomicBool,
    timed_out: AtomicBool,
    considered: AtomicUsize,
    added: AtomicUsize,
    skipped: AtomicUsize,
}

impl Default for CrawlerStatus {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(true),
            completed_crawling: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            considered: AtomicUsize::new(0),
            added: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        }
    }
}

impl CrawlerStatus {
    /// True until the crawl loop exits for any reason.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// True once every consumer's poison is on the queue.
    pub fn has_completed_crawling(&self) -> bool {
        self.completed_crawling.load(Ordering::SeqCst)
    }

    /// True only if placing a real item (not poison) ran out of time.
    pub fn was_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub fn considered(&self) -> usize {
        self.considered.load(Ordering::Relaxed)
    }

    pub fn added(&self) -> usize {
        self.added.load(Ordering::Relaxed)
    }

    /// Paths the source could not read.
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> CrawlerResult {
        CrawlerResult {
            considered: self.considered(),
            added: self.added(),
            timed_out: self.was_timed_out(),
            completed_crawling: self.has_completed_crawling(),
        }
    }
}

/// Outcome of offering one resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Added,
    NotSelected,
    /// The run asked the crawler to stop while it waited for queue space.
    Stopped,
}

pub struct Crawler {
    queue: BoundedQueue,
    selector: Arc<dyn Selector>,
    status: Arc<CrawlerStatus>,
    settings: CrawlerSettings,
    stop: CancelToken,
    interrupt: CancelToken,
}

impl Crawler {
    /// `stop` asks for an orderly end of crawling; `interrupt` is the force-shutdown signal.
    pub fn new(
        queue: BoundedQueue,
        selector: Arc<dyn Selector>,
        settings: CrawlerSettings,
        stop: CancelToken,
        interrupt: CancelToken,
    ) -> Self {
        Self {
            queue,
            selector,
            status: Arc::new(CrawlerStatus::default()),
            settings,
            stop,
            interrupt,
        }
    }

    pub fn status(&self) -> Arc<CrawlerStatus> {
        Arc::clone(&self.status)
    }

    fn should_stop(&self) -> bool {
        self.stop.is_cancelled() || self.interrupt.is_cancelled()
    }

    /// Count `resource` as considered; if selected, enqueue it with incremental backoff.
    /// Fails with [`BatchError::CrawlerTimeout`] once the max consecutive wait is exceeded.
    pub fn try_add(&self, resource: FileResource) -> Result<Admission, BatchError> {
        self.status.considered.fetch_add(1, Ordering::Relaxed);
        if !self.selector.select(&resource.metadata) {
            debug!("not selected: {}", resource.id);
            return Ok(Admission::NotSelected);
        }

        let mut item = WorkItem::Resource(resource);
        let mut waited = Duration::ZERO;
        let mut pause = self.settings.offer_pulse;
        loop {
            let started = Instant::now();
            match self.queue.try_push(item, pause) {
                Ok(()) => {
                    self.status.added.fetch_add(1, Ordering::Relaxed);
                    return Ok(Admission::Added);
                }
                Err(back) => item = back,
            }
            waited += started.elapsed();
            if waited > self.settings.max_consec_wait {
                self.status.timed_out.store(true, Ordering::SeqCst);
                return Err(BatchError::CrawlerTimeout {
                    waited_ms: waited.as_millis(),
                });
            }
            if self.should_stop() {
                return Ok(Admission::Stopped);
            }
            pause = (pause * 2).min(MAX_OFFER_PAUSE);
        }
    }

    /// Crawl `source` to the end (or until stopped), then place poison. Returns final counts.
    pub fn run(&self, source: CrawlSource) -> Result<CrawlerResult> {
        let crawled = self.crawl(source);
        self.status.active.store(false, Ordering::SeqCst);
        let poisoned = self.shutdown_queue();

        if let Err(e) = crawled {
            return match e.downcast_ref::<BatchError>() {
                Some(BatchError::CrawlerTimeout { waited_ms }) => {
                    warn!("crawler timed out after {}ms waiting on a full queue", waited_ms);
                    Ok(self.status.snapshot())
                }
                _ => Err(e),
            };
        }
        match poisoned {
            Ok(()) => Ok(self.status.snapshot()),
            // Consumers were already told to retire; nobody needs the poison.
            Err(e) if self.should_stop() => {
                debug!("poison not fully placed after stop request: {}", e);
                Ok(self.status.snapshot())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn crawl(&self, source: CrawlSource) -> Result<()> {
        let iter = source()?;
        for outcome in iter {
            if self.should_stop() {
                debug!("crawler: stop requested");
                break;
            }
            if let Some(max) = self.settings.max_files
                && self.status.added() >= max
            {
                info!("crawler: reached max files ({}), stopping early", max);
                break;
            }
            match outcome {
                CrawlOutcome::Resource(resource) => {
                    if self.try_add(resource)? == Admission::Stopped {
                        break;
                    }
                }
                CrawlOutcome::Skipped { msg, path } => {
                    let shown = path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "<no path>".to_string());
                    if self.settings.strict {
                        return Err(BatchError::NoRestart(format!(
                            "strict mode: {} (path: {})",
                            msg, shown
                        ))
                        .into());
                    }
                    warn!("skipping {}: {}", shown, msg);
                    self.status.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    /// Place one poison per consumer within the max wait budget. Idempotent.
    pub fn shutdown_queue(&self) -> Result<(), BatchError> {
        if self.status.has_completed_crawling() {
            return Ok(());
        }
        let expected = self.settings.num_consumers;
        let mut placed = 0;
        let mut waited = Duration::ZERO;
        while placed < expected {
            let started = Instant::now();
            match self.queue.try_push(WorkItem::Poison, self.settings.offer_pulse) {
                Ok(()) => placed += 1,
                Err(_) => {
                    waited += started.elapsed();
                    if waited > self.settings.max_consec_wait || self.should_stop() {
                        return Err(BatchError::PoisonTimeout { placed, expected });
                    }
                }
            }
        }
        self.status.completed_crawling.store(true, Ordering::SeqCst);
        debug!("crawler: placed {} poison items", placed);
        Ok(())
    }
}
