//! Run context: builds the queue, tokens and every component of one supervised run from a
//! [`BatchConfig`] and the caller's plugins.

use crossbeam_channel::Receiver;
use std::sync::Arc;

use crate::engine::processor::FileProcessor;
use crate::engine::selector::Selector;
use crate::{BatchConfig, InFlightMarker};

use super::consumer::{Consumer, ConsumerSettings};
use super::crawler::{Crawler, CrawlerSettings, CrawlerStatus};
use super::interrupter::{Interrupter, interrupt_channel};
use super::monitor::{MonitorSettings, TimeoutMonitor};
use super::queue::BoundedQueue;
use super::reporter::StatusReporter;
use super::signal::CancelToken;
use super::walk::CrawlSource;

/// What the caller plugs into a run.
pub struct BatchPlugins {
    pub source: CrawlSource,
    pub selector: Arc<dyn Selector>,
    pub processor: Arc<dyn FileProcessor>,
    /// Interrupt signals (stdin line, Ctrl+C). `None` disables interruption.
    pub interrupts: Option<Receiver<String>>,
}

/// Shared state the supervisor keeps for the whole run.
pub struct RunContext {
    pub queue: BoundedQueue,
    /// Orderly stop: crawler stops adding, monitor/reporter/interrupter return.
    pub stop: CancelToken,
    /// Force shutdown: consumers quit at their next poll point.
    pub interrupt: CancelToken,
    pub crawler: Arc<Crawler>,
    pub crawler_status: Arc<CrawlerStatus>,
    pub consumers: Vec<Arc<Consumer>>,
    pub processor: Arc<dyn FileProcessor>,
    /// Markers the monitor reported stale.
    pub stale_rx: Receiver<InFlightMarker>,
}

/// Components moved into their pool tasks.
pub struct RunTasks {
    pub source: CrawlSource,
    pub monitor: TimeoutMonitor,
    pub interrupter: Interrupter,
    pub reporter: StatusReporter,
}

impl RunContext {
    pub fn build(config: &BatchConfig, plugins: BatchPlugins) -> (RunContext, RunTasks) {
        let BatchPlugins {
            source,
            selector,
            processor,
            interrupts,
        } = plugins;
        let n = config.num_consumers;
        let queue = BoundedQueue::new(config.queue_capacity, n);
        let stop = CancelToken::new();
        let interrupt = CancelToken::new();

        let crawler = Arc::new(Crawler::new(
            queue.clone(),
            selector,
            CrawlerSettings {
                num_consumers: n,
                max_consec_wait: config.crawler_max_consec_wait,
                offer_pulse: config.crawler_offer_pulse,
                max_files: config.max_files,
                strict: config.strict,
            },
            stop.clone(),
            interrupt.clone(),
        ));
        let crawler_status = crawler.status();

        let consumer_settings = ConsumerSettings {
            poll_timeout: config.consumer_poll_timeout,
            max_consec_wait: config.consumer_max_consec_wait,
        };
        let consumers: Vec<Arc<Consumer>> = (0..n)
            .map(|id| {
                Arc::new(Consumer::new(
                    id,
                    queue.clone(),
                    Arc::clone(&processor),
                    consumer_settings.clone(),
                    interrupt.clone(),
                ))
            })
            .collect();

        let (monitor, stale_rx) = TimeoutMonitor::new(
            consumers.clone(),
            MonitorSettings {
                pulse: config.stale_check_pulse,
                stale_threshold: config.stale_threshold,
                max_stale_consumers: config.max_stale_consumers,
            },
            stop.clone(),
        );

        // Without a source, the sender is dropped here and the interrupter just waits for stop.
        let signals = interrupts.unwrap_or_else(|| interrupt_channel().1);
        let interrupter = Interrupter::new(signals, stop.clone());

        let reporter = StatusReporter::new(
            Arc::clone(&crawler_status),
            consumers.clone(),
            config.report_interval,
            stop.clone(),
            config.progress_bar,
        );

        (
            RunContext {
                queue,
                stop,
                interrupt,
                crawler,
                crawler_status,
                consumers,
                processor,
                stale_rx,
            },
            RunTasks {
                source,
                monitor,
                interrupter,
                reporter,
            },
        )
    }

    pub fn processed(&self) -> usize {
        self.consumers.iter().map(|c| c.processed()).sum()
    }
}
