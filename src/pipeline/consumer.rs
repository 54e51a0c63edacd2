//! Consumer: pulls work items off the queue and runs the per-item callback on each.
//!
//! State and the in-flight marker live under one mutex so a concurrent staleness check and the
//! consumer's own transitions cannot both win: the first terminal state sticks.

use log::{debug, error, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::engine::processor::FileProcessor;
use crate::error::BatchError;
use crate::{ConsumerResult, ConsumerState, FileResource, InFlightMarker, WorkItem, WorkerFailure};

use super::pool::panic_message;
use super::queue::BoundedQueue;
use super::signal::CancelToken;

#[derive(Clone, Debug)]
pub struct ConsumerSettings {
    /// Timeout of a single queue poll; bounds how long a retire request can go unnoticed.
    pub poll_timeout: Duration,
    /// Self-retire after the queue has been empty this long in a row.
    pub max_consec_wait: Duration,
}

struct Guarded {
    state: ConsumerState,
    in_flight: Option<InFlightMarker>,
}

pub struct Consumer {
    id: usize,
    queue: BoundedQueue,
    processor: Arc<dyn FileProcessor>,
    settings: ConsumerSettings,
    interrupt: CancelToken,
    guarded: Mutex<Guarded>,
    processed: AtomicUsize,
}

impl Consumer {
    pub fn new(
        id: usize,
        queue: BoundedQueue,
        processor: Arc<dyn FileProcessor>,
        settings: ConsumerSettings,
        interrupt: CancelToken,
    ) -> Self {
        Self {
            id,
            queue,
            processor,
            settings,
            interrupt,
            guarded: Mutex::new(Guarded {
                state: ConsumerState::NotStarted,
                in_flight: None,
            }),
            processed: AtomicUsize::new(0),
        }
    }

    // A panic in the callback never happens while this lock is held.
    fn guard(&self) -> MutexGuard<'_, Guarded> {
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> ConsumerState {
        self.guard().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConsumerState::Active
    }

    pub fn in_flight(&self) -> Option<InFlightMarker> {
        self.guard().in_flight.clone()
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    /// Move to `state` unless a terminal state is already set. Returns whether it took.
    fn set_terminal(&self, state: ConsumerState) -> bool {
        let mut g = self.guard();
        if g.state.is_terminal() {
            return false;
        }
        g.state = state;
        true
    }

    /// Ask the consumer to stop; honoured at the next poll or before the next item.
    pub fn please_retire(&self) {
        if self.set_terminal(ConsumerState::Retired) {
            debug!("consumer {}: retire requested", self.id);
        }
    }

    /// If active and the in-flight item is older than `threshold`, mark stale and return it.
    /// Returns the marker at most once per consumer.
    pub fn check_for_stale(&self, threshold: Duration) -> Option<InFlightMarker> {
        let mut g = self.guard();
        if g.state != ConsumerState::Active {
            return None;
        }
        let marker = g.in_flight.as_ref()?;
        if marker.elapsed() <= threshold {
            return None;
        }
        let marker = marker.clone();
        g.state = ConsumerState::Stale;
        Some(marker)
    }

    /// In-flight marker older than `threshold`, whatever the state, unless the callback already
    /// failed on it. Used at shutdown, after retirement has replaced `Active`.
    pub fn overdue(&self, threshold: Duration) -> Option<InFlightMarker> {
        let g = self.guard();
        if g.state.is_worker_failure() {
            return None;
        }
        g.in_flight
            .as_ref()
            .filter(|m| m.elapsed() > threshold)
            .cloned()
    }

    /// Consume until poison, retirement, interruption, a long empty wait, or a worker failure.
    pub fn run(&self) -> ConsumerResult {
        {
            let mut g = self.guard();
            if g.state == ConsumerState::NotStarted {
                g.state = ConsumerState::Active;
            }
        }

        let failure = self.consume_loop();
        let g = self.guard();
        debug!(
            "consumer {}: finished as {:?} after {} items",
            self.id,
            g.state,
            self.processed()
        );
        ConsumerResult {
            consumer_id: self.id,
            state: g.state,
            in_flight: g.in_flight.clone(),
            processed: self.processed(),
            failure,
        }
    }

    fn consume_loop(&self) -> Option<WorkerFailure> {
        let mut waited = Duration::ZERO;
        loop {
            if !self.is_active() {
                return None;
            }
            if self.interrupt.is_cancelled() {
                self.set_terminal(ConsumerState::ThreadInterrupted);
                return None;
            }

            let started = Instant::now();
            let item = match self.queue.try_pop(self.settings.poll_timeout) {
                Some(item) => item,
                None => {
                    waited += started.elapsed();
                    if waited > self.settings.max_consec_wait {
                        warn!(
                            "consumer {}: queue empty for {:?}, giving up",
                            self.id, waited
                        );
                        self.set_terminal(ConsumerState::TimedOutWaiting);
                        return None;
                    }
                    continue;
                }
            };
            waited = Duration::ZERO;

            match item {
                WorkItem::Poison => {
                    self.set_terminal(ConsumerState::SwallowedPoison);
                    return None;
                }
                WorkItem::Resource(resource) => {
                    if let Some(failure) = self.process_one(&resource) {
                        return Some(failure);
                    }
                }
            }
        }
    }

    fn process_one(&self, resource: &FileResource) -> Option<WorkerFailure> {
        {
            let mut g = self.guard();
            if g.state != ConsumerState::Active {
                debug!(
                    "consumer {}: dropping {} after state became {:?}",
                    self.id, resource.id, g.state
                );
                return None;
            }
            g.in_flight = Some(InFlightMarker::new(resource.id.as_str()));
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.processor.process(resource)));
        match outcome {
            Ok(Ok(processed)) => {
                if processed {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                }
                self.guard().in_flight = None;
                None
            }
            // The marker stays set: it names the item that killed this consumer.
            Ok(Err(e)) => {
                error!(
                    "consumer {}: worker failed on {}: {:#}",
                    self.id, resource.id, e
                );
                self.set_terminal(ConsumerState::WorkerException);
                Some(WorkerFailure {
                    message: format!("{}: {:#}", resource.id, e),
                    no_restart: BatchError::is_no_restart(&e),
                })
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(
                    "consumer {}: worker panicked on {}: {}",
                    self.id, resource.id, msg
                );
                self.set_terminal(ConsumerState::WorkerError);
                Some(WorkerFailure {
                    message: format!("{}: {}", resource.id, msg),
                    no_restart: false,
                })
            }
        }
    }
}
