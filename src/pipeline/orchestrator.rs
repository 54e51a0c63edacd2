//! Supervisor: runs the crawler, the consumers and the helper tasks on one pool, decides the single
//! termination cause, then shuts everything down in a fixed order and builds the aggregate result.

use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::utils::config::SupervisorConsts;
use crate::{
    AggregateResult, BatchConfig, ConsumerState, ExitStatus, InFlightMarker, TaskResult,
    TerminationCause,
};

use super::context::{BatchPlugins, RunContext, RunTasks};
use super::pool::{TaskCompletion, TaskPool};

/// What the supervisor has learned from completed tasks so far.
#[derive(Debug, Default)]
struct Tally {
    /// Ids of consumers whose task has returned.
    consumers_done: BTreeSet<usize>,
    /// Ids of consumers that returned in the `Stale` state.
    returned_stale: BTreeSet<usize>,
    crawler_timed_out: bool,
    interrupted: Option<String>,
    stale_count: usize,
    /// First task failure or worker failure: (message, no_restart).
    failure: Option<(String, bool)>,
}

impl Tally {
    fn record(&mut self, completion: TaskCompletion, stale_threshold: Duration, stopping: bool) {
        let TaskCompletion { task, outcome } = completion;
        match outcome {
            Ok(TaskResult::Crawler(r)) => {
                debug!(
                    "crawler finished: {} considered, {} added, timed out: {}",
                    r.considered, r.added, r.timed_out
                );
                self.crawler_timed_out |= r.timed_out;
            }
            Ok(TaskResult::Consumer(r)) => {
                self.consumers_done.insert(r.consumer_id);
                if r.state == ConsumerState::Stale {
                    self.returned_stale.insert(r.consumer_id);
                }
                debug!(
                    "consumer {} finished as {:?} after {} items",
                    r.consumer_id, r.state, r.processed
                );
                if let Some(marker) = &r.in_flight
                    && marker.elapsed() > stale_threshold
                {
                    warn!(
                        "{} was in flight for {:?}; likely poison pill, consider excluding it",
                        marker.resource_id,
                        marker.elapsed()
                    );
                }
                if let Some(f) = r.failure
                    && self.failure.is_none()
                {
                    self.failure = Some((f.message, f.no_restart));
                }
            }
            Ok(TaskResult::Monitor(r)) => self.stale_count += r.stale_count,
            Ok(TaskResult::Interrupter(r)) => {
                // Once the run is stopping the interrupter only reports that it was released.
                if !stopping {
                    self.interrupted = Some(r.reason);
                }
            }
            Ok(TaskResult::Reporter(r)) => debug!("reporter finished after {} reports", r.reports),
            Err(f) => {
                error!("task {} failed: {}", task, f.message);
                if self.failure.is_none() {
                    self.failure = Some((format!("{}: {}", task, f.message), f.no_restart));
                }
            }
        }
    }

    /// Highest-priority trigger among what has been seen, if any. `live_stale` holds the ids of
    /// consumers currently marked stale; a hung one never returns, so it counts as accounted for.
    fn cause(
        &self,
        num_consumers: usize,
        max_stale: usize,
        live_stale: &BTreeSet<usize>,
    ) -> Option<TerminationCause> {
        if self.crawler_timed_out {
            return Some(TerminationCause::CrawlerTimedOut);
        }
        if self.interrupted.is_some() {
            return Some(TerminationCause::UserInterruption);
        }
        if self.stale_count >= max_stale {
            return Some(TerminationCause::TooManyTimedOutConsumers);
        }
        if let Some((_, no_restart)) = &self.failure {
            return Some(if *no_restart {
                TerminationCause::SupervisorExceptionNoRestart
            } else {
                TerminationCause::SupervisorException
            });
        }
        let accounted = (0..num_consumers)
            .all(|id| self.consumers_done.contains(&id) || live_stale.contains(&id));
        if !accounted {
            return None;
        }
        // A stale consumer means an item was never finished in time, even if it returned later.
        let stale = live_stale.union(&self.returned_stale).count();
        if stale > 0 {
            warn!(
                "{} stale consumers and nothing else running; ending the run",
                stale
            );
            return Some(TerminationCause::TooManyTimedOutConsumers);
        }
        Some(TerminationCause::CompletedNormally)
    }
}

/// Run one supervised batch to its end. Never fails: every outcome, including setup errors,
/// is folded into the returned [`AggregateResult`].
pub fn run_batch(config: &BatchConfig, plugins: BatchPlugins) -> AggregateResult {
    let started = Instant::now();
    if let Err(e) = config.validate() {
        error!("{}", e);
        return AggregateResult {
            items_considered: 0,
            items_added: 0,
            items_processed: 0,
            elapsed_secs: started.elapsed().as_secs_f64(),
            exit_status: ExitStatus::NoRestart,
            termination_cause: TerminationCause::SupervisorExceptionNoRestart,
            stale_items: Vec::new(),
        };
    }

    let (ctx, tasks) = RunContext::build(config, plugins);
    let mut pool = TaskPool::new(
        config.num_consumers + SupervisorConsts::EXTRA_TASKS,
        ctx.interrupt.clone(),
    );
    let mut tally = Tally::default();

    let cause = match start_tasks(&pool, &ctx, tasks) {
        Ok(()) => supervise(&pool, &ctx, config, started, &mut tally),
        Err(e) => {
            error!("could not start run: {:#}", e);
            TerminationCause::SupervisorException
        }
    };
    let crawler_active = ctx.crawler_status.is_active();
    info!("run ending: {}", cause);
    if let Some(reason) = &tally.interrupted {
        info!("interrupt reason: {}", reason);
    }
    if let Some((message, _)) = &tally.failure {
        error!("run failure: {}", message);
    }

    let stale_items = shutdown(&mut pool, &ctx, config, cause, &mut tally);

    let leftover = ctx.queue.drain_resources();
    if leftover > 0 {
        info!("{} queued items were not processed", leftover);
    }
    let exit_status = ExitStatus::decide(cause, crawler_active || leftover > 0);
    let result = AggregateResult {
        items_considered: ctx.crawler_status.considered(),
        items_added: ctx.crawler_status.added(),
        items_processed: ctx.processed(),
        elapsed_secs: started.elapsed().as_secs_f64(),
        exit_status,
        termination_cause: cause,
        stale_items,
    };
    info!(
        "considered {}, added {}, processed {} in {:.1}s; exit status {:?} ({})",
        result.items_considered,
        result.items_added,
        result.items_processed,
        result.elapsed_secs,
        result.exit_status,
        result.exit_status.code()
    );
    result
}

fn start_tasks(pool: &TaskPool, ctx: &RunContext, tasks: RunTasks) -> Result<()> {
    let RunTasks {
        source,
        monitor,
        interrupter,
        reporter,
    } = tasks;

    for consumer in &ctx.consumers {
        let consumer = Arc::clone(consumer);
        pool.submit(format!("consumer-{}", consumer.id()), move || {
            Ok(TaskResult::Consumer(consumer.run()))
        })?;
    }
    let crawler = Arc::clone(&ctx.crawler);
    pool.submit("crawler", move || crawler.run(source).map(TaskResult::Crawler))?;
    pool.submit("monitor", move || Ok(TaskResult::Monitor(monitor.run())))?;
    pool.submit("interrupter", move || {
        Ok(TaskResult::Interrupter(interrupter.run().unwrap_or_else(
            || crate::InterruptResult {
                reason: "run stopped".to_string(),
            },
        )))
    })?;
    pool.submit("reporter", move || Ok(TaskResult::Reporter(reporter.run())))?;
    Ok(())
}

fn supervise(
    pool: &TaskPool,
    ctx: &RunContext,
    config: &BatchConfig,
    started: Instant,
    tally: &mut Tally,
) -> TerminationCause {
    loop {
        // Everything that completed by now counts for this tick.
        if let Some(first) = pool.poll(config.supervisor_pulse) {
            tally.record(first, config.stale_threshold, false);
            while let Some(next) = pool.poll(Duration::ZERO) {
                tally.record(next, config.stale_threshold, false);
            }
        }
        // The timed-out flag is visible before the crawler finishes placing poison.
        tally.crawler_timed_out |= ctx.crawler_status.was_timed_out();

        let live_stale: BTreeSet<usize> = ctx
            .consumers
            .iter()
            .filter(|c| c.state() == ConsumerState::Stale)
            .map(|c| c.id())
            .collect();
        if let Some(cause) =
            tally.cause(config.num_consumers, config.max_stale_consumers, &live_stale)
        {
            return cause;
        }
        if let Some(max) = config.max_alive_time
            && started.elapsed() > max
        {
            return TerminationCause::AliveTooLong;
        }
    }
}

/// Staged shutdown. Returns the ids of every item that went stale, sorted.
fn shutdown(
    pool: &mut TaskPool,
    ctx: &RunContext,
    config: &BatchConfig,
    cause: TerminationCause,
    tally: &mut Tally,
) -> Vec<String> {
    // Retirement replaces `Active`, so hung consumers are collected first.
    let mut stale = collect_stale(ctx, config);
    pool.shutdown();
    for consumer in &ctx.consumers {
        consumer.please_retire();
    }
    ctx.stop.cancel();

    if cause != TerminationCause::CompletedNormally {
        polite_wait(pool, ctx, config, tally);
    }

    pool.shutdown_now();
    while pool.outstanding() > 0 {
        match pool.poll(SupervisorConsts::DRAIN_TIMEOUT) {
            Some(c) => tally.record(c, config.stale_threshold, true),
            None => break,
        }
    }
    if pool.outstanding() > 0 {
        warn!("{} tasks did not finish and are left behind", pool.outstanding());
    }

    for consumer in &ctx.consumers {
        if let Some(marker) = consumer.overdue(config.stale_threshold) {
            stale.entry(marker.resource_id.clone()).or_insert(marker);
        }
    }
    log_stale(&stale);

    if let Err(e) = ctx.processor.shutdown() {
        error!("processor shutdown failed: {:#}", e);
    }
    stale.into_keys().collect()
}

/// Give consumers up to the pause budget to finish their in-flight items before forcing shutdown.
fn polite_wait(pool: &TaskPool, ctx: &RunContext, config: &BatchConfig, tally: &mut Tally) {
    let n = ctx.consumers.len();
    let deadline = Instant::now() + config.pause_on_early_termination;
    while tally.consumers_done.len() < n && Instant::now() < deadline {
        if let Some(c) = pool.poll(SupervisorConsts::POLITE_WAIT_STEP) {
            tally.record(c, config.stale_threshold, true);
        }
    }
    if tally.consumers_done.len() < n {
        warn!(
            "{} consumers still running after {:?}; forcing shutdown",
            n - tally.consumers_done.len(),
            config.pause_on_early_termination
        );
    }
}

/// Markers the monitor reported plus every consumer hung past the threshold right now.
fn collect_stale(ctx: &RunContext, config: &BatchConfig) -> BTreeMap<String, InFlightMarker> {
    let mut stale: BTreeMap<String, InFlightMarker> = ctx
        .stale_rx
        .try_iter()
        .map(|m| (m.resource_id.clone(), m))
        .collect();
    for consumer in &ctx.consumers {
        if let Some(marker) = consumer.check_for_stale(config.stale_threshold) {
            stale.entry(marker.resource_id.clone()).or_insert(marker);
        }
    }
    stale
}

/// Log every stale item. These are the files to investigate or exclude.
fn log_stale(stale: &BTreeMap<String, InFlightMarker>) {
    for marker in stale.values() {
        error!(
            "FATAL: stale item {} (in flight for {:?})",
            marker.resource_id,
            marker.elapsed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConsumerResult, InterruptResult, MonitorResult, WorkerFailure};

    fn done(task: &str, r: TaskResult) -> TaskCompletion {
        TaskCompletion {
            task: task.to_string(),
            outcome: Ok(r),
        }
    }

    fn consumer_done(id: usize, failure: Option<WorkerFailure>) -> TaskCompletion {
        consumer_ended(id, ConsumerState::SwallowedPoison, failure)
    }

    fn consumer_ended(
        id: usize,
        state: ConsumerState,
        failure: Option<WorkerFailure>,
    ) -> TaskCompletion {
        done(
            "consumer",
            TaskResult::Consumer(ConsumerResult {
                consumer_id: id,
                state,
                in_flight: None,
                processed: 1,
                failure,
            }),
        )
    }

    #[test]
    fn interrupt_outranks_completion_in_same_tick() {
        let mut t = Tally::default();
        t.record(consumer_done(0, None), Duration::from_secs(1), false);
        t.record(
            done(
                "interrupter",
                TaskResult::Interrupter(InterruptResult {
                    reason: "user".into(),
                }),
            ),
            Duration::from_secs(1),
            false,
        );
        assert_eq!(t.cause(1, 1, &BTreeSet::new()), Some(TerminationCause::UserInterruption));
    }

    #[test]
    fn monitor_without_enough_stale_is_ignored() {
        let mut t = Tally::default();
        t.record(
            done("monitor", TaskResult::Monitor(MonitorResult::default())),
            Duration::from_secs(1),
            false,
        );
        assert_eq!(t.cause(2, 1, &BTreeSet::new()), None);
    }

    #[test]
    fn worker_failure_maps_to_supervisor_exception() {
        let mut t = Tally::default();
        t.record(
            consumer_done(
                0,
                Some(WorkerFailure {
                    message: "boom".into(),
                    no_restart: true,
                }),
            ),
            Duration::from_secs(1),
            false,
        );
        assert_eq!(
            t.cause(3, 1, &BTreeSet::new()),
            Some(TerminationCause::SupervisorExceptionNoRestart)
        );
    }

    #[test]
    fn interrupter_release_after_stop_is_not_an_interrupt() {
        let mut t = Tally::default();
        t.record(
            done(
                "interrupter",
                TaskResult::Interrupter(InterruptResult {
                    reason: "run stopped".into(),
                }),
            ),
            Duration::from_secs(1),
            true,
        );
        assert!(t.interrupted.is_none());
    }

    #[test]
    fn hung_stale_consumer_ends_run_below_max_stale() {
        let mut t = Tally::default();
        let threshold = Duration::from_secs(1);
        for id in [0, 1, 3] {
            t.record(consumer_done(id, None), threshold, false);
        }
        let hung: BTreeSet<usize> = [2].into_iter().collect();
        assert_eq!(t.cause(4, 2, &BTreeSet::new()), None);
        assert_eq!(
            t.cause(4, 2, &hung),
            Some(TerminationCause::TooManyTimedOutConsumers)
        );
    }

    #[test]
    fn stale_consumer_that_returned_is_not_a_clean_completion() {
        let mut t = Tally::default();
        let threshold = Duration::from_secs(1);
        t.record(consumer_done(0, None), threshold, false);
        t.record(
            consumer_ended(1, ConsumerState::Stale, None),
            threshold,
            false,
        );
        let cause = t.cause(2, 2, &BTreeSet::new());
        assert_eq!(cause, Some(TerminationCause::TooManyTimedOutConsumers));
        assert_eq!(
            ExitStatus::decide(TerminationCause::TooManyTimedOutConsumers, false),
            ExitStatus::Restart
        );
    }
}
