//! Watchdog driver: launches the child command, watches its exit code and stderr, and relaunches
//! it when it asks for a restart, within a restart budget.

pub mod budget;
pub mod session;

pub use budget::RestartBudget;
pub use session::{ChildSession, parse_sentinel};

use crossbeam_channel::Receiver;
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crate::{DriverConfig, ExitStatus};

/// Why the driver stopped relaunching.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Child exited 0 without asking for a restart.
    Completed,
    /// Child exited with the no-restart code.
    NoRestartRequested,
    UserInterrupted,
    RestartBudgetExhausted,
    SpawnFailed,
}

#[derive(Clone, Debug, Serialize)]
pub struct DriverReport {
    pub launches: u32,
    pub restarts: u32,
    pub stop_reason: StopReason,
    /// `None` when the last child was killed or died on a signal.
    pub last_exit_code: Option<i32>,
}

/// How one child launch ended.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ChildOutcome {
    Finished,
    NoRestart,
    Restart(String),
    Interrupted,
    /// Polling the child failed; treated like a crash.
    Lost(String),
}

/// Map an exit to an outcome. Any exit that is neither clean nor the no-restart code is
/// restart-worthy, including deaths by signal.
fn classify(code: Option<i32>, sentinel: Option<String>, interrupted: bool) -> ChildOutcome {
    if interrupted {
        return ChildOutcome::Interrupted;
    }
    let status = code.and_then(ExitStatus::from_code);
    match (status, sentinel) {
        (_, Some(reason)) => ChildOutcome::Restart(reason),
        (Some(ExitStatus::Normal), None) => ChildOutcome::Finished,
        (Some(ExitStatus::NoRestart), None) => ChildOutcome::NoRestart,
        (Some(ExitStatus::Restart), None) => ChildOutcome::Restart("exit code -1".into()),
        (None, None) => ChildOutcome::Restart(match code {
            Some(c) => format!("abnormal exit code {}", c),
            None => "killed by signal".to_string(),
        }),
    }
}

pub struct Driver {
    argv: Vec<String>,
    config: DriverConfig,
    interrupts: Option<Receiver<String>>,
    interrupted: Arc<AtomicBool>,
}

impl Driver {
    /// `argv` is relaunched as-is. `interrupts` carries user interrupts (stdin line, Ctrl+C).
    pub fn new(argv: Vec<String>, config: DriverConfig, interrupts: Option<Receiver<String>>) -> Self {
        Self {
            argv,
            config,
            interrupts,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    fn poll_interrupts(&self) -> bool {
        if !self.interrupted.load(Ordering::SeqCst)
            && let Some(rx) = &self.interrupts
            && let Ok(reason) = rx.try_recv()
        {
            info!("driver: user interrupt ({}); telling child to stop", reason);
            self.interrupted.store(true, Ordering::SeqCst);
        }
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Launch and relaunch until the child finishes, refuses a restart, the user interrupts, or
    /// the budget runs out.
    pub fn run(&self) -> DriverReport {
        let mut budget = RestartBudget::new(self.config.max_restarts);
        let mut report = DriverReport {
            launches: 0,
            restarts: 0,
            stop_reason: StopReason::Completed,
            last_exit_code: None,
        };

        loop {
            let mut session =
                match ChildSession::spawn(&self.argv, Arc::clone(&self.interrupted), self.config.pulse) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("driver: {:#}", e);
                        report.stop_reason = StopReason::SpawnFailed;
                        break;
                    }
                };
            report.launches += 1;
            info!("driver: launch {} (pid {})", report.launches, session.id());

            let (outcome, code) = self.watch(&mut session);
            session.teardown();
            report.last_exit_code = code;

            let reason = match outcome {
                ChildOutcome::Finished => StopReason::Completed,
                ChildOutcome::NoRestart => StopReason::NoRestartRequested,
                ChildOutcome::Interrupted => StopReason::UserInterrupted,
                ChildOutcome::Restart(why) | ChildOutcome::Lost(why) => {
                    if budget.try_consume() {
                        report.restarts += 1;
                        warn!("driver: restarting child ({}); restart {}", why, report.restarts);
                        continue;
                    }
                    error!(
                        "FATAL: child wants a restart ({}) but the budget of {} restarts is spent",
                        why,
                        budget.used()
                    );
                    StopReason::RestartBudgetExhausted
                }
            };
            report.stop_reason = reason;
            break;
        }
        info!(
            "driver: stopping ({:?}) after {} launches and {} restarts",
            report.stop_reason, report.launches, report.restarts
        );
        report
    }

    fn watch(&self, session: &mut ChildSession) -> (ChildOutcome, Option<i32>) {
        let mut interrupted_at: Option<Instant> = None;
        loop {
            let interrupted = self.poll_interrupts();
            match session.try_exit() {
                Ok(Some(code)) => {
                    let outcome = classify(code, session.restart_requested(), interrupted);
                    return (outcome, code);
                }
                Ok(None) => {}
                Err(e) => {
                    session.kill();
                    return (ChildOutcome::Lost(format!("{:#}", e)), None);
                }
            }
            // Early request: the child may be hung after printing it.
            if !interrupted && let Some(reason) = session.restart_requested() {
                session.kill();
                return (ChildOutcome::Restart(reason), None);
            }
            if interrupted {
                let since = *interrupted_at.get_or_insert_with(Instant::now);
                if since.elapsed() > self.config.wait_after_shutdown {
                    warn!(
                        "driver: child did not stop within {:?} of the interrupt; killing it",
                        self.config.wait_after_shutdown
                    );
                    session.kill();
                    return (ChildOutcome::Interrupted, None);
                }
            }
            thread::sleep(self.config.pulse);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_exit_codes() {
        assert_eq!(classify(Some(0), None, false), ChildOutcome::Finished);
        assert_eq!(classify(Some(1), None, false), ChildOutcome::NoRestart);
        assert!(matches!(classify(Some(255), None, false), ChildOutcome::Restart(_)));
        assert!(matches!(classify(Some(101), None, false), ChildOutcome::Restart(_)));
        assert!(matches!(classify(None, None, false), ChildOutcome::Restart(_)));
    }

    #[test]
    fn sentinel_beats_clean_exit() {
        assert_eq!(
            classify(Some(0), Some("memory".into()), false),
            ChildOutcome::Restart("memory".into())
        );
    }

    #[test]
    fn interrupt_never_restarts() {
        assert_eq!(
            classify(Some(255), Some("x".into()), true),
            ChildOutcome::Interrupted
        );
    }
}
