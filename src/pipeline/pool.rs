//! Fixed-size task pool with a completion channel: each submitted task gets a named thread and
//! reports its [`TaskResult`] (or failure) on one shared receiver, in completion order.

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::TaskResult;
use crate::error::BatchError;

use super::signal::CancelToken;

/// A task that returned an error or panicked.
#[derive(Clone, Debug)]
pub struct TaskFailure {
    pub message: String,
    pub no_restart: bool,
}

/// One finished task, as seen by the supervisor.
#[derive(Debug)]
pub struct TaskCompletion {
    pub task: String,
    pub outcome: Result<TaskResult, TaskFailure>,
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct TaskPool {
    capacity: usize,
    accepting: bool,
    submitted: AtomicUsize,
    completed: AtomicUsize,
    interrupt: CancelToken,
    completion_tx: Sender<TaskCompletion>,
    completion_rx: Receiver<TaskCompletion>,
}

impl TaskPool {
    /// `interrupt` is cancelled by [`TaskPool::shutdown_now`]; tasks check it at their poll points.
    pub fn new(capacity: usize, interrupt: CancelToken) -> Self {
        let (completion_tx, completion_rx) = unbounded::<TaskCompletion>();
        Self {
            capacity,
            accepting: true,
            submitted: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            interrupt,
            completion_tx,
            completion_rx,
        }
    }

    /// Run `task` on its own named thread. Fails once the pool is shut down or full.
    pub fn submit<F>(&self, name: impl Into<String>, task: F) -> Result<()>
    where
        F: FnOnce() -> Result<TaskResult> + Send + 'static,
    {
        let name = name.into();
        if !self.accepting {
            bail!("task pool is shut down; rejected {}", name);
        }
        if self.submitted.load(Ordering::SeqCst) >= self.capacity {
            bail!("task pool is full ({} tasks); rejected {}", self.capacity, name);
        }
        let tx = self.completion_tx.clone();
        let task_name = name.clone();
        thread::Builder::new().name(name.clone()).spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => Err(TaskFailure {
                    no_restart: BatchError::is_no_restart(&e),
                    message: format!("{:#}", e),
                }),
                Err(payload) => Err(TaskFailure {
                    message: format!("panicked: {}", panic_message(payload.as_ref())),
                    no_restart: false,
                }),
            };
            // Receiver gone means the supervisor already finished; nothing to report to.
            let _ = tx.send(TaskCompletion {
                task: task_name,
                outcome,
            });
        })?;
        self.submitted.fetch_add(1, Ordering::SeqCst);
        debug!("pool: started {}", name);
        Ok(())
    }

    /// Next completion, waiting at most `timeout`.
    pub fn poll(&self, timeout: Duration) -> Option<TaskCompletion> {
        let c = self.completion_rx.recv_timeout(timeout).ok()?;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Some(c)
    }

    /// Tasks submitted but not yet collected through [`TaskPool::poll`].
    pub fn outstanding(&self) -> usize {
        self.submitted.load(Ordering::SeqCst) - self.completed.load(Ordering::SeqCst)
    }

    /// Stop accepting submissions; running tasks continue.
    pub fn shutdown(&mut self) {
        self.accepting = false;
    }

    /// Stop accepting and signal every task to quit at its next poll point.
    /// Threads stuck inside a callback are left detached; killing them could corrupt open I/O.
    pub fn shutdown_now(&mut self) {
        self.accepting = false;
        self.interrupt.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        !self.accepting
    }
}
