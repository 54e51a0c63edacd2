//! One launched child: the process handle plus its three helper threads (stdout relay, stderr relay
//! watching for the restart sentinel, stdin heartbeat that forwards an interrupt).
//! All of them are created together and torn down together.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::pipeline::CancelToken;
use crate::utils::config::{DriverDefaults, RESTART_SENTINEL};

/// Reason text of a sentinel line (`<SENTINEL> >> reason`), if `line` is one.
pub fn parse_sentinel(line: &str) -> Option<String> {
    let rest = line.trim_start().strip_prefix(RESTART_SENTINEL)?;
    let reason = rest.trim_start().strip_prefix(">>").unwrap_or(rest).trim();
    Some(reason.to_string())
}

pub struct ChildSession {
    child: Child,
    restart_request: Arc<Mutex<Option<String>>>,
    stop: CancelToken,
    threads: Vec<JoinHandle<()>>,
}

impl ChildSession {
    /// Spawn `argv` with piped stdio and start the helper threads. `interrupted` is polled every
    /// `pulse` by the heartbeat; once set, one interrupt line is written to the child's stdin.
    pub fn spawn(argv: &[String], interrupted: Arc<AtomicBool>, pulse: Duration) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty child command");
        };
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn child {}", program))?;
        debug!("driver: spawned pid {}", child.id());

        let restart_request = Arc::new(Mutex::new(None));
        let stop = CancelToken::new();
        let mut threads = Vec::with_capacity(3);
        if let Some(out) = child.stdout.take() {
            threads.push(spawn_named("child-stdout", move || relay_stdout(out))?);
        }
        if let Some(err) = child.stderr.take() {
            let req = Arc::clone(&restart_request);
            threads.push(spawn_named("child-stderr", move || relay_stderr(err, req))?);
        }
        if let Some(stdin) = child.stdin.take() {
            let stop = stop.clone();
            threads.push(spawn_named("child-heartbeat", move || {
                heartbeat(stdin, interrupted, stop, pulse)
            })?);
        }

        Ok(Self {
            child,
            restart_request,
            stop,
            threads,
        })
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check. `Some(None)` means the child died without an exit code (signal).
    pub fn try_exit(&mut self) -> Result<Option<Option<i32>>> {
        Ok(self
            .child
            .try_wait()
            .context("poll child")?
            .map(|status| status.code()))
    }

    /// Reason from a sentinel line seen on the child's stderr, if any.
    pub fn restart_requested(&self) -> Option<String> {
        self.restart_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("driver: kill {}: {}", self.child.id(), e);
        }
        let _ = self.child.wait();
    }

    /// Stop the heartbeat and collect helper threads. Relays that are still blocked on a pipe held
    /// open by a grandchild are left to end on their own EOF.
    pub fn teardown(mut self) {
        self.stop.cancel();
        if let Ok(None) = self.child.try_wait() {
            self.kill();
        }
        for handle in self.threads.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                debug!(
                    "driver: {} still draining",
                    handle.thread().name().unwrap_or("helper")
                );
            }
        }
    }
}

fn spawn_named<F>(name: &str, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .with_context(|| format!("spawn {} thread", name))
}

fn relay_stdout<R: Read>(out: R) {
    let stdout = std::io::stdout();
    for line in BufReader::new(out).lines().map_while(Result::ok) {
        let _ = writeln!(stdout.lock(), "{}", line);
    }
}

fn relay_stderr<R: Read>(err: R, restart_request: Arc<Mutex<Option<String>>>) {
    for line in BufReader::new(err).lines().map_while(Result::ok) {
        if let Some(reason) = parse_sentinel(&line) {
            warn!("child asked for a restart: {}", reason);
            *restart_request
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(reason);
        }
        eprintln!("{}", line);
    }
}

fn heartbeat(mut stdin: ChildStdin, interrupted: Arc<AtomicBool>, stop: CancelToken, pulse: Duration) {
    while !stop.sleep(pulse) {
        if !interrupted.load(Ordering::SeqCst) {
            continue;
        }
        let sent = writeln!(stdin, "{}", DriverDefaults::INTERRUPT_TOKEN).and_then(|_| stdin.flush());
        match sent {
            Ok(()) => debug!("driver: interrupt forwarded to child"),
            Err(e) => debug!("driver: child stdin closed: {}", e),
        }
        // One token is enough; the child's interrupter fires on the first line.
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_reason_is_extracted() {
        let line = format!("{} >> crawler timed out", RESTART_SENTINEL);
        assert_eq!(parse_sentinel(&line).as_deref(), Some("crawler timed out"));
        assert_eq!(parse_sentinel(RESTART_SENTINEL).as_deref(), Some(""));
        assert!(parse_sentinel("[batchguard:run] processed 3").is_none());
    }
}
