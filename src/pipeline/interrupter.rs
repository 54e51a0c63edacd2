//! Interrupter: turns an out-of-band signal (a line on stdin, Ctrl+C) into a run-ending result.

use crossbeam_channel::{Receiver, Sender, select, unbounded};
use log::{debug, info, warn};
use std::io::BufRead;
use std::thread;

use crate::InterruptResult;

use super::signal::CancelToken;

pub struct Interrupter {
    signals: Receiver<String>,
    stop: CancelToken,
}

impl Interrupter {
    pub fn new(signals: Receiver<String>, stop: CancelToken) -> Self {
        Self { signals, stop }
    }

    /// Blocks until a signal arrives (`Some`) or the run stops / all senders are gone (`None`).
    pub fn run(&self) -> Option<InterruptResult> {
        select! {
            recv(self.signals) -> msg => match msg {
                Ok(reason) => {
                    info!("interrupt requested: {}", reason);
                    Some(InterruptResult { reason })
                }
                Err(_) => {
                    debug!("interrupter: no signal sources left");
                    // Keep the slot until the run ends so a dead source never looks like a signal.
                    let _ = self.stop.receiver().recv();
                    None
                }
            },
            recv(self.stop.receiver()) -> _ => None,
        }
    }
}

/// Channel for interrupt signals; clone the sender into every source.
pub fn interrupt_channel() -> (Sender<String>, Receiver<String>) {
    unbounded()
}

/// Forward any line typed on stdin as an interrupt. The reader thread is detached: a blocking
/// stdin read cannot be cancelled, and it ends on EOF.
pub fn watch_stdin(tx: Sender<String>) {
    let spawned = thread::Builder::new()
        .name("stdin-watch".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => debug!("stdin closed; stdin interrupts disabled"),
                Ok(_) => {
                    let _ = tx.send("line received on stdin".to_string());
                }
            }
        });
    if let Err(e) = spawned {
        warn!("cannot watch stdin for interrupts: {}", e);
    }
}
