//! Cooperative cancellation. Every blocking wait in the pipeline takes a token and wakes up early
//! when it is cancelled.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Inner {
    cancelled: AtomicBool,
    // Dropping the sender disconnects `rx`, which wakes every waiter at once.
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// Clonable one-shot cancellation flag that can also be waited on.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        if let Ok(mut tx) = self.inner.tx.lock() {
            tx.take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `dur` or until cancelled. Returns true if cancelled.
    pub fn sleep(&self, dur: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.inner.rx.recv_timeout(dur) {
            Err(RecvTimeoutError::Timeout) => self.is_cancelled(),
            _ => true,
        }
    }

    /// Receiver that becomes ready (disconnected) on cancel; for use in `select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn sleep_returns_false_when_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn cancel_wakes_sleeper_early() {
        let token = CancelToken::new();
        let t = token.clone();
        let start = Instant::now();
        let h = thread::spawn(move || t.sleep(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(h.join().unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
        token.cancel();
        assert!(token.is_cancelled());
    }
}
