//! Error kinds the supervisor tells apart by type.

use thiserror::Error;

/// Errors with run-level meaning. Everything else travels as plain [`anyhow::Error`].
#[derive(Error, Debug)]
pub enum BatchError {
    /// Configuration or logic error; restarting the batch would fail the same way.
    #[error("no restart: {0}")]
    NoRestart(String),

    /// The crawler could not place an item on the queue within its max consecutive wait.
    #[error("crawler timed out after waiting {waited_ms}ms to add an item to the queue")]
    CrawlerTimeout { waited_ms: u128 },

    /// The crawler could not place one poison item per consumer.
    #[error("placed only {placed} of {expected} poison items before the wait budget ran out")]
    PoisonTimeout { placed: usize, expected: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    /// True if `err` (or anything in its chain) is a [`BatchError`] that must not trigger a restart.
    pub fn is_no_restart(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<BatchError>(),
                Some(BatchError::NoRestart(_) | BatchError::Config(_))
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn no_restart_found_through_context() {
        let err = Err::<(), _>(BatchError::NoRestart("missing extractor".into()))
            .context("processing a.pdf")
            .unwrap_err();
        assert!(BatchError::is_no_restart(&err));
    }

    #[test]
    fn timeouts_are_restartable() {
        let err = anyhow::Error::new(BatchError::CrawlerTimeout { waited_ms: 10 });
        assert!(!BatchError::is_no_restart(&err));
        assert!(!BatchError::is_no_restart(&anyhow::anyhow!("plain failure")));
    }
}
