//! Timeout monitor: periodically asks every consumer whether its in-flight item went stale.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::{InFlightMarker, MonitorResult};

use super::consumer::Consumer;
use super::signal::CancelToken;

#[derive(Clone, Debug)]
pub struct MonitorSettings {
    pub pulse: Duration,
    pub stale_threshold: Duration,
    /// Return (and end the run) once this many consumers went stale.
    pub max_stale_consumers: usize,
}

pub struct TimeoutMonitor {
    consumers: Vec<Arc<Consumer>>,
    settings: MonitorSettings,
    stop: CancelToken,
    stale_tx: Sender<InFlightMarker>,
}

impl TimeoutMonitor {
    /// Returns the monitor and the receiving end of its stale buffer. The buffer holds one slot
    /// per consumer; each consumer can go stale only once, so sends never block.
    pub fn new(
        consumers: Vec<Arc<Consumer>>,
        settings: MonitorSettings,
        stop: CancelToken,
    ) -> (Self, Receiver<InFlightMarker>) {
        let (stale_tx, stale_rx) = bounded::<InFlightMarker>(consumers.len().max(1));
        (
            Self {
                consumers,
                settings,
                stop,
                stale_tx,
            },
            stale_rx,
        )
    }

    pub fn run(&self) -> MonitorResult {
        let mut result = MonitorResult::default();
        loop {
            if self.stop.sleep(self.settings.pulse) {
                debug!("monitor: stopped");
                break;
            }
            for consumer in &self.consumers {
                if let Some(marker) = consumer.check_for_stale(self.settings.stale_threshold) {
                    warn!(
                        "consumer {} stale: {} in flight for {:?}",
                        consumer.id(),
                        marker.resource_id,
                        marker.elapsed()
                    );
                    let _ = self.stale_tx.try_send(marker.clone());
                    result.stale_count += 1;
                    result.stale.push(marker);
                }
            }
            if result.stale_count >= self.settings.max_stale_consumers {
                break;
            }
            if self.consumers.iter().all(|c| c.state().is_terminal()) {
                debug!("monitor: every consumer has finished");
                break;
            }
        }
        result
    }
}
