//! Background ledger flush.
//!
//! A failed write during a request leaves the ledger dirty. This worker
//! retries on a fixed interval so the file catches up even if no further
//! requests arrive.

use std::sync::Arc;
use std::time::Duration;

use simalloc_ledger::AllocationService;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

pub struct FlushWorker {
    service: Arc<AllocationService>,
    interval: Duration,
}

impl FlushWorker {
    pub fn new(service: Arc<AllocationService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting ledger flush worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.flush_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Ledger flush worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One flush attempt. Returns true if the ledger is clean afterwards.
    pub async fn flush_once(&self) -> bool {
        match self.service.flush_if_dirty().await {
            Ok(true) => {
                info!("Flushed pending ledger changes");
                true
            }
            Ok(false) => {
                debug!("Ledger already persisted");
                true
            }
            Err(e) => {
                warn!(error = %e, "Ledger flush failed, will retry");
                false
            }
        }
    }
}
