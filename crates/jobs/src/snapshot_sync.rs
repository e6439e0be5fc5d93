use hostdb_application::ports::HostDbMaintenancePort;
use hostdb_domain::HostDbConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 120;

/// Periodically writes the host database to its snapshot file, and once
/// more on shutdown so a restart picks up the latest state.
pub struct SnapshotSyncJob {
    maintenance: Arc<dyn HostDbMaintenancePort>,
    interval_secs: u64,
    flush_on_shutdown: bool,
    shutdown: CancellationToken,
}

impl SnapshotSyncJob {
    pub fn new(maintenance: Arc<dyn HostDbMaintenancePort>) -> Self {
        Self {
            maintenance,
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            flush_on_shutdown: true,
            shutdown: CancellationToken::new(),
        }
    }

    /// Sync every `sync_frequency` seconds. Disabled when no storage path
    /// is configured.
    pub fn from_config(maintenance: Arc<dyn HostDbMaintenancePort>, config: &HostDbConfig) -> Self {
        let interval_secs = match config.storage_path {
            Some(_) => config.sync_frequency,
            None => 0,
        };
        Self::new(maintenance).with_interval(interval_secs)
    }

    pub fn with_interval(mut self, interval_secs: u64) -> Self {
        self.interval_secs = interval_secs;
        self
    }

    pub fn with_flush_on_shutdown(mut self, flush: bool) -> Self {
        self.flush_on_shutdown = flush;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn start(self: Arc<Self>) {
        if self.interval_secs == 0 {
            info!("Snapshot sync disabled");
            return;
        }
        info!(interval_secs = self.interval_secs, "Starting snapshot sync job");

        tokio::spawn(async move {
            let period = Duration::from_secs(self.interval_secs);
            // Nothing worth saving right after startup.
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        if self.flush_on_shutdown {
                            self.sync_once("shutdown").await;
                        }
                        info!("SnapshotSyncJob: shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.sync_once("interval").await;
                    }
                }
            }
        });
    }

    async fn sync_once(&self, trigger: &'static str) {
        match self.maintenance.run_sync_cycle().await {
            Ok(outcome) => {
                info!(
                    trigger,
                    records = outcome.records_written,
                    "Host database snapshot written"
                );
            }
            Err(e) if trigger == "shutdown" => {
                warn!(error = %e, "Final snapshot write failed");
            }
            Err(e) => {
                error!(error = %e, "Snapshot sync failed");
            }
        }
    }
}
