use hostdb_application::ports::HostDbMaintenancePort;
use hostdb_domain::HostDbConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 86_400;

/// Polls the hosts file and republishes the override map when it changes.
///
/// The first tick fires immediately so the override is populated before the
/// first lookup. An interval of zero disables the job.
pub struct HostsFileSyncJob {
    maintenance: Arc<dyn HostDbMaintenancePort>,
    interval_secs: u64,
    shutdown: CancellationToken,
}

impl HostsFileSyncJob {
    pub fn new(maintenance: Arc<dyn HostDbMaintenancePort>) -> Self {
        Self {
            maintenance,
            interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            shutdown: CancellationToken::new(),
        }
    }

    /// Poll every `hostfile_check_interval` seconds.
    pub fn from_config(maintenance: Arc<dyn HostDbMaintenancePort>, config: &HostDbConfig) -> Self {
        Self::new(maintenance).with_interval(config.hostfile_check_interval)
    }

    pub fn with_interval(mut self, interval_secs: u64) -> Self {
        self.interval_secs = interval_secs;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub async fn start(self: Arc<Self>) {
        if self.interval_secs == 0 {
            info!("Hosts file polling disabled");
            return;
        }
        info!(interval_secs = self.interval_secs, "Starting hosts file sync job");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("HostsFileSyncJob: shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        match self.maintenance.run_hosts_file_check().await {
                            Ok(outcome) if outcome.reloaded => {
                                info!(entries = outcome.entries, "Hosts file override refreshed");
                            }
                            Ok(outcome) => {
                                debug!(entries = outcome.entries, "Hosts file unchanged");
                            }
                            Err(e) => {
                                error!(error = %e, "Hosts file check failed");
                            }
                        }
                    }
                }
            }
        });
    }
}
