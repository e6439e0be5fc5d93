use crate::{HostsFileSyncJob, SnapshotSyncJob};
use hostdb_application::ports::HostDbMaintenancePort;
use hostdb_domain::HostDbConfig;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub trait SpawnableJob: Send + Sync + 'static {
    fn with_cancellation(self, token: CancellationToken) -> Self;
    fn start_job(self: Arc<Self>) -> tokio::task::JoinHandle<()>;
}

macro_rules! impl_spawnable_job {
    ($t:ty) => {
        impl SpawnableJob for $t {
            fn with_cancellation(self, token: CancellationToken) -> Self {
                self.with_cancellation(token)
            }

            fn start_job(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
                tokio::spawn(async move { self.start().await })
            }
        }
    };
}

impl_spawnable_job!(HostsFileSyncJob);
impl_spawnable_job!(SnapshotSyncJob);

fn spawn_job<J: SpawnableJob>(job: Option<J>, shutdown: &Option<CancellationToken>) {
    if let Some(job) = job {
        let job = match shutdown {
            Some(token) => job.with_cancellation(token.clone()),
            None => job,
        };
        Arc::new(job).start_job();
    }
}

pub struct JobRunner {
    hosts_file_sync: Option<HostsFileSyncJob>,
    snapshot_sync: Option<SnapshotSyncJob>,
    shutdown: Option<CancellationToken>,
}

impl JobRunner {
    pub fn new() -> Self {
        Self {
            hosts_file_sync: None,
            snapshot_sync: None,
            shutdown: None,
        }
    }

    /// Both maintenance jobs with the intervals from `config`. Interval
    /// changes made by a later reconfigure apply once the runner is rebuilt.
    pub fn from_config(maintenance: Arc<dyn HostDbMaintenancePort>, config: &HostDbConfig) -> Self {
        Self::new()
            .with_hosts_file_sync(HostsFileSyncJob::from_config(maintenance.clone(), config))
            .with_snapshot_sync(SnapshotSyncJob::from_config(maintenance, config))
    }

    pub fn with_hosts_file_sync(mut self, job: HostsFileSyncJob) -> Self {
        self.hosts_file_sync = Some(job);
        self
    }

    pub fn with_snapshot_sync(mut self, job: SnapshotSyncJob) -> Self {
        self.snapshot_sync = Some(job);
        self
    }

    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    pub async fn start(self) {
        info!("Starting background job runner");

        spawn_job(self.hosts_file_sync, &self.shutdown);
        spawn_job(self.snapshot_sync, &self.shutdown);

        info!("All background jobs started");
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}
