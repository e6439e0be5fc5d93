use async_trait::async_trait;
use hostdb_application::ports::{HostDbMaintenancePort, HostsFileCheckOutcome, SyncOutcome};
use hostdb_domain::DomainError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct MockHostDbMaintenancePort {
    hosts_check_count: Arc<AtomicU64>,
    sync_count: Arc<AtomicU64>,
    should_fail_hosts_check: Arc<RwLock<bool>>,
    should_fail_sync: Arc<RwLock<bool>>,
    hosts_outcome: Arc<RwLock<HostsFileCheckOutcome>>,
}

impl MockHostDbMaintenancePort {
    pub fn new() -> Self {
        Self {
            hosts_check_count: Arc::new(AtomicU64::new(0)),
            sync_count: Arc::new(AtomicU64::new(0)),
            should_fail_hosts_check: Arc::new(RwLock::new(false)),
            should_fail_sync: Arc::new(RwLock::new(false)),
            hosts_outcome: Arc::new(RwLock::new(HostsFileCheckOutcome::default())),
        }
    }

    pub fn with_hosts_outcome(mut self, outcome: HostsFileCheckOutcome) -> Self {
        self.hosts_outcome = Arc::new(RwLock::new(outcome));
        self
    }

    pub fn hosts_check_count(&self) -> u64 {
        self.hosts_check_count.load(Ordering::Relaxed)
    }

    pub fn sync_count(&self) -> u64 {
        self.sync_count.load(Ordering::Relaxed)
    }

    pub async fn set_should_fail_hosts_check(&self, fail: bool) {
        *self.should_fail_hosts_check.write().await = fail;
    }

    pub async fn set_should_fail_sync(&self, fail: bool) {
        *self.should_fail_sync.write().await = fail;
    }
}

#[async_trait]
impl HostDbMaintenancePort for MockHostDbMaintenancePort {
    async fn run_hosts_file_check(&self) -> Result<HostsFileCheckOutcome, DomainError> {
        self.hosts_check_count.fetch_add(1, Ordering::Relaxed);
        if *self.should_fail_hosts_check.read().await {
            return Err(DomainError::IoError("hosts file unreadable".to_string()));
        }
        Ok(self.hosts_outcome.read().await.clone())
    }

    async fn run_sync_cycle(&self) -> Result<SyncOutcome, DomainError> {
        self.sync_count.fetch_add(1, Ordering::Relaxed);
        if *self.should_fail_sync.read().await {
            return Err(DomainError::IoError("disk full".to_string()));
        }
        Ok(SyncOutcome { records_written: 3 })
    }
}
