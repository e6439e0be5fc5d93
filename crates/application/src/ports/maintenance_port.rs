use async_trait::async_trait;
use hostdb_domain::DomainError;

/// Outcome of one hosts-file check tick.
#[derive(Debug, Default, Clone)]
pub struct HostsFileCheckOutcome {
    pub reloaded: bool,
    pub entries: usize,
}

/// Outcome of one snapshot sync.
#[derive(Debug, Default, Clone)]
pub struct SyncOutcome {
    pub records_written: usize,
}

/// Port for the periodic background work of the host database.
#[async_trait]
pub trait HostDbMaintenancePort: Send + Sync {
    /// Reparse the hosts file if its path changed or it was modified.
    async fn run_hosts_file_check(&self) -> Result<HostsFileCheckOutcome, DomainError>;

    /// Persist the store to its configured snapshot path.
    async fn run_sync_cycle(&self) -> Result<SyncOutcome, DomainError>;
}
