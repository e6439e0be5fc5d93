pub mod hosts_file_sync;
pub mod runner;
pub mod snapshot_sync;

pub use hosts_file_sync::HostsFileSyncJob;
pub use runner::JobRunner;
pub use snapshot_sync::SnapshotSyncJob;
