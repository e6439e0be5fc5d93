mod host_resolver;
mod maintenance_port;

pub use host_resolver::{
    FailureKind, HostResolver, ResolveRequest, ResolvedAnswer, ResolverOutcome, SrvTarget,
};
pub use maintenance_port::{HostDbMaintenancePort, HostsFileCheckOutcome, SyncOutcome};

// Re-export for convenience
pub use hostdb_domain::{HostDbMark, HostQuery};
