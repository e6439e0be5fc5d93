pub mod clock;
pub mod coordinator;
pub mod freshness;
pub mod hosts_file;
pub mod key;
pub mod pending;
pub mod persistence;
pub mod processor;
pub mod record;
pub mod round_robin;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{LookupHandle, LookupOptions, LookupReply};
pub use freshness::{Freshness, FreshnessPolicy};
pub use hosts_file::{HostsCheck, HostsEntry, HostsFileOverride, HostsFileSnapshot};
pub use key::CacheKey;
pub use persistence::{read_snapshot, StoreSnapshot, SNAPSHOT_VERSION};
pub use processor::HostDb;
pub use record::{AddressEntry, AppData, HostRecord, RecordPayload, RoundRobin, SrvEntry};
pub use round_robin::RoundRobinPolicy;
pub use storage::PartitionedStore;
