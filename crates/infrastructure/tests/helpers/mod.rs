#![allow(dead_code)]
mod mock_resolver;

pub use mock_resolver::MockResolver;

use hostdb_domain::HostDbConfig;
use hostdb_infrastructure::hostdb::{HostDb, ManualClock};
use std::sync::Arc;

pub struct TestHostDb {
    pub db: HostDb,
    pub resolver: Arc<MockResolver>,
    pub clock: Arc<ManualClock>,
}

pub fn small_config() -> HostDbConfig {
    HostDbConfig {
        partitions: 4,
        max_count: 1_000,
        ..HostDbConfig::default()
    }
}

pub fn build(config: HostDbConfig) -> TestHostDb {
    let resolver = Arc::new(MockResolver::new());
    let clock = Arc::new(ManualClock::new(0));
    let db = HostDb::with_clock(config, resolver.clone(), clock.clone());
    TestHostDb { db, resolver, clock }
}

pub fn build_default() -> TestHostDb {
    build(small_config())
}
