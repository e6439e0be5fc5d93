use super::clock::{Clock, SystemClock};
use super::coordinator::{self, LookupHandle, LookupOptions, LookupReply};
use super::freshness::FreshnessPolicy;
use super::hosts_file::{HostsCheck, HostsFileOverride};
use super::key::CacheKey;
use super::pending::PendingTable;
use super::persistence;
use super::record::{AppData, HostRecord, RecordPayload, SrvEntry};
use super::round_robin::RoundRobinPolicy;
use super::storage::{Partition, PartitionedStore};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use hostdb_application::ports::{
    HostDbMaintenancePort, HostResolver, HostsFileCheckOutcome, SyncOutcome,
};
use hostdb_domain::{DomainError, HostDbConfig, HostDbMark, HostQuery, HostResStyle};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) struct HostDbShared {
    pub(crate) config: ArcSwap<HostDbConfig>,
    pub(crate) store: PartitionedStore,
    pub(crate) pending: Arc<PendingTable>,
    pub(crate) hosts: HostsFileOverride,
    pub(crate) resolver: Arc<dyn HostResolver>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// The host resolution cache.
///
/// Cheap to clone; all clones share one store. Lookup methods must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct HostDb {
    shared: Arc<HostDbShared>,
}

impl HostDb {
    pub fn new(config: HostDbConfig, resolver: Arc<dyn HostResolver>) -> Self {
        Self::with_clock(config, resolver, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: HostDbConfig,
        resolver: Arc<dyn HostResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = PartitionedStore::new(config.partitions, config.max_count, config.max_size);
        info!(
            partitions = store.partition_count(),
            max_count = config.max_count,
            max_size = config.max_size,
            ttl_mode = config.ttl_mode.as_str(),
            enable = config.enable,
            "Initializing host database"
        );
        Self {
            shared: Arc::new(HostDbShared {
                config: ArcSwap::from_pointee(config),
                store,
                pending: Arc::new(PendingTable::new()),
                hosts: HostsFileOverride::new(),
                resolver,
                clock,
            }),
        }
    }

    pub fn config(&self) -> Arc<HostDbConfig> {
        self.shared.config.load_full()
    }

    /// Swap in a new configuration. Partition count and capacity limits
    /// are fixed when the store is built and only change on restart; a
    /// changed hosts path is picked up by the next hosts-file check.
    pub fn reconfigure(&self, config: HostDbConfig) -> Result<(), DomainError> {
        config
            .validate()
            .map_err(|e| DomainError::ConfigError(e.to_string()))?;

        let current = self.shared.config.load();
        if current.partitions != config.partitions
            || current.max_count != config.max_count
            || current.max_size != config.max_size
        {
            warn!(
                partitions = config.partitions,
                max_count = config.max_count,
                max_size = config.max_size,
                "Store limits changed; they apply after restart"
            );
        }
        if current.hostfile_path != config.hostfile_path {
            info!(path = ?config.hostfile_path, "Hosts file path changed");
        }
        self.shared.config.store(Arc::new(config));
        Ok(())
    }

    // ---- lookups ----

    pub fn lookup(&self, query: HostQuery, options: LookupOptions) -> LookupHandle {
        coordinator::start(&self.shared, query, options)
    }

    pub fn getbyname(&self, name: &str, style: HostResStyle) -> LookupHandle {
        self.lookup(HostQuery::by_name(name).with_style(style), LookupOptions::default())
    }

    pub fn getbynameport(&self, name: &str, port: u16, style: HostResStyle) -> LookupHandle {
        self.lookup(
            HostQuery::by_name(name).with_port(port).with_style(style),
            LookupOptions::default(),
        )
    }

    pub fn getbyaddr(&self, ip: IpAddr) -> LookupHandle {
        self.lookup(HostQuery::by_addr(ip), LookupOptions::default())
    }

    pub fn getsrvbyname(&self, name: &str) -> LookupHandle {
        self.lookup(HostQuery::srv(name), LookupOptions::default())
    }

    /// Look up and wait for the reply.
    pub async fn resolve(&self, query: HostQuery) -> LookupReply {
        self.lookup(query, LookupOptions::default()).wait().await
    }

    // ---- selection ----

    /// Address to connect to, honoring the round-robin policy and skipping
    /// targets inside their down window.
    pub fn select_address(&self, record: &HostRecord) -> Option<IpAddr> {
        let config = self.shared.config.load();
        let now = self.shared.clock.now_secs();
        match &record.payload {
            RecordPayload::Address { entry, .. } => Some(entry.ip),
            RecordPayload::RoundRobinSet(rr) => rr
                .select(RoundRobinPolicy::from_config(&config), now, config.ip_fail_timeout)
                .map(|entry| entry.ip),
            RecordPayload::SrvSet(_) | RecordPayload::Failure => None,
        }
    }

    pub fn select_srv<'a>(&self, record: &'a HostRecord) -> Option<&'a SrvEntry> {
        let fail_window = self.shared.config.load().ip_fail_timeout;
        let now = self.shared.clock.now_secs();
        match &record.payload {
            RecordPayload::SrvSet(rr) => rr.select_srv(now, fail_window),
            _ => None,
        }
    }

    // ---- per-target mutation ----

    /// Record a connect failure against `ip` in the cached answer for
    /// `query`. The address is skipped by selection for `ip_fail_timeout`.
    pub async fn mark_down(&self, query: &HostQuery, ip: IpAddr) -> bool {
        let now = self.shared.clock.now_secs();
        for key in candidate_keys(query, &ip) {
            let marked = self
                .shared
                .store
                .with_partition(&key, |p| {
                    let record = p.peek(&key)?;
                    let entry = record.find(&ip)?;
                    entry.down.mark(now);
                    Some(())
                })
                .await;
            if marked.is_some() {
                debug!(query = %query, ip = %ip, "Target marked down");
                return true;
            }
        }
        false
    }

    pub async fn mark_srv_down(&self, query: &HostQuery, target: &str) -> bool {
        let now = self.shared.clock.now_secs();
        let key = CacheKey::for_query(query, HostDbMark::Srv);
        self.shared
            .store
            .with_partition(&key, |p| {
                let record = p.peek(&key)?;
                record.find_srv(target)?.down.mark(now);
                Some(())
            })
            .await
            .is_some()
    }

    /// Take `ip` out of rotation for `query`. A record left with no good
    /// entries is erased.
    pub async fn remove_address(&self, query: &HostQuery, ip: IpAddr) -> bool {
        let policy = FreshnessPolicy::from_config(&self.shared.config.load());
        for key in candidate_keys(query, &ip) {
            let remaining = self
                .shared
                .store
                .with_partition(&key, |p| remove_from_partition(p, key, &ip, &policy))
                .await;
            if let Some(remaining) = remaining {
                debug!(query = %query, ip = %ip, remaining, "Address removed from rotation");
                return true;
            }
        }
        false
    }

    /// Attach application data to the entry for `ip` without re-resolving.
    /// `query` is either the forward query that produced the address or a
    /// reverse query for `ip` itself.
    pub async fn set_application_data(&self, query: &HostQuery, ip: IpAddr, app: AppData) -> bool {
        let policy = FreshnessPolicy::from_config(&self.shared.config.load());
        for key in candidate_keys(query, &ip) {
            let updated = self
                .shared
                .store
                .with_partition(&key, |p| {
                    update_record(p, key, &policy, |record| {
                        record.find_mut(&ip).map(|entry| entry.app = Some(app.clone()))
                    })
                })
                .await;
            if updated.is_some() {
                return true;
            }
        }
        false
    }

    pub async fn set_srv_application_data(
        &self,
        query: &HostQuery,
        target: &str,
        app: AppData,
    ) -> bool {
        let policy = FreshnessPolicy::from_config(&self.shared.config.load());
        let key = CacheKey::for_query(query, HostDbMark::Srv);
        self.shared
            .store
            .with_partition(&key, |p| {
                update_record(p, key, &policy, |record| {
                    record.find_srv_mut(target).map(|entry| entry.app = Some(app))
                })
            })
            .await
            .is_some()
    }

    // ---- administration ----

    pub fn clear_cache(&self) {
        let before = self.shared.store.len();
        self.shared.store.clear();
        info!(records = before, "Host database cleared");
    }

    pub fn clear_hosts_override(&self) {
        self.shared.hosts.clear();
    }

    /// Walk every stored record, one partition at a time.
    pub fn iterate_all(&self) -> impl Iterator<Item = (CacheKey, Arc<HostRecord>)> + '_ {
        self.shared.store.iter()
    }

    pub fn len(&self) -> usize {
        self.shared.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.store.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.shared.pending.len()
    }

    /// Write the store to the configured snapshot path. Blocking.
    pub fn persist(&self) -> Result<usize, DomainError> {
        let config = self.shared.config.load();
        let Some(path) = &config.storage_path else {
            return Ok(0);
        };
        persistence::persist(&self.shared.store, path, self.shared.clock.now_secs())
    }

    /// Load the configured snapshot into the store. Blocking; meant for
    /// startup. Skipped entirely when `re_dns_on_reload` is set.
    pub fn restore(&self) -> usize {
        let config = self.shared.config.load();
        let Some(path) = &config.storage_path else {
            return 0;
        };
        if config.re_dns_on_reload {
            info!(path = %path.display(), "Ignoring snapshot, re-resolving on demand");
            return 0;
        }
        persistence::load(
            &self.shared.store,
            path,
            self.shared.clock.now_secs(),
            &FreshnessPolicy::from_config(&config),
            config.migrate_on_demand,
        )
    }

    /// Reparse the hosts file if its path changed or it was modified.
    /// Blocking.
    pub fn check_hosts_file(&self) -> HostsCheck {
        let config = self.shared.config.load();
        self.shared.hosts.check(
            config.hostfile_path.as_deref(),
            self.shared.clock.now_secs(),
            config.hostfile_check_interval,
        )
    }

    pub fn hosts_entries(&self) -> usize {
        self.shared.hosts.snapshot().len()
    }
}

/// Keys a cached answer containing `ip` may live under: the query's own
/// mark, then the mark of `ip`'s family (after a family fallback).
fn candidate_keys(query: &HostQuery, ip: &IpAddr) -> Vec<CacheKey> {
    let mut keys = vec![CacheKey::for_query(query, query.mark())];
    let family = CacheKey::for_query(query, HostDbMark::for_addr(ip));
    if family != keys[0] {
        keys.push(family);
    }
    keys
}

/// Copy-on-write edit of the record for `key` under the partition lock.
fn update_record<R>(
    partition: &mut Partition,
    key: CacheKey,
    policy: &FreshnessPolicy,
    edit: impl FnOnce(&mut HostRecord) -> Option<R>,
) -> Option<R> {
    let current = partition.peek(&key)?;
    let mut updated = HostRecord::clone(&current);
    let result = edit(&mut updated)?;
    let size = updated.size_hint();
    let expire_at = policy.retain_until(&updated);
    partition.put(key, Arc::new(updated), size, expire_at);
    Some(result)
}

fn remove_from_partition(
    partition: &mut Partition,
    key: CacheKey,
    ip: &IpAddr,
    policy: &FreshnessPolicy,
) -> Option<usize> {
    let current = partition.peek(&key)?;
    match &current.payload {
        RecordPayload::Address { entry, .. } if entry.ip == *ip => {
            partition.erase(&key);
            Some(0)
        }
        RecordPayload::RoundRobinSet(rr) => {
            rr.position(ip)?;
            let mut emptied = false;
            let remaining = update_record(partition, key, policy, |record| {
                let RecordPayload::RoundRobinSet(rr) = &mut record.payload else {
                    return None;
                };
                let index = rr.position(ip)?;
                let remaining = rr.remove_at(index);
                emptied = remaining == 0;
                Some(remaining)
            })?;
            if emptied {
                partition.erase(&key);
            }
            Some(remaining)
        }
        _ => None,
    }
}

#[async_trait]
impl HostDbMaintenancePort for HostDb {
    async fn run_hosts_file_check(&self) -> Result<HostsFileCheckOutcome, DomainError> {
        let db = self.clone();
        let check = tokio::task::spawn_blocking(move || db.check_hosts_file())
            .await
            .map_err(|e| DomainError::IoError(e.to_string()))?;
        Ok(HostsFileCheckOutcome {
            reloaded: matches!(check, HostsCheck::Reloaded { .. } | HostsCheck::Cleared),
            entries: self.hosts_entries(),
        })
    }

    async fn run_sync_cycle(&self) -> Result<SyncOutcome, DomainError> {
        let db = self.clone();
        let records_written = tokio::task::spawn_blocking(move || db.persist())
            .await
            .map_err(|e| DomainError::IoError(e.to_string()))??;
        Ok(SyncOutcome { records_written })
    }
}
