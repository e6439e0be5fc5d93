//! Lookup state machine.
//!
//! A lookup walks `Probe -> HostsFileCheck -> Coalesce -> DnsWait -> Reply`.
//! Hits are answered in the caller's context when the partition lock is
//! free; everything else runs in a spawned task. Exactly one upstream
//! request is in flight per key; the task that issued it inserts the result
//! and wakes every coalesced waiter after releasing the partition lock.

use super::freshness::{Freshness, FreshnessPolicy};
use super::key::CacheKey;
use super::pending::{deliver, Delivery, InflightGuard, Registration};
use super::processor::HostDbShared;
use super::record::{HostRecord, SrvEntry};
use super::storage::Partition;
use hostdb_application::ports::{FailureKind, ResolveRequest, ResolvedAnswer, ResolverOutcome};
use hostdb_domain::{
    effective_ttl, DomainError, HostDbConfig, HostDbMark, HostQuery, QueryTarget, MAX_TTL,
};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Terminal answer delivered once per lookup.
#[derive(Debug, Clone)]
pub enum LookupReply {
    Found(Arc<HostRecord>),
    /// Miss, negative record, timeout, or lookups disabled.
    NotFound,
    /// Acknowledges [`LookupHandle::cancel`].
    Cancelled,
}

impl LookupReply {
    pub fn record(&self) -> Option<&Arc<HostRecord>> {
        match self {
            Self::Found(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<Arc<HostRecord>> {
        match self {
            Self::Found(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LookupOptions {
    /// Skip the cache probe and always ask the resolver. Still coalesced
    /// with other in-flight requests for the same key.
    pub force_dns: bool,
}

/// Caller side of a lookup.
pub struct LookupHandle {
    reply: oneshot::Receiver<LookupReply>,
    cancel: CancellationToken,
}

impl LookupHandle {
    fn new() -> (Self, oneshot::Sender<LookupReply>, CancellationToken) {
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let handle = Self {
            reply: rx,
            cancel: cancel.clone(),
        };
        (handle, tx, cancel)
    }

    fn immediate(reply: LookupReply) -> Self {
        let (handle, tx, _) = Self::new();
        let _ = tx.send(reply);
        handle
    }

    /// Stop waiting. The caller gets `Cancelled` instead of a result; an
    /// upstream request already issued still completes and is cached.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The reply if it is already available.
    pub fn try_reply(&mut self) -> Option<LookupReply> {
        self.reply.try_recv().ok()
    }

    pub async fn wait(self) -> LookupReply {
        self.reply.await.unwrap_or(LookupReply::NotFound)
    }
}

enum Probe {
    Hit { record: Arc<HostRecord>, refresh: bool },
    Negative,
    Miss,
}

enum Joined {
    Probed(Probe),
    Waiting(Registration, u64, oneshot::Receiver<Delivery>),
}

enum Attempt {
    Reply(LookupReply),
    /// A negative answer for this family; the caller may try the other one.
    Failed,
}

pub(crate) fn query_label(query: &HostQuery) -> String {
    match &query.target {
        QueryTarget::Name(name) | QueryTarget::Srv(name) => name.to_string(),
        QueryTarget::Addr(ip) => ip.to_string(),
    }
}

/// Entry point: answer immediately where possible, otherwise spawn the
/// coordinator task. Must be called from within a Tokio runtime.
pub(crate) fn start(
    shared: &Arc<HostDbShared>,
    query: HostQuery,
    options: LookupOptions,
) -> LookupHandle {
    let config = shared.config.load_full();
    let now = shared.clock.now_secs();

    if let Some(reply) = immediate_reply(&query, &config, now) {
        return LookupHandle::immediate(reply);
    }

    if !options.force_dns {
        let mark = query.mark();
        let key = CacheKey::for_query(&query, mark);
        let policy = FreshnessPolicy::from_config(&config);
        if let Ok(probed) = shared
            .store
            .try_with_partition(&key, |p| probe(shared, p, key, now, &policy))
        {
            match probed {
                Probe::Hit { record, refresh } => {
                    debug!(query = %query, mark = mark.as_str(), "HostDB hit");
                    if refresh {
                        spawn_resolution(shared, query, key, mark);
                    }
                    return LookupHandle::immediate(LookupReply::Found(record));
                }
                Probe::Miss => {
                    if let Some(record) = hosts_hit(shared, &query, key, mark, now) {
                        return LookupHandle::immediate(LookupReply::Found(record));
                    }
                }
                Probe::Negative => {}
            }
        }
    }

    let (handle, tx, cancel) = LookupHandle::new();
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let reply = drive(&shared, &query, options, &cancel).await;
        let _ = tx.send(reply);
    });
    handle
}

fn immediate_reply(query: &HostQuery, config: &HostDbConfig, now: u64) -> Option<LookupReply> {
    if let QueryTarget::Name(name) = &query.target {
        if let Ok(ip) = name.parse::<IpAddr>() {
            let mark = HostDbMark::for_addr(&ip);
            let key = CacheKey::for_name(name, query.port, mark, query.resolver_context);
            let record = HostRecord::from_addresses(key, name, mark, &[ip], MAX_TTL, now);
            return Some(LookupReply::Found(Arc::new(record)));
        }
    }
    if !config.enable {
        debug!(query = %query, error = %DomainError::Disabled, "Lookup refused");
        return Some(LookupReply::NotFound);
    }
    if matches!(query.target, QueryTarget::Addr(_)) && config.disable_reverse_lookup {
        debug!(query = %query, "Reverse lookups disabled");
        return Some(LookupReply::NotFound);
    }
    if query.name().is_some_and(str::is_empty) {
        debug!(error = %DomainError::InvalidHostName(String::new()), "Lookup refused");
        return Some(LookupReply::NotFound);
    }
    None
}

/// Classify the stored record for `key`. Must run under the partition lock.
/// Claims the background refresh when a served record needs one.
fn probe(
    shared: &HostDbShared,
    partition: &mut Partition,
    key: CacheKey,
    now: u64,
    policy: &FreshnessPolicy,
) -> Probe {
    let Some(record) = partition.get(&key) else {
        return Probe::Miss;
    };
    let refresh = match policy.classify(&record, now) {
        Freshness::Fresh if record.is_failed() => return Probe::Negative,
        Freshness::Fresh => policy.wants_proactive_refresh(&record, now),
        Freshness::Stale => true,
        Freshness::Expired => return Probe::Miss,
    };
    let refresh = refresh && claim_refresh(shared, &record, key);
    Probe::Hit { record, refresh }
}

fn claim_refresh(shared: &HostDbShared, record: &HostRecord, key: CacheKey) -> bool {
    if !record.begin_refresh() {
        return false;
    }
    if shared.pending.try_claim(key) {
        return true;
    }
    record.end_refresh();
    false
}

fn hosts_hit(
    shared: &HostDbShared,
    query: &HostQuery,
    key: CacheKey,
    mark: HostDbMark,
    now: u64,
) -> Option<Arc<HostRecord>> {
    let QueryTarget::Name(name) = &query.target else {
        return None;
    };
    let (ip, ttl) = shared.hosts.lookup(name, mark, now)?;
    debug!(query = %query, ip = %ip, ttl, "Answered from hosts file");
    let record = HostRecord::from_addresses(key, name, HostDbMark::for_addr(&ip), &[ip], ttl, now);
    Some(Arc::new(record))
}

async fn drive(
    shared: &Arc<HostDbShared>,
    query: &HostQuery,
    options: LookupOptions,
    cancel: &CancellationToken,
) -> LookupReply {
    let mut mark = query.mark();
    let mut fell_back = false;
    loop {
        match attempt(shared, query, mark, options, cancel).await {
            Attempt::Reply(reply) => return reply,
            Attempt::Failed => match mark.fallback(query.style) {
                Some(next) if !fell_back => {
                    debug!(
                        query = %query,
                        from = mark.as_str(),
                        to = next.as_str(),
                        "Retrying other address family"
                    );
                    fell_back = true;
                    mark = next;
                }
                _ => return LookupReply::NotFound,
            },
        }
    }
}

async fn attempt(
    shared: &Arc<HostDbShared>,
    query: &HostQuery,
    mark: HostDbMark,
    options: LookupOptions,
    cancel: &CancellationToken,
) -> Attempt {
    if cancel.is_cancelled() {
        return Attempt::Reply(LookupReply::Cancelled);
    }

    let config = shared.config.load_full();
    let policy = FreshnessPolicy::from_config(&config);
    let key = CacheKey::for_query(query, mark);
    let now = shared.clock.now_secs();

    if !options.force_dns {
        let probed = shared
            .store
            .with_partition(&key, |p| probe(shared, p, key, now, &policy))
            .await;
        if let Some(done) = finish_probe(shared, query, key, mark, probed) {
            return done;
        }
    }

    if let Some(record) = hosts_hit(shared, query, key, mark, now) {
        return Attempt::Reply(LookupReply::Found(record));
    }

    let joined = shared
        .store
        .with_partition(&key, |p| {
            if !options.force_dns {
                match probe(shared, p, key, now, &policy) {
                    Probe::Miss => {}
                    probed => return Joined::Probed(probed),
                }
            }
            let (registration, id, rx) = shared.pending.register(key);
            Joined::Waiting(registration, id, rx)
        })
        .await;

    let (registration, id, rx) = match joined {
        Joined::Probed(probed) => {
            return finish_probe(shared, query, key, mark, probed)
                .unwrap_or(Attempt::Reply(LookupReply::NotFound));
        }
        Joined::Waiting(registration, id, rx) => (registration, id, rx),
    };

    if registration == Registration::Leader {
        spawn_resolution(shared, query.clone(), key, mark);
    }
    debug!(
        query = %query,
        mark = mark.as_str(),
        key = %key,
        leader = registration == Registration::Leader,
        "HostDB miss, waiting for resolver"
    );

    tokio::select! {
        _ = cancel.cancelled() => {
            shared.pending.cancel(&key, id);
            Attempt::Reply(LookupReply::Cancelled)
        }
        _ = tokio::time::sleep(config.lookup_timeout()) => {
            shared.pending.cancel(&key, id);
            debug!(
                query = %query,
                error = %DomainError::ResolutionTimeout,
                "Giving up on resolver"
            );
            Attempt::Reply(LookupReply::NotFound)
        }
        delivered = rx => match delivered {
            Ok(Some(record)) if !record.is_failed() => Attempt::Reply(LookupReply::Found(record)),
            Ok(Some(_)) => Attempt::Failed,
            Ok(None) | Err(_) => Attempt::Reply(LookupReply::NotFound),
        },
    }
}

fn finish_probe(
    shared: &Arc<HostDbShared>,
    query: &HostQuery,
    key: CacheKey,
    mark: HostDbMark,
    probed: Probe,
) -> Option<Attempt> {
    match probed {
        Probe::Hit { record, refresh } => {
            debug!(query = %query, mark = mark.as_str(), refresh, "HostDB hit");
            if refresh {
                spawn_resolution(shared, query.clone(), key, mark);
            }
            Some(Attempt::Reply(LookupReply::Found(record)))
        }
        Probe::Negative => {
            debug!(query = %query, mark = mark.as_str(), "HostDB negative hit");
            Some(Attempt::Failed)
        }
        Probe::Miss => None,
    }
}

/// Issue the upstream request for `key`. The key must already be marked in
/// flight in the pending table.
pub(crate) fn spawn_resolution(
    shared: &Arc<HostDbShared>,
    query: HostQuery,
    key: CacheKey,
    mark: HostDbMark,
) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        resolve_and_insert(shared, query, key, mark).await;
    });
}

async fn resolve_and_insert(
    shared: Arc<HostDbShared>,
    query: HostQuery,
    key: CacheKey,
    mark: HostDbMark,
) {
    let guard = InflightGuard::new(Arc::clone(&shared.pending), key);
    let config = shared.config.load_full();

    let request = ResolveRequest {
        target: query.target.clone(),
        mark,
        resolver_context: query.resolver_context,
        // Callers give up after lookup_timeout, but an answer arriving within
        // the insert grace is still cached.
        timeout: config.request_lifetime(),
    };
    let submit = shared.resolver.submit(&request);
    let outcome = match tokio::time::timeout(request.timeout, submit).await {
        Ok(outcome) => outcome,
        Err(_) => ResolverOutcome::Timeout,
    };

    let now = shared.clock.now_secs();
    let (delivery, waiters) = shared
        .store
        .with_partition(&key, |p| {
            let delivery = apply_outcome(p, &query, key, mark, outcome, now, &config);
            (delivery, shared.pending.take(&key))
        })
        .await;
    guard.disarm();

    let woken = deliver(waiters, &delivery);
    debug!(
        query = %query,
        mark = mark.as_str(),
        stored = delivery.as_ref().is_some_and(|r| !r.is_failed()),
        woken,
        "Resolution complete"
    );
}

/// Fold a resolver outcome into the partition. Runs under the lock.
fn apply_outcome(
    partition: &mut Partition,
    query: &HostQuery,
    key: CacheKey,
    mark: HostDbMark,
    outcome: ResolverOutcome,
    now: u64,
    config: &HostDbConfig,
) -> Delivery {
    let policy = FreshnessPolicy::from_config(config);
    let old = partition.peek(&key);
    let servable_old = old
        .as_ref()
        .filter(|r| !r.is_failed() && policy.classify(r, now) != Freshness::Expired)
        .cloned();

    let failure = match outcome {
        ResolverOutcome::Success(answer) => {
            match build_record(query, key, mark, answer, now, config) {
                Some(mut record) => {
                    if let Some(old) = &old {
                        record.restore_info(old);
                    }
                    return Some(store(partition, record, &policy));
                }
                None => FailureKind::Transient,
            }
        }
        ResolverOutcome::Failure(kind) => kind,
        ResolverOutcome::Timeout => {
            return match servable_old {
                Some(old) => {
                    old.end_refresh();
                    Some(old)
                }
                None => None,
            };
        }
    };

    match failure {
        FailureKind::NxDomain => {
            if partition.erase(&key).is_some() {
                debug!(query = %query, "NXDOMAIN replaced cached record");
            }
        }
        FailureKind::Transient => {
            if let Some(old) = servable_old {
                debug!(query = %query, "Resolver failed, keeping stale record");
                old.end_refresh();
                return Some(old);
            }
        }
    }

    let reason = match failure {
        FailureKind::NxDomain => "NXDOMAIN",
        FailureKind::Transient => "transient",
    };
    debug!(
        query = %query,
        error = %DomainError::ResolutionFailure(reason.to_string()),
        fail_timeout = config.ip_fail_timeout,
        "Caching negative record"
    );
    let record = HostRecord::failure(key, &query_label(query), mark, config.ip_fail_timeout, now);
    Some(store(partition, record, &policy))
}

fn store(
    partition: &mut Partition,
    record: HostRecord,
    policy: &FreshnessPolicy,
) -> Arc<HostRecord> {
    let size = record.size_hint();
    let expire_at = policy.retain_until(&record);
    let key = record.key;
    let record = Arc::new(record);
    partition.put(key, Arc::clone(&record), size, expire_at);
    record
}

fn accepts(mark: HostDbMark, ip: &IpAddr) -> bool {
    if ip.is_unspecified() {
        return false;
    }
    match mark {
        HostDbMark::Ipv4 => ip.is_ipv4(),
        HostDbMark::Ipv6 => ip.is_ipv6(),
        HostDbMark::Generic | HostDbMark::Srv => true,
    }
}

fn build_record(
    query: &HostQuery,
    key: CacheKey,
    mark: HostDbMark,
    answer: ResolvedAnswer,
    now: u64,
    config: &HostDbConfig,
) -> Option<HostRecord> {
    let ttl = |upstream: u32| effective_ttl(config.ttl_mode, upstream, config.ip_timeout);
    let max = config.round_robin_max_count;

    match answer {
        ResolvedAnswer::Addresses { addrs, ttl: upstream } => {
            let addrs: Vec<IpAddr> = addrs
                .into_iter()
                .filter(|ip| accepts(mark, ip))
                .take(max)
                .collect();
            if addrs.is_empty() {
                debug!(query = %query, "Answer carried no usable address");
                return None;
            }
            let name = query_label(query);
            Some(HostRecord::from_addresses(key, &name, mark, &addrs, ttl(upstream), now))
        }
        ResolvedAnswer::ReverseName { name, ttl: upstream } => match query.target {
            QueryTarget::Addr(ip) if !name.is_empty() => {
                Some(HostRecord::reverse(key, ip, &name, ttl(upstream), now))
            }
            _ => None,
        },
        ResolvedAnswer::Srv { mut targets, ttl: upstream } => {
            targets.retain(|t| !t.target.is_empty());
            if targets.is_empty() {
                return None;
            }
            targets.sort_by_key(|t| (t.priority, t.weight));
            targets.truncate(max);
            let entries = targets
                .iter()
                .map(|t| SrvEntry::new(&t.target, t.port, t.priority, t.weight))
                .collect();
            Some(HostRecord::from_srv(key, &query_label(query), entries, ttl(upstream), now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hostdb::storage::PartitionedStore;
    use hostdb_application::ports::SrvTarget;
    use hostdb_domain::TtlMode;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_literal_address_answers_immediately() {
        let config = HostDbConfig {
            enable: false,
            ..HostDbConfig::default()
        };
        let reply = immediate_reply(&HostQuery::by_name("192.0.2.7"), &config, 0).unwrap();
        let record = reply.into_record().unwrap();
        assert_eq!(record.addresses(), vec![ip("192.0.2.7")]);
        assert_eq!(record.ttl_seconds, MAX_TTL);
    }

    #[test]
    fn test_disabled_and_reverse_disabled_refuse() {
        let disabled = HostDbConfig {
            enable: false,
            ..HostDbConfig::default()
        };
        assert!(matches!(
            immediate_reply(&HostQuery::by_name("example.com"), &disabled, 0),
            Some(LookupReply::NotFound)
        ));

        let no_reverse = HostDbConfig {
            disable_reverse_lookup: true,
            ..HostDbConfig::default()
        };
        assert!(matches!(
            immediate_reply(&HostQuery::by_addr(ip("10.0.0.1")), &no_reverse, 0),
            Some(LookupReply::NotFound)
        ));
        assert!(immediate_reply(&HostQuery::by_name("example.com"), &no_reverse, 0).is_none());
    }

    #[test]
    fn test_build_drops_unusable_addresses() {
        let config = HostDbConfig {
            round_robin_max_count: 2,
            ..HostDbConfig::default()
        };
        let query = HostQuery::by_name("example.com");
        let key = CacheKey::for_query(&query, HostDbMark::Ipv4);
        let answer = ResolvedAnswer::Addresses {
            addrs: vec![
                ip("0.0.0.0"),
                ip("10.0.0.1"),
                ip("2001:db8::1"),
                ip("10.0.0.2"),
                ip("10.0.0.3"),
            ],
            ttl: 60,
        };
        let record = build_record(&query, key, HostDbMark::Ipv4, answer, 0, &config).unwrap();
        assert_eq!(record.addresses(), vec![ip("10.0.0.1"), ip("10.0.0.2")]);

        let empty = ResolvedAnswer::Addresses {
            addrs: vec![ip("0.0.0.0")],
            ttl: 60,
        };
        assert!(build_record(&query, key, HostDbMark::Ipv4, empty, 0, &config).is_none());
    }

    #[test]
    fn test_build_applies_ttl_mode() {
        let config = HostDbConfig {
            ttl_mode: TtlMode::Min,
            ip_timeout: 30,
            ..HostDbConfig::default()
        };
        let query = HostQuery::by_name("example.com");
        let key = CacheKey::for_query(&query, HostDbMark::Ipv4);
        let answer = ResolvedAnswer::Addresses {
            addrs: vec![ip("10.0.0.1")],
            ttl: 300,
        };
        let record = build_record(&query, key, HostDbMark::Ipv4, answer, 0, &config).unwrap();
        assert_eq!(record.ttl_seconds, 30);
    }

    #[test]
    fn test_build_srv_orders_and_caps_targets() {
        let config = HostDbConfig {
            round_robin_max_count: 2,
            ..HostDbConfig::default()
        };
        let query = HostQuery::srv("_sip._udp.example.com");
        let key = CacheKey::for_query(&query, HostDbMark::Srv);
        let answer = ResolvedAnswer::Srv {
            targets: vec![
                SrvTarget::new("c.example.com", 5060, 30, 1),
                SrvTarget::new("a.example.com", 5060, 10, 1),
                SrvTarget::new("b.example.com", 5060, 20, 1),
            ],
            ttl: 60,
        };
        let record = build_record(&query, key, HostDbMark::Srv, answer, 0, &config).unwrap();
        let targets: Vec<&str> = record.srv_targets().iter().map(|t| t.target.as_str()).collect();
        assert_eq!(targets, vec!["a.example.com", "b.example.com"]);
    }

    #[test]
    fn test_nxdomain_replaces_positive_record() {
        let config = HostDbConfig::default();
        let policy = FreshnessPolicy::from_config(&config);
        let query = HostQuery::by_name("example.com");
        let key = CacheKey::for_query(&query, HostDbMark::Ipv4);
        let store = PartitionedStore::new(1, 100, 1 << 20);
        let mut partition = store.lock(0);

        let positive = HostRecord::from_addresses(
            key,
            "example.com",
            HostDbMark::Ipv4,
            &[ip("10.0.0.1")],
            300,
            0,
        );
        store_in(&mut partition, positive, &policy);

        let delivered = apply_outcome(
            &mut partition,
            &query,
            key,
            HostDbMark::Ipv4,
            ResolverOutcome::Failure(FailureKind::NxDomain),
            10,
            &config,
        )
        .unwrap();
        assert!(delivered.is_failed());
        assert!(partition.peek(&key).unwrap().is_failed());
    }

    #[test]
    fn test_transient_failure_keeps_servable_record() {
        let config = HostDbConfig::default();
        let policy = FreshnessPolicy::from_config(&config);
        let query = HostQuery::by_name("example.com");
        let key = CacheKey::for_query(&query, HostDbMark::Ipv4);
        let store = PartitionedStore::new(1, 100, 1 << 20);
        let mut partition = store.lock(0);

        let positive = HostRecord::from_addresses(
            key,
            "example.com",
            HostDbMark::Ipv4,
            &[ip("10.0.0.1")],
            300,
            0,
        );
        positive.begin_refresh();
        store_in(&mut partition, positive, &policy);

        let delivered = apply_outcome(
            &mut partition,
            &query,
            key,
            HostDbMark::Ipv4,
            ResolverOutcome::Failure(FailureKind::Transient),
            250,
            &config,
        )
        .unwrap();
        assert!(!delivered.is_failed());
        assert!(!delivered.is_refreshing());

        let expired = apply_outcome(
            &mut partition,
            &query,
            key,
            HostDbMark::Ipv4,
            ResolverOutcome::Failure(FailureKind::Transient),
            400,
            &config,
        )
        .unwrap();
        assert!(expired.is_failed());
    }

    #[test]
    fn test_timeout_without_record_stores_nothing() {
        let config = HostDbConfig::default();
        let query = HostQuery::by_name("slow.example");
        let key = CacheKey::for_query(&query, HostDbMark::Ipv4);
        let store = PartitionedStore::new(1, 100, 1 << 20);
        let mut partition = store.lock(0);
        let delivered = apply_outcome(
            &mut partition,
            &query,
            key,
            HostDbMark::Ipv4,
            ResolverOutcome::Timeout,
            0,
            &config,
        );
        assert!(delivered.is_none());
        assert!(partition.is_empty());
    }

    fn store_in(partition: &mut Partition, record: HostRecord, policy: &FreshnessPolicy) {
        store(partition, record, policy);
    }
}
