use async_trait::async_trait;
use compact_str::CompactString;
use hostdb_domain::{HostDbMark, QueryTarget};
use std::net::IpAddr;
use std::time::Duration;

/// One upstream question issued by the cache on a miss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub target: QueryTarget,
    /// Address family (or SRV) being asked for.
    pub mark: HostDbMark,
    pub resolver_context: Option<u64>,
    /// How long the resolver may work on this request. Past it the resolver
    /// should return `ResolverOutcome::Timeout`; the cache stops listening
    /// at the same moment.
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub target: CompactString,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
}

impl SrvTarget {
    pub fn new(target: &str, port: u16, priority: u16, weight: u16) -> Self {
        Self {
            target: CompactString::from(target),
            port,
            priority,
            weight,
        }
    }
}

/// Records returned by a successful resolution, with the upstream TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedAnswer {
    Addresses { addrs: Vec<IpAddr>, ttl: u32 },
    ReverseName { name: CompactString, ttl: u32 },
    Srv { targets: Vec<SrvTarget>, ttl: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Authoritative "no such name"; replaces any positive record.
    NxDomain,
    /// SERVFAIL, refused, network error and the like.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverOutcome {
    Success(ResolvedAnswer),
    Failure(FailureKind),
    Timeout,
}

/// The external resolver. The cache never performs wire I/O itself; it only
/// submits requests through this port.
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn submit(&self, request: &ResolveRequest) -> ResolverOutcome;
}
