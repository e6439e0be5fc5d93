use async_trait::async_trait;
use hostdb_application::ports::{
    FailureKind, HostResolver, ResolveRequest, ResolvedAnswer, ResolverOutcome, SrvTarget,
};
use hostdb_domain::{HostDbMark, QueryTarget};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Resolver that answers from a script keyed by `(target, mark)`.
/// Unscripted questions get NXDOMAIN. A delay at or past the request's
/// timeout yields `Timeout`, as a real resolver would.
pub struct MockResolver {
    calls: AtomicUsize,
    delay: Mutex<Duration>,
    script: Mutex<HashMap<(String, HostDbMark), ResolverOutcome>>,
    requests: Mutex<Vec<ResolveRequest>>,
}

fn label(target: &QueryTarget) -> String {
    match target {
        QueryTarget::Name(name) | QueryTarget::Srv(name) => name.to_string(),
        QueryTarget::Addr(ip) => ip.to_string(),
    }
}

impl MockResolver {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Mutex::new(Duration::ZERO),
            script: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn answer(&self, target: &str, mark: HostDbMark, outcome: ResolverOutcome) {
        self.script
            .lock()
            .unwrap()
            .insert((target.to_string(), mark), outcome);
    }

    pub fn answer_addrs(&self, name: &str, mark: HostDbMark, addrs: &[&str], ttl: u32) {
        let addrs: Vec<IpAddr> = addrs.iter().map(|a| a.parse().unwrap()).collect();
        self.answer(
            name,
            mark,
            ResolverOutcome::Success(ResolvedAnswer::Addresses { addrs, ttl }),
        );
    }

    pub fn answer_reverse(&self, ip: &str, host: &str, ttl: u32) {
        let mark = HostDbMark::for_addr(&ip.parse().unwrap());
        self.answer(
            ip,
            mark,
            ResolverOutcome::Success(ResolvedAnswer::ReverseName {
                name: host.into(),
                ttl,
            }),
        );
    }

    pub fn answer_srv(&self, name: &str, targets: Vec<SrvTarget>, ttl: u32) {
        self.answer(
            name,
            HostDbMark::Srv,
            ResolverOutcome::Success(ResolvedAnswer::Srv { targets, ttl }),
        );
    }

    pub fn fail(&self, target: &str, mark: HostDbMark, kind: FailureKind) {
        self.answer(target, mark, ResolverOutcome::Failure(kind));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_timeout(&self) -> Option<Duration> {
        self.requests.lock().unwrap().last().map(|r| r.timeout)
    }

    pub fn calls_for(&self, target: &str, mark: HostDbMark) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| label(&r.target) == target && r.mark == mark)
            .count()
    }
}

#[async_trait]
impl HostResolver for MockResolver {
    async fn submit(&self, request: &ResolveRequest) -> ResolverOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if delay >= request.timeout {
            tokio::time::sleep(request.timeout).await;
            return ResolverOutcome::Timeout;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.script
            .lock()
            .unwrap()
            .get(&(label(&request.target), request.mark))
            .cloned()
            .unwrap_or(ResolverOutcome::Failure(FailureKind::NxDomain))
    }
}
