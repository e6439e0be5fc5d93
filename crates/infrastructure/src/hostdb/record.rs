use super::key::CacheKey;
use compact_str::CompactString;
use hostdb_domain::HostDbMark;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Opaque per-target data owned by the application (e.g. connection
/// statistics). Survives re-resolution of the record.
pub type AppData = Arc<[u8]>;

/// Seconds since epoch of the last connect failure; 0 means never.
#[derive(Debug, Default)]
pub struct DownState(AtomicU64);

impl DownState {
    fn from_secs(secs: u64) -> Self {
        Self(AtomicU64::new(secs))
    }

    #[inline]
    pub fn last_failure(&self) -> u64 {
        self.0.load(AtomicOrdering::Relaxed)
    }

    pub fn mark(&self, now_secs: u64) {
        self.0.store(now_secs.max(1), AtomicOrdering::Relaxed);
    }

    pub fn clear(&self) {
        self.0.store(0, AtomicOrdering::Relaxed);
    }

    /// A target is down until `fail_window` seconds have passed since its
    /// last failure.
    #[inline]
    pub fn is_down(&self, now_secs: u64, fail_window: u32) -> bool {
        let last = self.last_failure();
        last != 0 && now_secs < last.saturating_add(fail_window as u64)
    }
}

impl Clone for DownState {
    fn clone(&self) -> Self {
        Self::from_secs(self.last_failure())
    }
}

#[derive(Debug, Clone)]
pub struct AddressEntry {
    pub ip: IpAddr,
    pub app: Option<AppData>,
    pub down: DownState,
}

impl AddressEntry {
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            app: None,
            down: DownState::default(),
        }
    }

    pub(crate) fn restore(ip: IpAddr, app: Option<AppData>, last_failure: u64) -> Self {
        Self {
            ip,
            app,
            down: DownState::from_secs(last_failure),
        }
    }

    fn migrate_from(&mut self, old: &AddressEntry) {
        self.app = old.app.clone();
        self.down = old.down.clone();
    }
}

#[derive(Debug, Clone)]
pub struct SrvEntry {
    pub target: CompactString,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub app: Option<AppData>,
    pub down: DownState,
}

impl SrvEntry {
    pub fn new(target: &str, port: u16, priority: u16, weight: u16) -> Self {
        Self {
            target: CompactString::from(target),
            port,
            priority,
            weight,
            app: None,
            down: DownState::default(),
        }
    }

    pub(crate) fn with_down(mut self, last_failure: u64) -> Self {
        self.down = DownState::from_secs(last_failure);
        self
    }

    /// Entries are matched across re-resolutions by target and port.
    #[inline]
    pub fn same_target(&self, other: &SrvEntry) -> bool {
        self.port == other.port && self.target == other.target
    }

    fn migrate_from(&mut self, old: &SrvEntry) {
        self.app = old.app.clone();
        self.down = old.down.clone();
    }
}

/// Multiple equally valid targets. Only the first `good` entries are
/// eligible for selection; removed entries are swapped past that prefix.
#[derive(Debug)]
pub struct RoundRobin<E> {
    pub entries: Vec<E>,
    pub good: usize,
    pub(crate) cursor: AtomicUsize,
}

impl<E: Clone> Clone for RoundRobin<E> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            good: self.good,
            cursor: AtomicUsize::new(self.cursor.load(AtomicOrdering::Relaxed)),
        }
    }
}

impl<E> RoundRobin<E> {
    pub fn new(entries: Vec<E>) -> Self {
        let good = entries.len();
        Self {
            entries,
            good,
            cursor: AtomicUsize::new(0),
        }
    }

    pub(crate) fn restore(entries: Vec<E>, good: usize, cursor: usize) -> Self {
        let good = good.min(entries.len());
        Self {
            entries,
            good,
            cursor: AtomicUsize::new(cursor),
        }
    }

    #[inline]
    pub fn good_entries(&self) -> &[E] {
        &self.entries[..self.good]
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor.load(AtomicOrdering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub enum RecordPayload {
    /// One address; `reverse_name` is set for reverse (PTR) answers.
    Address {
        entry: AddressEntry,
        reverse_name: Option<CompactString>,
    },
    RoundRobinSet(RoundRobin<AddressEntry>),
    SrvSet(RoundRobin<SrvEntry>),
    /// Negative cache entry.
    Failure,
}

#[derive(Debug)]
pub struct HostRecord {
    pub key: CacheKey,
    /// Query name, or the address text for reverse lookups.
    pub name: CompactString,
    pub mark: HostDbMark,
    /// Unix seconds at which the answer was received.
    pub created_at: u64,
    pub ttl_seconds: u32,
    pub payload: RecordPayload,
    refreshing: AtomicBool,
}

impl Clone for HostRecord {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            name: self.name.clone(),
            mark: self.mark,
            created_at: self.created_at,
            ttl_seconds: self.ttl_seconds,
            payload: self.payload.clone(),
            refreshing: AtomicBool::new(self.refreshing.load(AtomicOrdering::Relaxed)),
        }
    }
}

impl HostRecord {
    pub fn new(
        key: CacheKey,
        name: &str,
        mark: HostDbMark,
        payload: RecordPayload,
        ttl_seconds: u32,
        created_at: u64,
    ) -> Self {
        Self {
            key,
            name: CompactString::from(name),
            mark,
            created_at,
            ttl_seconds: ttl_seconds.max(1),
            payload,
            refreshing: AtomicBool::new(false),
        }
    }

    /// Forward answer: one address becomes `Address`, several become a
    /// round-robin set.
    pub fn from_addresses(
        key: CacheKey,
        name: &str,
        mark: HostDbMark,
        addrs: &[IpAddr],
        ttl_seconds: u32,
        created_at: u64,
    ) -> Self {
        let payload = match addrs {
            [single] => RecordPayload::Address {
                entry: AddressEntry::new(*single),
                reverse_name: None,
            },
            many => RecordPayload::RoundRobinSet(RoundRobin::new(
                many.iter().copied().map(AddressEntry::new).collect(),
            )),
        };
        Self::new(key, name, mark, payload, ttl_seconds, created_at)
    }

    pub fn reverse(
        key: CacheKey,
        ip: IpAddr,
        host: &str,
        ttl_seconds: u32,
        created_at: u64,
    ) -> Self {
        let payload = RecordPayload::Address {
            entry: AddressEntry::new(ip),
            reverse_name: Some(CompactString::from(host)),
        };
        Self::new(
            key,
            &ip.to_string(),
            HostDbMark::for_addr(&ip),
            payload,
            ttl_seconds,
            created_at,
        )
    }

    /// SRV answer; targets are ordered by ascending `(priority, weight)`.
    pub fn from_srv(
        key: CacheKey,
        name: &str,
        mut targets: Vec<SrvEntry>,
        ttl_seconds: u32,
        created_at: u64,
    ) -> Self {
        targets.sort_by_key(|t| (t.priority, t.weight));
        let payload = RecordPayload::SrvSet(RoundRobin::new(targets));
        Self::new(key, name, HostDbMark::Srv, payload, ttl_seconds, created_at)
    }

    pub fn failure(
        key: CacheKey,
        name: &str,
        mark: HostDbMark,
        ttl_seconds: u32,
        created_at: u64,
    ) -> Self {
        Self::new(key, name, mark, RecordPayload::Failure, ttl_seconds, created_at)
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self.payload, RecordPayload::Failure)
    }

    #[inline]
    pub fn is_round_robin(&self) -> bool {
        matches!(self.payload, RecordPayload::RoundRobinSet(_))
    }

    #[inline]
    pub fn is_reverse_dns(&self) -> bool {
        matches!(
            self.payload,
            RecordPayload::Address {
                reverse_name: Some(_),
                ..
            }
        )
    }

    #[inline]
    pub fn is_srv(&self) -> bool {
        matches!(self.payload, RecordPayload::SrvSet(_))
    }

    #[inline]
    pub fn expires_at(&self) -> u64 {
        self.created_at.saturating_add(self.ttl_seconds as u64)
    }

    #[inline]
    pub fn age(&self, now_secs: u64) -> u64 {
        now_secs.saturating_sub(self.created_at)
    }

    /// Seconds of validity left, 0 once expired.
    #[inline]
    pub fn remaining_ttl(&self, now_secs: u64) -> u32 {
        self.expires_at().saturating_sub(now_secs).min(u32::MAX as u64) as u32
    }

    pub fn reverse_name(&self) -> Option<&str> {
        match &self.payload {
            RecordPayload::Address { reverse_name, .. } => reverse_name.as_deref(),
            _ => None,
        }
    }

    /// Addresses eligible for selection, in table order.
    pub fn addresses(&self) -> Vec<IpAddr> {
        match &self.payload {
            RecordPayload::Address { entry, .. } => vec![entry.ip],
            RecordPayload::RoundRobinSet(rr) => rr.good_entries().iter().map(|e| e.ip).collect(),
            RecordPayload::SrvSet(_) | RecordPayload::Failure => Vec::new(),
        }
    }

    pub fn srv_targets(&self) -> &[SrvEntry] {
        match &self.payload {
            RecordPayload::SrvSet(rr) => rr.good_entries(),
            _ => &[],
        }
    }

    /// Address entry for `ip`, searching the whole table (including entries
    /// already removed from rotation).
    pub fn find(&self, ip: &IpAddr) -> Option<&AddressEntry> {
        match &self.payload {
            RecordPayload::Address { entry, .. } => (entry.ip == *ip).then_some(entry),
            RecordPayload::RoundRobinSet(rr) => rr.entries.iter().find(|e| e.ip == *ip),
            _ => None,
        }
    }

    pub fn find_mut(&mut self, ip: &IpAddr) -> Option<&mut AddressEntry> {
        match &mut self.payload {
            RecordPayload::Address { entry, .. } => (entry.ip == *ip).then_some(entry),
            RecordPayload::RoundRobinSet(rr) => rr.entries.iter_mut().find(|e| e.ip == *ip),
            _ => None,
        }
    }

    pub fn find_srv(&self, target: &str) -> Option<&SrvEntry> {
        match &self.payload {
            RecordPayload::SrvSet(rr) => rr.entries.iter().find(|e| e.target == target),
            _ => None,
        }
    }

    pub fn find_srv_mut(&mut self, target: &str) -> Option<&mut SrvEntry> {
        match &mut self.payload {
            RecordPayload::SrvSet(rr) => rr.entries.iter_mut().find(|e| e.target == target),
            _ => None,
        }
    }

    /// Carry application data and down state over from the previous version
    /// of this record, matching entries by address or SRV target.
    ///
    /// Returns the number of entries that found a counterpart.
    pub fn restore_info(&mut self, old: &HostRecord) -> usize {
        let mut restored = 0;
        match &mut self.payload {
            RecordPayload::Address { entry, .. } => {
                if let Some(prev) = old.find(&entry.ip) {
                    entry.migrate_from(prev);
                    restored += 1;
                }
            }
            RecordPayload::RoundRobinSet(rr) => {
                for entry in rr.entries.iter_mut() {
                    if let Some(prev) = old.find(&entry.ip) {
                        entry.migrate_from(prev);
                        restored += 1;
                    }
                }
            }
            RecordPayload::SrvSet(rr) => {
                if let RecordPayload::SrvSet(old_rr) = &old.payload {
                    for entry in rr.entries.iter_mut() {
                        if let Some(prev) = old_rr.entries.iter().find(|o| o.same_target(entry)) {
                            entry.migrate_from(prev);
                            restored += 1;
                        }
                    }
                }
            }
            RecordPayload::Failure => {}
        }
        restored
    }

    /// Claim the background refresh for this record. Returns `false` if one
    /// was already claimed.
    #[inline]
    pub fn begin_refresh(&self) -> bool {
        !self.refreshing.swap(true, AtomicOrdering::AcqRel)
    }

    #[inline]
    pub fn end_refresh(&self) {
        self.refreshing.store(false, AtomicOrdering::Release);
    }

    #[inline]
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(AtomicOrdering::Acquire)
    }

    /// Approximate heap footprint, used for the store's byte budget.
    pub fn size_hint(&self) -> usize {
        let app_len = |app: &Option<AppData>| app.as_ref().map_or(0, |a| a.len());
        let payload = match &self.payload {
            RecordPayload::Address {
                entry,
                reverse_name,
            } => app_len(&entry.app) + reverse_name.as_ref().map_or(0, |n| n.len()),
            RecordPayload::RoundRobinSet(rr) => rr
                .entries
                .iter()
                .map(|e| std::mem::size_of::<AddressEntry>() + app_len(&e.app))
                .sum(),
            RecordPayload::SrvSet(rr) => rr
                .entries
                .iter()
                .map(|e| std::mem::size_of::<SrvEntry>() + e.target.len() + app_len(&e.app))
                .sum(),
            RecordPayload::Failure => 0,
        };
        std::mem::size_of::<HostRecord>() + self.name.len() + payload
    }
}
