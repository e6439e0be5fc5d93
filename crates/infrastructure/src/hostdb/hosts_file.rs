use arc_swap::ArcSwap;
use compact_str::CompactString;
use hostdb_domain::{DomainError, HostDbMark};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// First address of each family listed for a name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostsEntry {
    pub v4: Option<IpAddr>,
    pub v6: Option<IpAddr>,
}

impl HostsEntry {
    fn offer(&mut self, ip: IpAddr) {
        let slot = match ip {
            IpAddr::V4(_) => &mut self.v4,
            IpAddr::V6(_) => &mut self.v6,
        };
        if slot.is_none() {
            *slot = Some(ip);
        }
    }

    pub fn for_mark(&self, mark: HostDbMark) -> Option<IpAddr> {
        match mark {
            HostDbMark::Ipv4 => self.v4,
            HostDbMark::Ipv6 => self.v6,
            HostDbMark::Generic => self.v4.or(self.v6),
            HostDbMark::Srv => None,
        }
    }
}

/// Immutable parse of a hosts file. Replaced wholesale on reload.
#[derive(Debug, Clone, Default)]
pub struct HostsFileSnapshot {
    entries: Arc<HashMap<CompactString, HostsEntry>>,
    next_sync_time: u64,
}

impl HostsFileSnapshot {
    pub fn empty(next_sync_time: u64) -> Self {
        Self {
            entries: Arc::new(HashMap::new()),
            next_sync_time,
        }
    }

    /// Parse hosts-file text, logging and skipping malformed lines.
    pub fn parse(content: &str, next_sync_time: u64) -> Self {
        let (snapshot, errors) = Self::parse_with_errors(content, next_sync_time);
        for err in &errors {
            warn!(error = %err, "Skipping hosts file line");
        }
        snapshot
    }

    /// Parse hosts-file text, returning the skipped lines alongside.
    ///
    /// Format: `<ip> name [name...]`, `#` starts a comment. The first
    /// address of each family wins per name. Names are kept as written.
    pub fn parse_with_errors(content: &str, next_sync_time: u64) -> (Self, Vec<DomainError>) {
        let mut entries: HashMap<CompactString, HostsEntry> = HashMap::new();
        let mut errors = Vec::new();

        for (index, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let Some(addr) = fields.next() else { continue };
            let ip: IpAddr = match addr.parse() {
                Ok(ip) => ip,
                Err(_) => {
                    errors.push(DomainError::MalformedHostsLine {
                        line: index + 1,
                        reason: format!("invalid address '{}'", addr),
                    });
                    continue;
                }
            };

            let mut names = fields.peekable();
            if names.peek().is_none() {
                errors.push(DomainError::MalformedHostsLine {
                    line: index + 1,
                    reason: "no host names".to_string(),
                });
                continue;
            }
            for name in names {
                entries.entry(CompactString::from(name)).or_default().offer(ip);
            }
        }

        (
            Self {
                entries: Arc::new(entries),
                next_sync_time,
            },
            errors,
        )
    }

    pub fn lookup(&self, name: &str, mark: HostDbMark) -> Option<IpAddr> {
        self.entries.get(name).and_then(|entry| entry.for_mark(mark))
    }

    pub fn get(&self, name: &str) -> Option<&HostsEntry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostsEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn next_sync_time(&self) -> u64 {
        self.next_sync_time
    }

    /// TTL for records synthesized from this snapshot: the time left until
    /// the next scheduled reparse.
    pub fn remaining_ttl(&self, now_secs: u64) -> u32 {
        self.next_sync_time.saturating_sub(now_secs).min(u32::MAX as u64) as u32
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn rescheduled(&self, next_sync_time: u64) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            next_sync_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostsCheck {
    /// Another check is running.
    Busy,
    Unchanged,
    Reloaded { entries: usize },
    /// No hosts file is configured any more.
    Cleared,
}

#[derive(Default)]
struct WatchState {
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, AtomicOrdering::Release);
    }
}

/// Static name overrides consulted before DNS.
///
/// Readers load the current snapshot lock-free; a reload builds a complete
/// new snapshot and publishes it in one swap.
pub struct HostsFileOverride {
    current: ArcSwap<HostsFileSnapshot>,
    busy: AtomicBool,
    watch: Mutex<WatchState>,
}

impl Default for HostsFileOverride {
    fn default() -> Self {
        Self::new()
    }
}

impl HostsFileOverride {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(HostsFileSnapshot::default()),
            busy: AtomicBool::new(false),
            watch: Mutex::new(WatchState::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<HostsFileSnapshot> {
        self.current.load_full()
    }

    /// Address for `name` in the current snapshot, with its remaining TTL.
    pub fn lookup(&self, name: &str, mark: HostDbMark, now_secs: u64) -> Option<(IpAddr, u32)> {
        let snapshot = self.current.load();
        snapshot
            .lookup(name, mark)
            .map(|ip| (ip, snapshot.remaining_ttl(now_secs)))
    }

    /// Reparse `path` if it differs from the last one seen or has a newer
    /// modification time. Blocking; call from a blocking context.
    pub fn check(&self, path: Option<&Path>, now_secs: u64, interval_secs: u64) -> HostsCheck {
        if self
            .busy
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_err()
        {
            debug!("Hosts file check already in progress");
            return HostsCheck::Busy;
        }
        let _busy = BusyGuard(&self.busy);

        let next_sync_time = now_secs.saturating_add(interval_secs);
        let mut watch = match self.watch.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Some(path) = path else {
            if watch.path.take().is_some() {
                watch.modified = None;
                self.current.store(Arc::new(HostsFileSnapshot::empty(next_sync_time)));
                info!("Hosts file override removed");
                return HostsCheck::Cleared;
            }
            return HostsCheck::Unchanged;
        };

        let path_changed = watch.path.as_deref() != Some(path);
        let modified = std::fs::metadata(path).and_then(|m| m.modified());
        let modified = match modified {
            Ok(modified) => Some(modified),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot stat hosts file");
                None
            }
        };

        let newer = match (modified, watch.modified) {
            (Some(now), Some(seen)) => now > seen,
            (Some(_), None) => true,
            (None, _) => false,
        };

        if !path_changed && !newer {
            // Compare-and-swap so a concurrent clear() is not overwritten.
            self.current.rcu(|current| current.rescheduled(next_sync_time));
            return HostsCheck::Unchanged;
        }

        let snapshot = match std::fs::read_to_string(path) {
            Ok(content) => HostsFileSnapshot::parse(&content, next_sync_time),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read hosts file");
                HostsFileSnapshot::empty(next_sync_time)
            }
        };
        let entries = snapshot.len();
        self.current.store(Arc::new(snapshot));
        watch.path = Some(path.to_path_buf());
        watch.modified = modified;

        info!(path = %path.display(), entries, "Hosts file loaded");
        HostsCheck::Reloaded { entries }
    }

    /// Drop every override. The file is not reparsed again until it changes.
    pub fn clear(&self) {
        self.current
            .rcu(|current| HostsFileSnapshot::empty(current.next_sync_time));
        debug!("Hosts file override cleared");
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(AtomicOrdering::Acquire)
    }
}
