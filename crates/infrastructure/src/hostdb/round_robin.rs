use super::record::{AddressEntry, DownState, RoundRobin, SrvEntry};
use hostdb_domain::HostDbConfig;
use std::net::IpAddr;
use std::sync::atomic::Ordering as AtomicOrdering;

/// How the base index of a round-robin selection is chosen. From the base
/// index the first entry that is not down wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundRobinPolicy {
    /// Advance the shared cursor on every selection.
    Rotate,
    /// Always start at index 0.
    Strict,
    /// Start at the index of the current time bucket.
    Timed { interval: u64 },
}

impl RoundRobinPolicy {
    pub fn from_config(config: &HostDbConfig) -> Self {
        if config.strict_round_robin {
            Self::Strict
        } else if config.timed_round_robin > 0 {
            Self::Timed {
                interval: config.timed_round_robin,
            }
        } else {
            Self::Rotate
        }
    }
}

pub trait Selectable {
    fn down_state(&self) -> &DownState;
}

impl Selectable for AddressEntry {
    fn down_state(&self) -> &DownState {
        &self.down
    }
}

impl Selectable for SrvEntry {
    fn down_state(&self) -> &DownState {
        &self.down
    }
}

impl<E: Selectable> RoundRobin<E> {
    fn next_index(&self) -> usize {
        self.cursor.fetch_add(1, AtomicOrdering::Relaxed) % self.good
    }

    fn base_index(&self, policy: RoundRobinPolicy, now_secs: u64) -> usize {
        match policy {
            RoundRobinPolicy::Rotate => self.next_index(),
            RoundRobinPolicy::Strict => 0,
            RoundRobinPolicy::Timed { interval } => {
                ((now_secs / interval.max(1)) as usize) % self.good
            }
        }
    }

    /// Pick a live entry according to `policy`. `None` when every good entry
    /// is inside its down window.
    pub fn select(&self, policy: RoundRobinPolicy, now_secs: u64, fail_window: u32) -> Option<&E> {
        if self.good == 0 {
            return None;
        }
        let base = self.base_index(policy, now_secs);
        (0..self.good)
            .map(|offset| &self.entries[(base + offset) % self.good])
            .find(|entry| !entry.down_state().is_down(now_secs, fail_window))
    }

    /// Take entry `index` out of rotation by swapping it with the last good
    /// entry. Returns the remaining good count.
    pub fn remove_at(&mut self, index: usize) -> usize {
        if index < self.good {
            self.good -= 1;
            self.entries.swap(index, self.good);
        }
        self.good
    }
}

impl RoundRobin<AddressEntry> {
    pub fn position(&self, ip: &IpAddr) -> Option<usize> {
        self.good_entries().iter().position(|e| e.ip == *ip)
    }
}

impl RoundRobin<SrvEntry> {
    /// Weighted random pick within the lowest live priority tier. Entries
    /// are kept sorted by `(priority, weight)`. Falls back to plain rotation
    /// when the tier carries no weight.
    pub fn select_srv(&self, now_secs: u64, fail_window: u32) -> Option<&SrvEntry> {
        let mut tier: Vec<&SrvEntry> = Vec::with_capacity(self.good);
        let mut priority = u16::MAX;
        let mut total_weight: u32 = 0;

        for entry in self.good_entries() {
            if entry.down.is_down(now_secs, fail_window) {
                continue;
            }
            if entry.priority > priority {
                break;
            }
            priority = entry.priority;
            total_weight += entry.weight as u32;
            tier.push(entry);
        }

        if tier.is_empty() || total_weight == 0 {
            return self.select(RoundRobinPolicy::Rotate, now_secs, fail_window);
        }

        let mut roll = fastrand::u32(..total_weight);
        let last = tier.len() - 1;
        for (i, entry) in tier.iter().enumerate() {
            if i == last || roll < entry.weight as u32 {
                return Some(entry);
            }
            roll -= entry.weight as u32;
        }
        None
    }
}
