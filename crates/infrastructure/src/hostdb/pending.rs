use super::key::CacheKey;
use super::record::HostRecord;
use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// What an in-flight resolution hands its waiters: the stored record
/// (possibly a negative one), or `None` when nothing was stored.
pub type Delivery = Option<Arc<HostRecord>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First waiter for the key; must issue the upstream request.
    Leader,
    /// A request is already in flight; just wait.
    Follower,
}

pub struct Waiter {
    id: u64,
    tx: oneshot::Sender<Delivery>,
}

/// Callers waiting on the single in-flight resolution of each key.
///
/// Presence of a key means a resolution is in flight, even when its queue
/// is empty (background refreshes and cancelled callers leave it so).
pub struct PendingTable {
    waiters: DashMap<CacheKey, VecDeque<Waiter>, FxBuildHasher>,
    next_id: AtomicU64,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            waiters: DashMap::with_hasher(FxBuildHasher),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue a caller on `key`.
    pub fn register(&self, key: CacheKey) -> (Registration, u64, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let mut registration = Registration::Follower;
        self.waiters
            .entry(key)
            .or_insert_with(|| {
                registration = Registration::Leader;
                VecDeque::new()
            })
            .push_back(Waiter { id, tx });
        (registration, id, rx)
    }

    /// Mark `key` in flight without a waiter. Returns `false` if a
    /// resolution was already in flight.
    pub fn try_claim(&self, key: CacheKey) -> bool {
        let mut claimed = false;
        self.waiters.entry(key).or_insert_with(|| {
            claimed = true;
            VecDeque::new()
        });
        claimed
    }

    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.waiters.contains_key(key)
    }

    /// Drop one caller from the queue. The in-flight resolution carries on
    /// for the others.
    pub fn cancel(&self, key: &CacheKey, id: u64) -> bool {
        match self.waiters.get_mut(key) {
            Some(mut queue) => {
                let before = queue.len();
                queue.retain(|w| w.id != id);
                before != queue.len()
            }
            None => false,
        }
    }

    /// Close out the in-flight resolution of `key`, returning its waiters in
    /// enqueue order.
    pub fn take(&self, key: &CacheKey) -> VecDeque<Waiter> {
        self.waiters
            .remove(key)
            .map(|(_, queue)| queue)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Wake every waiter with the same result. Must be called with no partition
/// lock held.
pub fn deliver(waiters: VecDeque<Waiter>, result: &Delivery) -> usize {
    let mut delivered = 0;
    for waiter in waiters {
        if waiter.tx.send(result.clone()).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

/// Releases waiters with `None` if the resolution task ends without
/// completing (runtime shutdown, abort).
pub struct InflightGuard {
    table: Arc<PendingTable>,
    key: CacheKey,
    armed: bool,
}

impl InflightGuard {
    pub fn new(table: Arc<PendingTable>, key: CacheKey) -> Self {
        Self {
            table,
            key,
            armed: true,
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if self.armed {
            let waiters = self.table.take(&self.key);
            debug!(key = %self.key, waiters = waiters.len(), "In-flight resolution abandoned");
            deliver(waiters, &None);
        }
    }
}
