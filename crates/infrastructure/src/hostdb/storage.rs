use super::key::CacheKey;
use super::record::HostRecord;
use lru::LruCache;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;
use tracing::debug;

/// Delay before retrying a contended partition lock.
pub const MUTEX_RETRY_DELAY: Duration = Duration::from_millis(2);

/// Number of least-recently-used entries inspected per eviction. The one
/// expiring first is evicted.
const EVICTION_SAMPLE_SIZE: usize = 8;

struct Slot {
    record: Arc<HostRecord>,
    size: usize,
    expire_at: u64,
}

/// One independently locked shard of the store.
pub struct Partition {
    table: LruCache<CacheKey, Slot>,
    bytes: usize,
    max_count: usize,
    max_size: usize,
}

impl Partition {
    fn new(max_count: usize, max_size: usize) -> Self {
        Self {
            table: LruCache::unbounded(),
            bytes: 0,
            max_count: max_count.max(1),
            max_size: max_size.max(1),
        }
    }

    /// Look up and promote in recency order.
    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<HostRecord>> {
        self.table.get(key).map(|slot| Arc::clone(&slot.record))
    }

    pub fn peek(&self, key: &CacheKey) -> Option<Arc<HostRecord>> {
        self.table.peek(key).map(|slot| Arc::clone(&slot.record))
    }

    /// Insert or replace. Returns the replaced record, if any.
    pub fn put(
        &mut self,
        key: CacheKey,
        record: Arc<HostRecord>,
        size_hint: usize,
        expire_at: u64,
    ) -> Option<Arc<HostRecord>> {
        let slot = Slot {
            record,
            size: size_hint,
            expire_at,
        };
        self.bytes += size_hint;
        let replaced = self.table.put(key, slot).map(|old| {
            self.bytes = self.bytes.saturating_sub(old.size);
            old.record
        });
        self.enforce_limits(&key);
        replaced
    }

    pub fn erase(&mut self, key: &CacheKey) -> Option<Arc<HostRecord>> {
        self.table.pop(key).map(|slot| {
            self.bytes = self.bytes.saturating_sub(slot.size);
            slot.record
        })
    }

    pub fn clear(&mut self) {
        self.table.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Copy out every entry, most recently used first.
    pub fn entries(&self) -> Vec<(CacheKey, Arc<HostRecord>)> {
        self.table
            .iter()
            .map(|(key, slot)| (*key, Arc::clone(&slot.record)))
            .collect()
    }

    fn over_budget(&self) -> bool {
        self.table.len() > self.max_count || self.bytes > self.max_size
    }

    fn enforce_limits(&mut self, keep: &CacheKey) {
        let mut evicted = 0usize;
        while self.over_budget() {
            let victim = self
                .table
                .iter()
                .rev()
                .filter(|(key, _)| *key != keep)
                .take(EVICTION_SAMPLE_SIZE)
                .min_by_key(|(_, slot)| slot.expire_at)
                .map(|(key, _)| *key);

            match victim {
                Some(key) => {
                    self.erase(&key);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            debug!(
                evicted,
                remaining = self.table.len(),
                bytes = self.bytes,
                "Partition over budget"
            );
        }
    }
}

/// Fixed set of independently locked partitions.
///
/// Callers never hold a partition guard across an await point: async users
/// go through [`PartitionedStore::with_partition`], which retries the
/// non-blocking lock after [`MUTEX_RETRY_DELAY`].
pub struct PartitionedStore {
    partitions: Box<[Mutex<Partition>]>,
}

impl PartitionedStore {
    pub fn new(partitions: usize, max_count: usize, max_size: usize) -> Self {
        let n = partitions.max(1);
        let per_count = max_count / n;
        let per_size = max_size / n;
        let partitions = (0..n)
            .map(|_| Mutex::new(Partition::new(per_count, per_size)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { partitions }
    }

    #[inline]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    #[inline]
    pub fn shard_for(&self, key: &CacheKey) -> usize {
        (key.fold() % self.partitions.len() as u64) as usize
    }

    /// Run `f` under the owning partition's lock if it is free. Hands `f`
    /// back when the lock is contended.
    pub fn try_with_partition<R, F>(&self, key: &CacheKey, f: F) -> Result<R, F>
    where
        F: FnOnce(&mut Partition) -> R,
    {
        let mutex = &self.partitions[self.shard_for(key)];
        let mut guard = match mutex.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(f),
        };
        Ok(f(&mut guard))
    }

    /// Run `f` under the owning partition's lock, yielding to the runtime
    /// between attempts instead of blocking the worker thread.
    pub async fn with_partition<R, F>(&self, key: &CacheKey, f: F) -> R
    where
        F: FnOnce(&mut Partition) -> R,
    {
        let mut f = f;
        loop {
            match self.try_with_partition(key, f) {
                Ok(result) => return result,
                Err(back) => {
                    f = back;
                    tokio::time::sleep(MUTEX_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Blocking lock, for administrative paths outside the async runtime.
    pub fn lock(&self, index: usize) -> MutexGuard<'_, Partition> {
        match self.partitions[index].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn lock_for(&self, key: &CacheKey) -> MutexGuard<'_, Partition> {
        self.lock(self.shard_for(key))
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<HostRecord>> {
        self.lock_for(key).get(key)
    }

    pub fn put(&self, key: CacheKey, record: Arc<HostRecord>, size_hint: usize, expire_at: u64) {
        self.lock_for(&key).put(key, record, size_hint, expire_at);
    }

    pub fn erase(&self, key: &CacheKey) -> Option<Arc<HostRecord>> {
        self.lock_for(key).erase(key)
    }

    pub fn len(&self) -> usize {
        (0..self.partition_count()).map(|i| self.lock(i).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        for i in 0..self.partition_count() {
            self.lock(i).clear();
        }
    }

    /// Lazy walk over every stored record. Each partition is locked only
    /// while it is copied out; no two partitions are ever locked together.
    pub fn iter(&self) -> StoreIter<'_> {
        StoreIter {
            store: self,
            next_partition: 0,
            buffer: Vec::new().into_iter(),
        }
    }
}

pub struct StoreIter<'a> {
    store: &'a PartitionedStore,
    next_partition: usize,
    buffer: std::vec::IntoIter<(CacheKey, Arc<HostRecord>)>,
}

impl Iterator for StoreIter<'_> {
    type Item = (CacheKey, Arc<HostRecord>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.next() {
                return Some(item);
            }
            if self.next_partition >= self.store.partition_count() {
                return None;
            }
            let entries = self.store.lock(self.next_partition).entries();
            self.next_partition += 1;
            self.buffer = entries.into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostdb_domain::HostDbMark;
    use std::net::IpAddr;

    fn record(name: &str, ttl: u32) -> (CacheKey, Arc<HostRecord>) {
        let key = CacheKey::for_name(name, 0, HostDbMark::Ipv4, None);
        let ip: IpAddr = "10.1.1.1".parse().unwrap();
        let r = HostRecord::from_addresses(key, name, HostDbMark::Ipv4, &[ip], ttl, 0);
        (key, Arc::new(r))
    }

    #[test]
    fn test_shard_for_is_deterministic() {
        let store = PartitionedStore::new(16, 1000, 1 << 20);
        let (key, _) = record("a.example", 60);
        let shard = store.shard_for(&key);
        assert!(shard < 16);
        assert_eq!(shard, store.shard_for(&key));
        assert_eq!(shard as u64, key.fold() % 16);
    }

    #[test]
    fn test_put_get_erase() {
        let store = PartitionedStore::new(4, 100, 1 << 20);
        let (key, r) = record("a.example", 60);
        store.put(key, Arc::clone(&r), r.size_hint(), 60);
        assert!(Arc::ptr_eq(&store.get(&key).unwrap(), &r));
        assert_eq!(store.len(), 1);

        assert!(store.erase(&key).is_some());
        assert!(store.get(&key).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_replace_keeps_byte_accounting() {
        let mut partition = Partition::new(10, 10_000);
        let (key, r) = record("a.example", 60);
        partition.put(key, Arc::clone(&r), 100, 60);
        let replaced = partition.put(key, r, 40, 60);
        assert!(replaced.is_some());
        assert_eq!(partition.bytes(), 40);
        assert_eq!(partition.len(), 1);
    }

    #[test]
    fn test_count_budget_evicts_earliest_expiring_sample() {
        let mut partition = Partition::new(3, 1 << 20);
        let (k1, r1) = record("one.example", 60);
        let (k2, r2) = record("two.example", 60);
        let (k3, r3) = record("three.example", 60);
        let (k4, r4) = record("four.example", 60);
        partition.put(k1, r1, 10, 500);
        partition.put(k2, r2, 10, 100);
        partition.put(k3, r3, 10, 300);
        partition.put(k4, r4, 10, 50);

        assert_eq!(partition.len(), 3);
        assert!(partition.peek(&k2).is_none(), "earliest expiry among the others goes");
        assert!(partition.peek(&k4).is_some(), "just-inserted entry is kept");
    }

    #[test]
    fn test_size_budget_evicts() {
        let mut partition = Partition::new(100, 25);
        let (k1, r1) = record("one.example", 60);
        let (k2, r2) = record("two.example", 60);
        partition.put(k1, r1, 20, 100);
        partition.put(k2, r2, 20, 200);
        assert_eq!(partition.len(), 1);
        assert!(partition.peek(&k2).is_some());
        assert_eq!(partition.bytes(), 20);
    }

    #[test]
    fn test_oversized_single_record_is_kept() {
        let mut partition = Partition::new(100, 10);
        let (k1, r1) = record("big.example", 60);
        partition.put(k1, r1, 50, 100);
        assert_eq!(partition.len(), 1);
    }

    #[test]
    fn test_try_with_partition_hands_closure_back_when_locked() {
        let store = PartitionedStore::new(1, 10, 1 << 20);
        let (key, _) = record("a.example", 60);
        let _guard = store.lock(0);
        let result = store.try_with_partition(&key, |p| p.len());
        assert!(result.is_err());
    }

    #[test]
    fn test_iter_visits_every_partition_and_restarts() {
        let store = PartitionedStore::new(8, 1000, 1 << 20);
        for i in 0..50 {
            let (key, r) = record(&format!("host{i}.example"), 60);
            store.put(key, r, 10, 60);
        }
        assert_eq!(store.iter().count(), 50);
        assert_eq!(store.iter().count(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_partition_waits_for_lock() {
        let store = Arc::new(PartitionedStore::new(1, 10, 1 << 20));
        let (key, r) = record("a.example", 60);

        let guard = store.lock(0);
        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .with_partition(&key, move |p| {
                        p.put(key, r, 10, 60);
                        p.len()
                    })
                    .await
            })
        };
        tokio::time::sleep(MUTEX_RETRY_DELAY * 3).await;
        assert!(!waiter.is_finished());
        drop(guard);

        assert_eq!(waiter.await.unwrap(), 1);
    }
}
