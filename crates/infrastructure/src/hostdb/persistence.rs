use super::freshness::FreshnessPolicy;
use super::key::CacheKey;
use super::record::{AddressEntry, AppData, HostRecord, RecordPayload, RoundRobin, SrvEntry};
use super::storage::PartitionedStore;
use compact_str::CompactString;
use hostdb_domain::{DomainError, HostDbMark};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bumped whenever the snapshot layout changes. Snapshots carrying another
/// version are discarded on load.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub partitions: usize,
    pub saved_at: u64,
    pub records: Vec<PersistedRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub key: CacheKey,
    pub name: CompactString,
    pub mark: HostDbMark,
    pub created_at: u64,
    pub ttl_seconds: u32,
    pub payload: PersistedPayload,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistedPayload {
    Address {
        entry: PersistedAddress,
        #[serde(default)]
        reverse_name: Option<CompactString>,
    },
    RoundRobin {
        entries: Vec<PersistedAddress>,
        good: usize,
        cursor: usize,
    },
    Srv {
        entries: Vec<PersistedSrv>,
        good: usize,
        cursor: usize,
    },
    Failure,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedAddress {
    pub ip: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<Vec<u8>>,
    #[serde(default)]
    pub last_failure: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedSrv {
    pub target: CompactString,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<Vec<u8>>,
    #[serde(default)]
    pub last_failure: u64,
}

fn app_bytes(app: &Option<AppData>) -> Option<Vec<u8>> {
    app.as_ref().map(|a| a.to_vec())
}

fn app_data(bytes: Option<Vec<u8>>) -> Option<AppData> {
    bytes.map(AppData::from)
}

impl From<&AddressEntry> for PersistedAddress {
    fn from(entry: &AddressEntry) -> Self {
        Self {
            ip: entry.ip,
            app: app_bytes(&entry.app),
            last_failure: entry.down.last_failure(),
        }
    }
}

impl From<PersistedAddress> for AddressEntry {
    fn from(p: PersistedAddress) -> Self {
        AddressEntry::restore(p.ip, app_data(p.app), p.last_failure)
    }
}

impl From<&SrvEntry> for PersistedSrv {
    fn from(entry: &SrvEntry) -> Self {
        Self {
            target: entry.target.clone(),
            port: entry.port,
            priority: entry.priority,
            weight: entry.weight,
            app: app_bytes(&entry.app),
            last_failure: entry.down.last_failure(),
        }
    }
}

impl From<PersistedSrv> for SrvEntry {
    fn from(p: PersistedSrv) -> Self {
        let mut entry =
            SrvEntry::new(&p.target, p.port, p.priority, p.weight).with_down(p.last_failure);
        entry.app = app_data(p.app);
        entry
    }
}

impl From<&HostRecord> for PersistedRecord {
    fn from(record: &HostRecord) -> Self {
        let payload = match &record.payload {
            RecordPayload::Address {
                entry,
                reverse_name,
            } => PersistedPayload::Address {
                entry: entry.into(),
                reverse_name: reverse_name.clone(),
            },
            RecordPayload::RoundRobinSet(rr) => PersistedPayload::RoundRobin {
                entries: rr.entries.iter().map(Into::into).collect(),
                good: rr.good,
                cursor: rr.cursor(),
            },
            RecordPayload::SrvSet(rr) => PersistedPayload::Srv {
                entries: rr.entries.iter().map(Into::into).collect(),
                good: rr.good,
                cursor: rr.cursor(),
            },
            RecordPayload::Failure => PersistedPayload::Failure,
        };
        Self {
            key: record.key,
            name: record.name.clone(),
            mark: record.mark,
            created_at: record.created_at,
            ttl_seconds: record.ttl_seconds,
            payload,
        }
    }
}

impl PersistedRecord {
    pub fn into_record(self) -> HostRecord {
        let payload = match self.payload {
            PersistedPayload::Address {
                entry,
                reverse_name,
            } => RecordPayload::Address {
                entry: entry.into(),
                reverse_name,
            },
            PersistedPayload::RoundRobin {
                entries,
                good,
                cursor,
            } => RecordPayload::RoundRobinSet(RoundRobin::restore(
                entries.into_iter().map(Into::into).collect(),
                good,
                cursor,
            )),
            PersistedPayload::Srv {
                entries,
                good,
                cursor,
            } => RecordPayload::SrvSet(RoundRobin::restore(
                entries.into_iter().map(Into::into).collect(),
                good,
                cursor,
            )),
            PersistedPayload::Failure => RecordPayload::Failure,
        };
        HostRecord::new(
            self.key,
            &self.name,
            self.mark,
            payload,
            self.ttl_seconds,
            self.created_at,
        )
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write every stored record to `path`. The file is replaced atomically.
pub fn persist(store: &PartitionedStore, path: &Path, now_secs: u64) -> Result<usize, DomainError> {
    let records: Vec<PersistedRecord> = store
        .iter()
        .map(|(_, record)| PersistedRecord::from(record.as_ref()))
        .collect();
    let count = records.len();
    let snapshot = StoreSnapshot {
        version: SNAPSHOT_VERSION,
        partitions: store.partition_count(),
        saved_at: now_secs,
        records,
    };

    let tmp = temp_path(path);
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer(&mut writer, &snapshot)
            .map_err(|e| DomainError::IoError(e.to_string()))?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;

    debug!(path = %path.display(), records = count, "Host database snapshot written");
    Ok(count)
}

/// Read and version-check a snapshot without loading it.
pub fn read_snapshot(path: &Path) -> Result<StoreSnapshot, DomainError> {
    let reader = BufReader::new(File::open(path)?);
    let snapshot: StoreSnapshot = serde_json::from_reader(reader)
        .map_err(|e| DomainError::CorruptPersistedState(e.to_string()))?;
    if snapshot.version != SNAPSHOT_VERSION {
        return Err(DomainError::CorruptPersistedState(format!(
            "snapshot version {} (expected {})",
            snapshot.version, SNAPSHOT_VERSION
        )));
    }
    Ok(snapshot)
}

/// Load a snapshot into `store`, skipping records that would no longer be
/// served. Any problem with the file is logged and yields a cold start.
///
/// Returns the number of records loaded.
pub fn load(
    store: &PartitionedStore,
    path: &Path,
    now_secs: u64,
    policy: &FreshnessPolicy,
    migrate_on_demand: bool,
) -> usize {
    let snapshot = match read_snapshot(path) {
        Ok(snapshot) => snapshot,
        Err(DomainError::IoError(_)) if !path.exists() => {
            debug!(path = %path.display(), "No host database snapshot, starting cold");
            return 0;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Discarding host database snapshot");
            return 0;
        }
    };

    if snapshot.partitions != store.partition_count() && !migrate_on_demand {
        warn!(
            path = %path.display(),
            saved = snapshot.partitions,
            configured = store.partition_count(),
            "Snapshot partition count differs and migration is disabled, starting cold"
        );
        return 0;
    }

    let mut loaded = 0usize;
    let mut expired = 0usize;
    for persisted in snapshot.records {
        let record = persisted.into_record();
        let retain_until = policy.retain_until(&record);
        if retain_until <= now_secs {
            expired += 1;
            continue;
        }
        let size = record.size_hint();
        store.put(record.key, Arc::new(record), size, retain_until);
        loaded += 1;
    }

    info!(
        path = %path.display(),
        loaded,
        expired,
        migrated = snapshot.partitions != store.partition_count(),
        "Host database snapshot loaded"
    );
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy() -> FreshnessPolicy {
        FreshnessPolicy {
            serve_stale_for: 0,
            fail_timeout: 60,
            stale_interval: 0,
        }
    }

    fn populated_store(partitions: usize) -> PartitionedStore {
        let store = PartitionedStore::new(partitions, 1000, 1 << 20);

        let key = CacheKey::for_name("rr.example", 0, HostDbMark::Ipv4, None);
        let addrs: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()];
        let mut rr = HostRecord::from_addresses(
            key,
            "rr.example",
            HostDbMark::Ipv4,
            &addrs,
            300,
            1000,
        );
        rr.find_mut(&addrs[1]).unwrap().app = Some(AppData::from(&b"stats"[..]));
        let size = rr.size_hint();
        store.put(key, Arc::new(rr), size, 1300);

        let key = CacheKey::for_name("_x._tcp.example", 0, HostDbMark::Srv, None);
        let srv = HostRecord::from_srv(
            key,
            "_x._tcp.example",
            vec![SrvEntry::new("a.example", 8080, 1, 10)],
            300,
            1000,
        );
        store.put(key, Arc::new(srv), 64, 1300);

        let key = CacheKey::for_name("gone.example", 0, HostDbMark::Ipv4, None);
        let dead = HostRecord::failure(key, "gone.example", HostDbMark::Ipv4, 60, 1000);
        store.put(key, Arc::new(dead), 32, 1060);
        store
    }

    #[test]
    fn test_persist_then_load_restores_live_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostdb.json");
        let store = populated_store(4);
        assert_eq!(persist(&store, &path, 1010).unwrap(), 3);
        assert!(!temp_path(&path).exists());

        let restored = PartitionedStore::new(4, 1000, 1 << 20);
        assert_eq!(load(&restored, &path, 1100, &policy(), true), 2, "failure record aged out");

        let key = CacheKey::for_name("rr.example", 0, HostDbMark::Ipv4, None);
        let rr = restored.get(&key).unwrap();
        assert!(rr.is_round_robin());
        let ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert_eq!(rr.find(&ip).unwrap().app.as_deref(), Some(&b"stats"[..]));

        let key = CacheKey::for_name("_x._tcp.example", 0, HostDbMark::Srv, None);
        assert_eq!(restored.get(&key).unwrap().srv_targets()[0].port, 8080);
    }

    #[test]
    fn test_missing_file_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let store = PartitionedStore::new(4, 1000, 1 << 20);
        assert_eq!(load(&store, &dir.path().join("absent.json"), 0, &policy(), true), 0);
    }

    #[test]
    fn test_corrupt_file_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostdb.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let store = PartitionedStore::new(4, 1000, 1 << 20);
        assert_eq!(load(&store, &path, 0, &policy(), true), 0);
        assert!(matches!(
            read_snapshot(&path),
            Err(DomainError::CorruptPersistedState(_))
        ));
    }

    #[test]
    fn test_version_mismatch_is_cold_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostdb.json");
        let body = format!(
            r#"{{"version":{},"partitions":4,"saved_at":0,"records":[]}}"#,
            SNAPSHOT_VERSION + 1
        );
        std::fs::write(&path, body).unwrap();
        assert!(read_snapshot(&path).is_err());
        let store = PartitionedStore::new(4, 1000, 1 << 20);
        assert_eq!(load(&store, &path, 0, &policy(), true), 0);
    }

    #[test]
    fn test_partition_change_migrates_only_on_demand() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hostdb.json");
        persist(&populated_store(4), &path, 1000).unwrap();

        let discarded = PartitionedStore::new(8, 1000, 1 << 20);
        assert_eq!(load(&discarded, &path, 1000, &policy(), false), 0);

        let migrated = PartitionedStore::new(8, 1000, 1 << 20);
        assert_eq!(load(&migrated, &path, 1000, &policy(), true), 3);
        let key = CacheKey::for_name("rr.example", 0, HostDbMark::Ipv4, None);
        assert!(migrated.get(&key).is_some());
    }
}
