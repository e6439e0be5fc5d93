use super::format_epoch;
use hostdb_infrastructure::hostdb::persistence::PersistedPayload;
use hostdb_infrastructure::hostdb::{read_snapshot, StoreSnapshot};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct SnapshotSummary {
    pub version: u32,
    pub partitions: usize,
    pub saved_at: String,
    pub records: usize,
    /// Records still inside their TTL at `saved_at`.
    pub live: usize,
    pub by_kind: BTreeMap<&'static str, usize>,
}

fn kind(payload: &PersistedPayload) -> &'static str {
    match payload {
        PersistedPayload::Address { reverse_name: Some(_), .. } => "reverse",
        PersistedPayload::Address { .. } => "address",
        PersistedPayload::RoundRobin { .. } => "round_robin",
        PersistedPayload::Srv { .. } => "srv",
        PersistedPayload::Failure => "failure",
    }
}

pub fn summarize(snapshot: &StoreSnapshot) -> SnapshotSummary {
    let mut summary = SnapshotSummary {
        version: snapshot.version,
        partitions: snapshot.partitions,
        saved_at: format_epoch(snapshot.saved_at),
        records: snapshot.records.len(),
        ..SnapshotSummary::default()
    };
    for record in &snapshot.records {
        *summary.by_kind.entry(kind(&record.payload)).or_default() += 1;
        if record.created_at + u64::from(record.ttl_seconds) > snapshot.saved_at {
            summary.live += 1;
        }
    }
    summary
}

/// Print a summary of a persisted store, and every record with `verbose`.
pub fn run(path: &Path, verbose: bool, json: bool) -> anyhow::Result<()> {
    let snapshot = read_snapshot(path)?;
    let summary = summarize(&snapshot);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("snapshot   {}", path.display());
        println!("version    {}", summary.version);
        println!("partitions {}", summary.partitions);
        println!("saved at   {}", summary.saved_at);
        println!("records    {} ({} live)", summary.records, summary.live);
        for (kind, count) in &summary.by_kind {
            println!("  {:<12} {}", kind, count);
        }
    }

    if verbose {
        for record in &snapshot.records {
            let expires = record.created_at + u64::from(record.ttl_seconds);
            println!(
                "{} {:<8} {:<12} expires {} {}",
                record.key,
                record.mark.as_str(),
                kind(&record.payload),
                format_epoch(expires),
                record.name
            );
        }
    }
    Ok(())
}
