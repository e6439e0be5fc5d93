use hostdb_infrastructure::hostdb::HostsFileSnapshot;
use serde::Serialize;
use std::net::IpAddr;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct HostsReport {
    pub entries: Vec<HostsLine>,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct HostsLine {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v4: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub v6: Option<IpAddr>,
}

pub fn build_report(content: &str) -> HostsReport {
    let (snapshot, errors) = HostsFileSnapshot::parse_with_errors(content, 0);
    let mut entries: Vec<HostsLine> = snapshot
        .iter()
        .map(|(name, entry)| HostsLine {
            name: name.to_string(),
            v4: entry.v4,
            v6: entry.v6,
        })
        .collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    HostsReport {
        entries,
        errors: errors.iter().map(ToString::to_string).collect(),
    }
}

/// Parse a hosts file and print what the override map would contain.
pub fn run(path: &Path, json: bool) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)?;
    let report = build_report(&content);
    for error in &report.errors {
        warn!(path = %path.display(), %error, "Hosts file line skipped");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    for line in &report.entries {
        let v4 = line.v4.map(|ip| ip.to_string()).unwrap_or_else(|| "-".into());
        let v6 = line.v6.map(|ip| ip.to_string()).unwrap_or_else(|| "-".into());
        println!("{:<40} {:<16} {}", line.name, v4, v6);
    }
    println!("{} names, {} skipped lines", report.entries.len(), report.errors.len());
    Ok(())
}
