use hostdb_domain::Config;
use tracing::info;

/// Print the effective configuration after defaults and validation.
pub fn run(config: &Config) -> anyhow::Result<()> {
    info!(
        partitions = config.hostdb.partitions,
        max_count = config.hostdb.max_count,
        "Configuration is valid"
    );
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
