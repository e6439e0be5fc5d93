mod logging;

pub use logging::init_logging;

use hostdb_domain::Config;

/// Load the configuration file and apply command-line overrides.
pub fn load_config(
    path: Option<&str>,
    log_level: Option<String>,
    json_logs: bool,
) -> anyhow::Result<Config> {
    let mut config = Config::load(path)?;
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    if json_logs {
        config.logging.json = true;
    }
    Ok(config)
}
