use crate::ttl_policy::TtlMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the host resolution cache.
///
/// Durations are expressed in whole seconds. A zero interval disables the
/// feature it drives (snapshot sync, hosts-file polling, stale serving).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HostDbConfig {
    #[serde(default = "default_true")]
    pub enable: bool,

    /// Upper bound on the number of stored records across all partitions.
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// Upper bound on the summed record size hints, in bytes.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Seconds between snapshot writes to `storage_path`.
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: u64,

    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    #[serde(default)]
    pub ttl_mode: TtlMode,

    #[serde(default = "default_round_robin_max_count")]
    pub round_robin_max_count: usize,

    /// Default TTL used by the `ignore`, `min` and `max` TTL modes.
    #[serde(default = "default_ip_timeout")]
    pub ip_timeout: u32,

    /// Fresh records closer than this to expiry are refreshed in the background.
    #[serde(default = "default_ip_stale_interval")]
    pub ip_stale_interval: u32,

    /// Lifetime of negative records and of the per-target down window.
    #[serde(default = "default_ip_fail_timeout")]
    pub ip_fail_timeout: u32,

    /// Seconds past expiry during which a record may still be served while
    /// it is refreshed.
    #[serde(default)]
    pub serve_stale_for: u32,

    #[serde(default)]
    pub hostfile_path: Option<PathBuf>,

    #[serde(default = "default_hostfile_check_interval")]
    pub hostfile_check_interval: u64,

    #[serde(default)]
    pub disable_reverse_lookup: bool,

    #[serde(default)]
    pub strict_round_robin: bool,

    /// Width in seconds of the time bucket used by timed round robin; 0 disables.
    #[serde(default)]
    pub timed_round_robin: u64,

    #[serde(default)]
    pub re_dns_on_reload: bool,

    #[serde(default = "default_true")]
    pub migrate_on_demand: bool,

    /// Seconds a caller waits for the upstream resolver.
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout: u64,

    /// Extra seconds the upstream request stays alive after callers gave up,
    /// so a late answer still lands in the cache.
    #[serde(default = "default_insert_grace")]
    pub insert_grace: u64,
}

impl Default for HostDbConfig {
    fn default() -> Self {
        Self {
            enable: true,
            max_count: default_max_count(),
            max_size: default_max_size(),
            partitions: default_partitions(),
            sync_frequency: default_sync_frequency(),
            storage_path: None,
            ttl_mode: TtlMode::Obey,
            round_robin_max_count: default_round_robin_max_count(),
            ip_timeout: default_ip_timeout(),
            ip_stale_interval: default_ip_stale_interval(),
            ip_fail_timeout: default_ip_fail_timeout(),
            serve_stale_for: 0,
            hostfile_path: None,
            hostfile_check_interval: default_hostfile_check_interval(),
            disable_reverse_lookup: false,
            strict_round_robin: false,
            timed_round_robin: 0,
            re_dns_on_reload: false,
            migrate_on_demand: true,
            lookup_timeout: default_lookup_timeout(),
            insert_grace: default_insert_grace(),
        }
    }
}

impl HostDbConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout)
    }

    /// Total lifetime of an upstream request task.
    pub fn request_lifetime(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout.saturating_add(self.insert_grace))
    }

    pub fn validate(&self) -> Result<(), super::ConfigError> {
        use super::ConfigError::Validation;

        if self.partitions == 0 {
            return Err(Validation {
                field: "partitions",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_count < self.partitions {
            return Err(Validation {
                field: "max_count",
                reason: format!("must be at least the partition count ({})", self.partitions),
            });
        }
        if self.max_size == 0 {
            return Err(Validation {
                field: "max_size",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.round_robin_max_count == 0 {
            return Err(Validation {
                field: "round_robin_max_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.lookup_timeout == 0 {
            return Err(Validation {
                field: "lookup_timeout",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_count() -> usize {
    120_000
}

fn default_max_size() -> usize {
    10 * 1024 * 1024
}

fn default_partitions() -> usize {
    64
}

fn default_sync_frequency() -> u64 {
    120
}

fn default_round_robin_max_count() -> usize {
    16
}

fn default_ip_timeout() -> u32 {
    86_400
}

fn default_ip_stale_interval() -> u32 {
    720
}

fn default_ip_fail_timeout() -> u32 {
    60
}

fn default_hostfile_check_interval() -> u64 {
    86_400
}

fn default_lookup_timeout() -> u64 {
    120
}

fn default_insert_grace() -> u64 {
    40
}
