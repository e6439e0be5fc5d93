use super::record::HostRecord;
use hostdb_domain::HostDbConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve without touching the resolver.
    Fresh,
    /// Past expiry but inside the stale-serve window: serve and revalidate.
    Stale,
    /// Must be resolved again before it can be served.
    Expired,
}

/// The subset of configuration that drives freshness decisions, copied out
/// of the config snapshot once per lookup.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    pub serve_stale_for: u32,
    pub fail_timeout: u32,
    pub stale_interval: u32,
}

impl FreshnessPolicy {
    pub fn from_config(config: &HostDbConfig) -> Self {
        Self {
            serve_stale_for: config.serve_stale_for,
            fail_timeout: config.ip_fail_timeout,
            stale_interval: config.ip_stale_interval,
        }
    }

    pub fn classify(&self, record: &HostRecord, now_secs: u64) -> Freshness {
        if record.is_failed() {
            let lifetime = record.ttl_seconds.min(self.fail_timeout) as u64;
            return if record.age(now_secs) < lifetime {
                Freshness::Fresh
            } else {
                Freshness::Expired
            };
        }

        let expires_at = record.expires_at();
        if now_secs < expires_at {
            Freshness::Fresh
        } else if now_secs < expires_at.saturating_add(self.serve_stale_for as u64) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// A fresh forward record close enough to expiry that it should be
    /// refreshed in the background while still being served.
    pub fn wants_proactive_refresh(&self, record: &HostRecord, now_secs: u64) -> bool {
        if self.stale_interval == 0 || record.is_failed() || record.is_reverse_dns() {
            return false;
        }
        if (record.ttl_seconds as u64) < 2 * self.stale_interval as u64 {
            return false;
        }
        let remaining = record.remaining_ttl(now_secs);
        remaining > 0 && remaining <= self.stale_interval
    }

    /// Store expiry used for eviction ordering. Records stay resident for
    /// the stale window so they can be served while revalidating.
    pub fn retain_until(&self, record: &HostRecord) -> u64 {
        if record.is_failed() {
            record
                .created_at
                .saturating_add(record.ttl_seconds.min(self.fail_timeout) as u64)
        } else {
            record.expires_at().saturating_add(self.serve_stale_for as u64)
        }
    }
}
