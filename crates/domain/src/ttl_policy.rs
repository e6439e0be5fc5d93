use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Largest TTL, in seconds, a record may carry.
pub const MAX_TTL: u32 = 0x1F_FFFF;

/// How the upstream TTL and the configured default combine.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TtlMode {
    #[default]
    Obey,
    Ignore,
    Min,
    Max,
}

impl FromStr for TtlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "obey" | "0" => Ok(Self::Obey),
            "ignore" | "1" => Ok(Self::Ignore),
            "min" | "2" => Ok(Self::Min),
            "max" | "3" => Ok(Self::Max),
            _ => Err(format!("Invalid TTL mode: {}", s)),
        }
    }
}

impl TtlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Obey => "obey",
            Self::Ignore => "ignore",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

/// TTL a freshly resolved record is stored with, always within `[1, MAX_TTL]`.
#[inline]
pub fn effective_ttl(mode: TtlMode, upstream: u32, default: u32) -> u32 {
    let ttl = match mode {
        TtlMode::Obey => upstream,
        TtlMode::Ignore => default,
        TtlMode::Min => upstream.min(default),
        TtlMode::Max => upstream.max(default),
    };
    ttl.clamp(1, MAX_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_combine_upstream_and_default() {
        assert_eq!(effective_ttl(TtlMode::Obey, 300, 60), 300);
        assert_eq!(effective_ttl(TtlMode::Ignore, 300, 60), 60);
        assert_eq!(effective_ttl(TtlMode::Min, 300, 60), 60);
        assert_eq!(effective_ttl(TtlMode::Max, 300, 60), 300);
    }

    #[test]
    fn test_zero_upstream_ttl_is_clamped_to_one() {
        assert_eq!(effective_ttl(TtlMode::Obey, 0, 60), 1);
        assert_eq!(effective_ttl(TtlMode::Min, 0, 60), 1);
    }

    #[test]
    fn test_huge_ttl_is_clamped_to_max() {
        assert_eq!(effective_ttl(TtlMode::Obey, u32::MAX, 60), MAX_TTL);
        assert_eq!(effective_ttl(TtlMode::Ignore, 10, u32::MAX), MAX_TTL);
    }

    #[test]
    fn test_parse_accepts_names_and_legacy_numbers() {
        assert_eq!("MIN".parse::<TtlMode>().unwrap(), TtlMode::Min);
        assert_eq!("1".parse::<TtlMode>().unwrap(), TtlMode::Ignore);
        assert!("sometimes".parse::<TtlMode>().is_err());
    }
}
