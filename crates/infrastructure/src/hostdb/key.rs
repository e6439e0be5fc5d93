use hostdb_domain::{HostDbMark, HostQuery, QueryTarget};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;

/// 128-bit digest identifying one logical lookup.
///
/// Fields are hashed in a fixed order: target bytes (host name as given, or
/// the raw address octets), port, mark, resolver context. Host names are not
/// case-folded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(u128);

impl CacheKey {
    pub fn for_query(query: &HostQuery, mark: HostDbMark) -> Self {
        match &query.target {
            QueryTarget::Name(name) | QueryTarget::Srv(name) => {
                Self::for_name(name, query.port, mark, query.resolver_context)
            }
            QueryTarget::Addr(ip) => Self::for_addr(ip, query.port, query.resolver_context),
        }
    }

    pub fn for_name(
        name: &str,
        port: u16,
        mark: HostDbMark,
        resolver_context: Option<u64>,
    ) -> Self {
        Self::digest(name.as_bytes(), port, mark, resolver_context)
    }

    pub fn for_addr(ip: &IpAddr, port: u16, resolver_context: Option<u64>) -> Self {
        let mark = HostDbMark::for_addr(ip);
        match ip {
            IpAddr::V4(v4) => Self::digest(&v4.octets(), port, mark, resolver_context),
            IpAddr::V6(v6) => Self::digest(&v6.octets(), port, mark, resolver_context),
        }
    }

    fn digest(target: &[u8], port: u16, mark: HostDbMark, resolver_context: Option<u64>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(target);
        hasher.update(port.to_be_bytes());
        hasher.update([mark as u8]);
        match resolver_context {
            Some(id) => {
                hasher.update([1]);
                hasher.update(id.to_be_bytes());
            }
            None => hasher.update([0]),
        }
        let digest = hasher.finalize();

        let mut folded = [0u8; 16];
        for (i, byte) in digest.iter().enumerate() {
            folded[i % 16] ^= byte;
        }
        Self(u128::from_be_bytes(folded))
    }

    /// 64-bit fold used for partition selection.
    #[inline]
    pub fn fold(&self) -> u64 {
        (self.0 >> 64) as u64 ^ self.0 as u64
    }

    #[inline]
    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
