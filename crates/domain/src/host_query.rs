use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Discriminator folded into every cache key so that answers for different
/// address families or record kinds never collide.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostDbMark {
    Generic = 0,
    Ipv4 = 1,
    Ipv6 = 2,
    Srv = 3,
}

impl HostDbMark {
    pub fn for_addr(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::Ipv4,
            IpAddr::V6(_) => Self::Ipv6,
        }
    }

    /// The other address family to try after a failed lookup, if the
    /// resolution style accepts it.
    pub fn fallback(self, style: HostResStyle) -> Option<Self> {
        match (self, style) {
            (Self::Ipv4, HostResStyle::PreferIpv4) => Some(Self::Ipv6),
            (Self::Ipv6, HostResStyle::PreferIpv6) => Some(Self::Ipv4),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Ipv4 => "ipv4",
            Self::Ipv6 => "ipv6",
            Self::Srv => "srv",
        }
    }
}

/// Which address families a caller is willing to accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostResStyle {
    #[default]
    PreferIpv4,
    PreferIpv6,
    Ipv4Only,
    Ipv6Only,
    Any,
}

impl HostResStyle {
    pub fn mark(self) -> HostDbMark {
        match self {
            Self::PreferIpv4 | Self::Ipv4Only => HostDbMark::Ipv4,
            Self::PreferIpv6 | Self::Ipv6Only => HostDbMark::Ipv6,
            Self::Any => HostDbMark::Generic,
        }
    }

    pub fn only_for(mark: HostDbMark) -> Self {
        match mark {
            HostDbMark::Ipv6 => Self::Ipv6Only,
            HostDbMark::Ipv4 => Self::Ipv4Only,
            HostDbMark::Generic | HostDbMark::Srv => Self::Any,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    /// Forward lookup of a host name.
    Name(Arc<str>),
    /// Reverse lookup of an address.
    Addr(IpAddr),
    /// SRV lookup of a service name such as `_http._tcp.example.com`.
    Srv(Arc<str>),
}

/// A single logical lookup, before it is hashed into a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostQuery {
    pub target: QueryTarget,
    pub port: u16,
    pub style: HostResStyle,
    /// Identifies the resolver configuration (e.g. split DNS server) that
    /// answers this query.
    pub resolver_context: Option<u64>,
}

impl HostQuery {
    pub fn by_name(name: impl Into<Arc<str>>) -> Self {
        Self {
            target: QueryTarget::Name(name.into()),
            port: 0,
            style: HostResStyle::default(),
            resolver_context: None,
        }
    }

    pub fn by_addr(ip: IpAddr) -> Self {
        Self {
            target: QueryTarget::Addr(ip),
            port: 0,
            style: HostResStyle::only_for(HostDbMark::for_addr(&ip)),
            resolver_context: None,
        }
    }

    pub fn srv(name: impl Into<Arc<str>>) -> Self {
        Self {
            target: QueryTarget::Srv(name.into()),
            port: 0,
            style: HostResStyle::Any,
            resolver_context: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_style(mut self, style: HostResStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_resolver_context(mut self, context: u64) -> Self {
        self.resolver_context = Some(context);
        self
    }

    /// Initial mark for this query.
    pub fn mark(&self) -> HostDbMark {
        match &self.target {
            QueryTarget::Name(_) => self.style.mark(),
            QueryTarget::Addr(ip) => HostDbMark::for_addr(ip),
            QueryTarget::Srv(_) => HostDbMark::Srv,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match &self.target {
            QueryTarget::Name(name) | QueryTarget::Srv(name) => Some(name),
            QueryTarget::Addr(_) => None,
        }
    }

    pub fn is_by_name(&self) -> bool {
        matches!(self.target, QueryTarget::Name(_))
    }

    pub fn is_srv(&self) -> bool {
        matches!(self.target, QueryTarget::Srv(_))
    }
}

impl std::fmt::Display for HostQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            QueryTarget::Name(name) => write!(f, "{}", name),
            QueryTarget::Addr(ip) => write!(f, "{}", ip),
            QueryTarget::Srv(name) => write!(f, "SRV {}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_only_for_preferred_styles() {
        assert_eq!(
            HostDbMark::Ipv4.fallback(HostResStyle::PreferIpv4),
            Some(HostDbMark::Ipv6)
        );
        assert_eq!(
            HostDbMark::Ipv6.fallback(HostResStyle::PreferIpv6),
            Some(HostDbMark::Ipv4)
        );
        assert_eq!(HostDbMark::Ipv4.fallback(HostResStyle::Ipv4Only), None);
        assert_eq!(HostDbMark::Ipv6.fallback(HostResStyle::PreferIpv4), None);
        assert_eq!(HostDbMark::Srv.fallback(HostResStyle::Any), None);
    }

    #[test]
    fn test_reverse_query_mark_follows_address_family() {
        let v4 = HostQuery::by_addr("10.0.0.1".parse().unwrap());
        let v6 = HostQuery::by_addr("2001:db8::1".parse().unwrap());
        assert_eq!(v4.mark(), HostDbMark::Ipv4);
        assert_eq!(v6.mark(), HostDbMark::Ipv6);
        assert_eq!(v6.style, HostResStyle::Ipv6Only);
    }

    #[test]
    fn test_srv_query_uses_srv_mark() {
        let q = HostQuery::srv("_http._tcp.example.com");
        assert_eq!(q.mark(), HostDbMark::Srv);
        assert!(q.is_srv());
        assert_eq!(q.name(), Some("_http._tcp.example.com"));
    }
}
