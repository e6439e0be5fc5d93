//! Host resolution cache - domain layer
pub mod config;
pub mod errors;
pub mod host_query;
pub mod ttl_policy;

pub use config::{Config, ConfigError, HostDbConfig, LoggingConfig};
pub use errors::DomainError;
pub use host_query::{HostDbMark, HostQuery, HostResStyle, QueryTarget};
pub use ttl_policy::{effective_ttl, TtlMode, MAX_TTL};
