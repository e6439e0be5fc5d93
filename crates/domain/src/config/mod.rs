pub mod errors;
pub mod hostdb;
pub mod logging;
pub mod root;

pub use errors::ConfigError;
pub use hostdb::HostDbConfig;
pub use logging::LoggingConfig;
pub use root::Config;
