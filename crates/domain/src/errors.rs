use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid host name: {0}")]
    InvalidHostName(String),

    #[error("Resolution failed: {0}")]
    ResolutionFailure(String),

    #[error("Resolution timed out")]
    ResolutionTimeout,

    #[error("Host database disabled")]
    Disabled,

    #[error("Corrupt persisted state: {0}")]
    CorruptPersistedState(String),

    #[error("Malformed hosts line {line}: {reason}")]
    MalformedHostsLine { line: usize, reason: String },

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::IoError(err.to_string())
    }
}
