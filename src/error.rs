//! Error taxonomy for one invocation and the process exit code each maps to.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DcaError>;

#[derive(Debug, Error)]
pub enum DcaError {
    #[error("unsupported period '{0}' (only 'week' is implemented)")]
    UnsupportedPeriod(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("state file {path} is unreadable or corrupt: {reason}")]
    StateCorruption { path: String, reason: String },

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("another run holds the state lock {0}")]
    ConcurrentInvocation(String),

    #[error("failed to persist state: {0}")]
    Persistence(#[from] std::io::Error),
}

impl DcaError {
    pub fn exit_code(&self) -> u8 {
        match self {
            DcaError::UnsupportedPeriod(_)
            | DcaError::InvalidConfiguration(_)
            | DcaError::StateCorruption { .. } => 1,
            DcaError::Exchange(_) => 2,
            DcaError::ConcurrentInvocation(_) => 3,
            DcaError::Persistence(_) => 4,
        }
    }
}

impl From<reqwest::Error> for DcaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DcaError::Exchange(format!("request timed out: {err}"))
        } else {
            DcaError::Exchange(err.to_string())
        }
    }
}
