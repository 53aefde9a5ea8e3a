use thiserror::Error;

/// Failure to bring a watcher up. Nothing is registered when this is returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InitError {
    #[error("pointer tracker unavailable: {reason}")]
    TrackerUnavailable { reason: String },

    #[error("invalid {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

/// Failure reported by a host capability after it was acquired.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostError {
    #[error("pointer sink rejected visibility change: {reason}")]
    Sink { reason: String },
}
