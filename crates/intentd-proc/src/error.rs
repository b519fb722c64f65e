//! Process-management error types.

/// Unified error type for the process crate.
#[derive(Debug, thiserror::Error)]
pub enum ProcError {
    /// The tuning configuration failed to parse.
    #[error("invalid tuning config: {0}")]
    InvalidTuning(#[from] toml::de::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A `/proc` entry existed but could not be interpreted.
    #[error("malformed proc entry for pid {pid}: {reason}")]
    ProcStat { pid: i32, reason: String },
}

/// Convenience alias used throughout the process crate.
pub type Result<T> = std::result::Result<T, ProcError>;
