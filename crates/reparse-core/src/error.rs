use crate::source::SourceId;
use std::time::Duration;
use thiserror::Error;

/// Error types shared by the reparse crates.
///
/// Notification entry points (`source_changed`, `revalidate`, ...) never
/// return these; they are produced by configuration, document loading and
/// parsing, and are logged when they occur below a notification.
///
/// # Examples
///
/// ```
/// use reparse_core::error::{ReparseError, Result};
/// use std::time::Duration;
///
/// fn check(standard: Duration, fast: Duration) -> Result<()> {
///     if fast > standard {
///         return Err(ReparseError::InvalidDelays { standard, fast });
///     }
///     Ok(())
/// }
///
/// assert!(check(Duration::from_millis(500), Duration::from_millis(10)).is_ok());
/// assert!(check(Duration::from_millis(10), Duration::from_millis(500)).is_err());
/// ```
#[derive(Error, Debug)]
pub enum ReparseError {
    #[error("invalid reparse delays: fast delay {fast:?} exceeds standard delay {standard:?}")]
    InvalidDelays { standard: Duration, fast: Duration },

    #[error("failed to parse {mime_type}: {source}")]
    Parse {
        mime_type: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("no parser registered for mime type: {0}")]
    NoParser(String),

    #[error("unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("file too large: {size} bytes (max: {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("no tokio runtime available: {0}")]
    Runtime(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for `Result<T, ReparseError>`.
pub type Result<T> = std::result::Result<T, ReparseError>;
