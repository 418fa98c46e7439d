use crate::error::{ReparseError, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration for the reparse runtime.
///
/// Usually deserialized from JSON supplied by the editor integration layer.
/// Every field has a default, so an empty object is a valid configuration.
///
/// # Examples
///
/// ```
/// use reparse_core::config::ParsingConfig;
///
/// let json = r#"{
///     "reparse_delay_ms": 750,
///     "mime_types": { "rs": "text/x-rust" }
/// }"#;
///
/// let config: ParsingConfig = serde_json::from_str(json).unwrap();
/// assert_eq!(config.reparse_delay_ms, 750);
/// assert_eq!(config.immediate_reparse_delay_ms, 10);
/// assert_eq!(config.mime_for_extension("rs"), Some("text/x-rust"));
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ParsingConfig {
    /// Delay before a reset after ordinary edits.
    #[serde(default = "default_reparse_delay")]
    pub reparse_delay_ms: u64,
    /// Delay before a reset after whole-source changes.
    #[serde(default = "default_immediate_reparse_delay")]
    pub immediate_reparse_delay_ms: u64,
    /// Cancelling a task slower than this logs a warning.
    #[serde(default = "default_slow_cancel_limit")]
    pub slow_cancel_limit_ms: u64,
    /// File extension (without dot) to mime type.
    #[serde(default = "default_mime_types")]
    pub mime_types: BTreeMap<String, String>,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            reparse_delay_ms: default_reparse_delay(),
            immediate_reparse_delay_ms: default_immediate_reparse_delay(),
            slow_cancel_limit_ms: default_slow_cancel_limit(),
            mime_types: default_mime_types(),
        }
    }
}

impl ParsingConfig {
    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn slow_cancel_limit(&self) -> Duration {
        Duration::from_millis(self.slow_cancel_limit_ms)
    }

    pub fn mime_for_extension(&self, extension: &str) -> Option<&str> {
        self.mime_types.get(extension).map(String::as_str)
    }

    /// Resolves the mime type of a path from its extension.
    ///
    /// Unknown or missing extensions resolve to `text/plain`.
    pub fn mime_for_path(&self, path: &std::path::Path) -> &str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.mime_for_extension(ext))
            .unwrap_or(PLAIN_TEXT)
    }
}

/// Mime type for files no parser claims.
pub const PLAIN_TEXT: &str = "text/plain";

const fn default_reparse_delay() -> u64 {
    500
}

const fn default_immediate_reparse_delay() -> u64 {
    10
}

const fn default_slow_cancel_limit() -> u64 {
    50
}

fn default_mime_types() -> BTreeMap<String, String> {
    [
        ("java", "text/x-java"),
        ("rs", "text/x-rust"),
        ("c", "text/x-c"),
        ("h", "text/x-h"),
        ("cpp", "text/x-c++"),
        ("py", "text/x-python"),
        ("php", "text/x-php5"),
        ("js", "text/javascript"),
        ("html", "text/html"),
        ("xml", "text/xml"),
    ]
    .into_iter()
    .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
    .collect()
}

/// Reparse delays shared by every source of one runtime.
///
/// Replaces process-global delay settings: each runtime owns one instance
/// and hands it to the controls it creates. The pair is swapped under a
/// single lock so readers never see a fast delay above the standard one.
///
/// # Examples
///
/// ```
/// use reparse_core::config::ReparseDelays;
/// use std::time::Duration;
///
/// let delays = ReparseDelays::default();
/// assert_eq!(delays.reparse_delay(false), Duration::from_millis(500));
/// assert_eq!(delays.reparse_delay(true), Duration::from_millis(10));
///
/// delays
///     .set_reparse_delays(Duration::from_millis(200), Duration::from_millis(20))
///     .unwrap();
/// assert_eq!(delays.reparse_delay(false), Duration::from_millis(200));
///
/// assert!(delays
///     .set_reparse_delays(Duration::from_millis(10), Duration::from_millis(20))
///     .is_err());
/// ```
#[derive(Debug)]
pub struct ReparseDelays {
    delays: RwLock<(Duration, Duration)>,
}

impl ReparseDelays {
    /// Creates delays, failing if `fast` exceeds `standard`.
    pub fn new(standard: Duration, fast: Duration) -> Result<Self> {
        validate(standard, fast)?;
        Ok(Self {
            delays: RwLock::new((standard, fast)),
        })
    }

    pub fn from_config(config: &ParsingConfig) -> Result<Self> {
        Self::new(
            Duration::from_millis(config.reparse_delay_ms),
            Duration::from_millis(config.immediate_reparse_delay_ms),
        )
    }

    /// Replaces both delays.
    ///
    /// # Errors
    ///
    /// `ReparseError::InvalidDelays` when `fast > standard`; the previous
    /// values are kept.
    pub fn set_reparse_delays(&self, standard: Duration, fast: Duration) -> Result<()> {
        validate(standard, fast)?;
        *self.delays.write() = (standard, fast);
        tracing::debug!(?standard, ?fast, "reparse delays updated");
        Ok(())
    }

    /// Returns the fast (immediate) delay if `fast`, else the standard one.
    pub fn reparse_delay(&self, fast: bool) -> Duration {
        let (standard, immediate) = *self.delays.read();
        if fast { immediate } else { standard }
    }
}

impl Default for ReparseDelays {
    fn default() -> Self {
        Self {
            delays: RwLock::new((
                Duration::from_millis(default_reparse_delay()),
                Duration::from_millis(default_immediate_reparse_delay()),
            )),
        }
    }
}

fn validate(standard: Duration, fast: Duration) -> Result<()> {
    if fast > standard {
        return Err(ReparseError::InvalidDelays { standard, fast });
    }
    Ok(())
}
