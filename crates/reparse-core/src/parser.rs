use crate::document::Snapshot;
use crate::error::Result;
use std::any::Any;
use std::sync::Arc;

/// Result of parsing one snapshot.
///
/// Implementations hold language-specific trees but expose them through
/// this trait so scheduler tasks can be written generically and downcast
/// when they need details.
pub trait ParseResult: Send + Sync {
    /// Snapshot this result was produced from.
    fn snapshot(&self) -> &Snapshot;

    /// Downcast to concrete type for language-specific operations
    fn as_any(&self) -> &dyn Any;
}

/// Parser for one mime type.
///
/// Parsing is synchronous and runs on the task processor's worker.
pub trait Parser: Send + Sync {
    fn parse(&self, snapshot: &Snapshot) -> Result<Arc<dyn ParseResult>>;
}

/// Creates parsers for the mime types it declares.
///
/// # Examples
///
/// ```
/// use reparse_core::document::Snapshot;
/// use reparse_core::parser::{ParseResult, Parser, ParserFactory};
/// use std::any::Any;
/// use std::sync::Arc;
///
/// struct LineCount {
///     snapshot: Snapshot,
///     lines: usize,
/// }
///
/// impl ParseResult for LineCount {
///     fn snapshot(&self) -> &Snapshot {
///         &self.snapshot
///     }
///
///     fn as_any(&self) -> &dyn Any {
///         self
///     }
/// }
///
/// struct LineParser;
///
/// impl Parser for LineParser {
///     fn parse(&self, snapshot: &Snapshot) -> reparse_core::Result<Arc<dyn ParseResult>> {
///         Ok(Arc::new(LineCount {
///             snapshot: snapshot.clone(),
///             lines: snapshot.text.lines().count(),
///         }))
///     }
/// }
///
/// struct LineParserFactory;
///
/// impl ParserFactory for LineParserFactory {
///     fn id(&self) -> &'static str {
///         "lines"
///     }
///
///     fn mime_types(&self) -> &[&'static str] {
///         &["text/plain"]
///     }
///
///     fn create_parser(&self) -> Arc<dyn Parser> {
///         Arc::new(LineParser)
///     }
/// }
/// ```
pub trait ParserFactory: Send + Sync {
    /// Unique identifier, used in logs.
    fn id(&self) -> &'static str;

    /// Mime types this factory handles.
    fn mime_types(&self) -> &[&'static str];

    fn create_parser(&self) -> Arc<dyn Parser>;
}
