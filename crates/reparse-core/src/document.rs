//! Editable text buffers and the immutable snapshots parsers work on.

use crate::source::SourceId;
use parking_lot::RwLock;
use std::sync::Arc;

/// Editable text buffer for one open file.
///
/// Writers replace or splice text and bump the version; readers copy the
/// text out into a [`Snapshot`]. The lock is never held across an await.
///
/// # Examples
///
/// ```
/// use reparse_core::document::Document;
///
/// let doc = Document::new("fn main() {}");
/// assert_eq!(doc.version(), 0);
///
/// doc.edit(3, 7, "start");
/// assert_eq!(doc.text(), "fn start() {}");
/// assert_eq!(doc.version(), 1);
/// ```
#[derive(Debug, Default)]
pub struct Document {
    inner: RwLock<DocumentInner>,
}

#[derive(Debug, Default)]
struct DocumentInner {
    text: String,
    version: u64,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            inner: RwLock::new(DocumentInner {
                text: text.into(),
                version: 0,
            }),
        }
    }

    /// Returns a copy of the current text.
    pub fn text(&self) -> String {
        self.inner.read().text.clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn len(&self) -> usize {
        self.inner.read().text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().text.is_empty()
    }

    /// Replaces the whole buffer.
    pub fn replace(&self, text: impl Into<String>) {
        let mut inner = self.inner.write();
        inner.text = text.into();
        inner.version += 1;
    }

    /// Replaces the byte range `start..end` with `insert`.
    ///
    /// Offsets are clamped to the buffer and snapped back to the nearest
    /// char boundary, so an out-of-range edit degrades to an append.
    pub fn edit(&self, start: usize, end: usize, insert: &str) {
        let mut inner = self.inner.write();
        let start = floor_char_boundary(&inner.text, start);
        let end = floor_char_boundary(&inner.text, end.max(start));
        inner.text.replace_range(start..end, insert);
        inner.version += 1;
    }

    /// Copies the current state into an immutable snapshot.
    pub fn snapshot(&self, source: SourceId, mime_type: &str) -> Snapshot {
        let inner = self.inner.read();
        Snapshot {
            source,
            mime_type: mime_type.to_string(),
            text: Arc::from(inner.text.as_str()),
            version: inner.version,
        }
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Immutable view of a document at one version.
///
/// Cloning is cheap; the text is shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub source: SourceId,
    pub mime_type: String,
    pub text: Arc<str>,
    pub version: u64,
}
