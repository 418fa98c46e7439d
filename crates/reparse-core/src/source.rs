use bitflags::bitflags;
use std::fmt;

/// Non-owning handle to a source tracked by the source table.
///
/// Listener tables and scheduler notifications carry `SourceId`s instead of
/// references, so nothing outside the table keeps a source alive. A stale id
/// simply fails to resolve once the source has been disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl SourceId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

bitflags! {
    /// Invalidation state of a source.
    ///
    /// Flags are only read and written through the owning source's flag
    /// lock, so a test-and-clear is a single critical section.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SourceFlags: u8 {
        /// Content changed since the last snapshot.
        const INVALID = 0b0001;
        /// A modification is in flight; tasks must not start yet.
        const CHANGE_EXPECTED = 0b0010;
        /// Finished tasks run again on the next reset.
        const RESCHEDULE_FINISHED_TASKS = 0b0100;
    }
}

/// Character range touched by the last modification.
///
/// `None` on the source means the whole document should be treated as
/// modified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModificationRegion {
    pub start: usize,
    pub end: usize,
}

impl ModificationRegion {
    /// Builds a region from raw editor offsets.
    ///
    /// Negative offsets mean the editor does not know the range; the result
    /// is `None`. Reversed offsets are normalized.
    ///
    /// # Examples
    ///
    /// ```
    /// use reparse_core::source::ModificationRegion;
    ///
    /// assert_eq!(
    ///     ModificationRegion::from_offsets(4, 2),
    ///     Some(ModificationRegion { start: 2, end: 4 })
    /// );
    /// assert_eq!(ModificationRegion::from_offsets(-1, 3), None);
    /// ```
    pub fn from_offsets(start: i64, end: i64) -> Option<Self> {
        let start = usize::try_from(start).ok()?;
        let end = usize::try_from(end).ok()?;
        Some(Self {
            start: start.min(end),
            end: start.max(end),
        })
    }
}
