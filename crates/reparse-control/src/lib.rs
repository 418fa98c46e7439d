//! Source invalidation and reparse scheduling.
//!
//! Editors report mutations through a source's [`SourceControl`]. The
//! control flags the source, cancels stale work and arms one debounced
//! reset; the reset consults the source's [`SourceEnvironment`], refreshes
//! the snapshot and hands the source back to the [`TaskProcessor`].
//!
//! # Examples
//!
//! ```no_run
//! use reparse_control::ParsingState;
//! use reparse_core::ParsingConfig;
//! use std::path::Path;
//!
//! # async fn example() -> reparse_core::Result<()> {
//! let state = ParsingState::new(ParsingConfig::default())?;
//! let (source, _document) = state.open_document(Path::new("/src/Main.java"), "class Main {}");
//!
//! state.edit_document(Path::new("/src/Main.java"), 6, 10, "App")?;
//! source.control().state_changed();
//! # Ok(())
//! # }
//! ```

pub mod control;
pub mod environment;
pub mod file_environment;
#[cfg(feature = "watch")]
pub mod file_watcher;
pub mod listeners;
pub mod processor;
pub mod source;
pub mod state;

// Re-export commonly used types
pub use control::SourceControl;
pub use environment::{
    EnvironmentContext, EnvironmentFactory, EnvironmentSupport, SourceEnvironment,
};
pub use file_environment::{
    FileEnvironment, FileEnvironmentFactory, InteractiveSession, OpenDocuments,
};
#[cfg(feature = "watch")]
pub use file_watcher::FileWatcher;
pub use listeners::{FileEvent, FileEventKind, ListenerRegistry};
pub use processor::TaskProcessor;
pub use source::{Source, SourceTable};
pub use state::ParsingState;
