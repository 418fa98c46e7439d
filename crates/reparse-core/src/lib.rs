//! Core abstractions for reparse-control.
//!
//! This crate provides the vocabulary shared by the runtime and by anything
//! plugging into it (parsers, scheduler tasks, schedulers).
//!
//! # Architecture
//!
//! reparse-core defines:
//! - **Sources**: `SourceId` handles, `SourceFlags` invalidation state
//! - **Documents**: editable `Document` buffers and immutable `Snapshot`s
//! - **Parsers**: `Parser`, `ParseResult`, `ParserFactory` and the
//!   mime-keyed `ParserRegistry`
//! - **Tasks**: `SchedulerTask` with priorities and reschedule policies
//! - **Configuration**: `ParsingConfig` and runtime `ReparseDelays`
//! - **Error Types**: `ReparseError`

pub mod config;
pub mod document;
pub mod error;
pub mod parser;
pub mod parser_registry;
pub mod scheduler;
pub mod source;
pub mod task;

// Re-export commonly used types
pub use config::{PLAIN_TEXT, ParsingConfig, ReparseDelays};
pub use document::{Document, Snapshot};
pub use error::{ReparseError, Result};
pub use parser::{ParseResult, Parser, ParserFactory};
pub use parser_registry::ParserRegistry;
pub use scheduler::{Scheduler, SchedulerControl};
pub use source::{ModificationRegion, SourceFlags, SourceId};
pub use task::{CancelReason, ReschedulePolicy, SchedulerTask, same_task};
