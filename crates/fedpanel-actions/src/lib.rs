//! Turning validated operation requests into supervised processes.
//!
//! [`CommandBuilder`] resolves a request against the [`ActionCatalog`] and the
//! detected [`SystemMode`], [`AsyncExecutor`] runs the resulting descriptor,
//! and [`HistoryManager`] keeps what can be undone.

pub mod builder;
pub mod catalog;
pub mod executor;
pub mod history;
pub mod mode;

pub use builder::CommandBuilder;
pub use catalog::{ActionCatalog, ActionSpec, UndoTemplate};
pub use executor::{preview, AsyncExecutor, CommandRunner, ExecutorSettings};
pub use history::{HistoryEntry, HistoryManager};
pub use mode::{InitSystem, PackageBackend, SystemMode, SystemModeCache, SystemModeDetector};
