//! Stagehand - run deployment command sequences under per-project locks
//!
//! Stagehand runs an ordered list of shell commands on a pseudo-terminal as
//! one unit, streams their merged output as it arrives, supports
//! cancellation from another thread, and makes sure only one sequence runs
//! against a given project at a time.

// Public modules
pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod process;
pub mod runner;

// Re-export commonly used types
pub use error::{Result, StagehandError};
pub use lock::{LockEntry, LockRegistry};
pub use runner::{CommandExecutor, Coordinator, OutputSink, SharedOutput};

/// Current version of Stagehand
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
