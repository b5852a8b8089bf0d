//! Command execution engine
//!
//! This module runs command sequences, streams their output and wraps
//! execution in a per-resource lock.

pub mod coordinator;
pub mod executor;
pub mod sink;

// Re-export main types
pub use coordinator::*;
pub use executor::*;
pub use sink::*;
