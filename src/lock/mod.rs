//! Resource locking
//!
//! This module keeps track of which resources (usually projects) are busy,
//! so that only one deployment runs against each of them at a time.

pub mod registry;

// Re-export main types
pub use registry::*;
