//! peerpull Core - Foundational Types
//!
//! This module provides the error and result types shared across the
//! peerpull runtime and CLI.

pub mod error;

// Re-export commonly used types
pub use error::{PullError, Result};

/// peerpull version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
