//! peerpull CLI library.
//!
//! Exposes the command definitions so integration tests can drive the
//! command tree directly.

pub mod commands;
