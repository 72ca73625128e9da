//! Shared domain types for Traceval.
//!
//! Everything the other crates agree on lives here: the error enum, the
//! configuration tree, chat message and tool-call types, token usage, and
//! the trace record that the pipeline reads and writes.

pub mod chat;
pub mod config;
pub mod error;
pub mod trace;

pub use error::{Error, Result};
