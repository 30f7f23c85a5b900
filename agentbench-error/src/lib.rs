//! # agentbench-error
//!
//! Unified error handling for agentbench.
//!
//! ## Design Philosophy
//!
//! - **ErrorKind**: Know what error occurred (e.g., UnknownTool, Transport)
//! - **ErrorStatus**: Decide how to handle it (Permanent, Temporary, Persistent)
//! - **Error Context**: Assist in locating the cause with rich context
//! - **Error Source**: Wrap underlying errors without leaking raw types
//!
//! ## Usage
//!
//! ```rust
//! use agentbench_error::{Error, ErrorKind};
//!
//! fn example() -> Result<(), Error> {
//!     Err(Error::new(ErrorKind::UnknownTool, "Unknown tool name: shell")
//!         .with_operation("registry::dispatch")
//!         .with_context("tool", "shell")
//!         .with_context("call_id", "call_0"))
//! }
//! ```
//!
//! ## Principles
//!
//! - All functions return `Result<T, agentbench_error::Error>`
//! - External errors are wrapped with `set_source(err)`
//! - Same error handled once, subsequent ops only append context
//! - Don't abuse `From<OtherError>` to prevent raw error leakage

mod error;
mod kind;
mod status;

pub use error::Error;
pub use kind::ErrorKind;
pub use status::ErrorStatus;

/// Result type alias using agentbench Error
pub type Result<T, E = Error> = std::result::Result<T, E>;
