//! # Error Handling
//!
//! Error types shared by every bootstrap component. Component calls return
//! [`BootstrapError`]; the orchestrator wraps the first failure with the stage
//! it aborted.

pub mod types;

pub use types::{BootstrapError, ErrorKind, Result};
