//! # Error Types for the Agent Kernel
//!
//! Every caller-facing error is a variant of [`Error`]. Tool failures and handler
//! failures are deliberately *not* represented here: the propagation policy treats
//! them as data (a failed [`crate::tool_invoker::ToolResponse`], a captured
//! [`crate::event::EventContext::exception`]) rather than as a `Result::Err`, so
//! they never unwind through this type.
//!
//! ## Automatic Conversions
//!
//! `#[from]` on `Io` and `Json` enables `?` to convert the handful of low-level
//! errors the kernel touches directly.

use thiserror::Error;

/// Type alias for `Result<T, Error>` used throughout the kernel.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type covering all caller-visible failure modes.
#[derive(Error, Debug)]
pub enum Error {
    /// A public operation received ill-formed input: a bad index, a slice
    /// assignment whose lengths don't match, malformed tool arguments.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced [`crate::identifier::Identifier`] does not exist in the store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// `ApplySync` was invoked from inside a handler already running on the
    /// bridge's own loop. Proceeding would deadlock; the call fails immediately
    /// instead.
    #[error("Deadlock guard triggered: {0}")]
    DeadlockGuard(String),

    /// The external LLM adapter returned an error completing or streaming a
    /// request.
    #[error("LLM adapter error: {0}")]
    Adapter(String),

    /// Invalid configuration supplied while building an `AgentConfig`.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The operation was cooperatively cancelled before completion.
    #[error("Cancelled")]
    Cancelled,

    /// Timeout waiting on a bridge call, a task join, or an external adapter.
    #[error("Operation timed out")]
    Timeout,

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Low-level I/O failure (rare at the kernel layer; mostly persistence hooks).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Miscellaneous error that doesn't fit another category. Used sparingly.
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn deadlock_guard(msg: impl Into<String>) -> Self {
        Error::DeadlockGuard(msg.into())
    }

    pub fn adapter(msg: impl Into<String>) -> Self {
        Error::Adapter(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}
