//! Custom error types for the application.
//!
//! This module defines the primary error type, `KitError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify failures by how they propagate:
//!
//! - **`Dispatch`**: a hardware operation inside an action sequence failed.
//!   The sequence's cleanup tail has already run by the time this is returned;
//!   the poll loop logs it, resets the originating latch, and continues.
//! - **`Cancelled`**: a timed hold was interrupted by shutdown. Like
//!   `Dispatch`, the cleanup tail has already run and the latch is still
//!   reset; the loop then leaves its Running state.
//! - **`HardwareUnavailable`**: an expected device path is missing at
//!   startup. Fatal; the process exits non-zero without entering the loop.
//! - **`EndpointBind`**: the remote-access port could not be bound. Fatal at
//!   startup, same policy as `HardwareUnavailable`.
//! - **`UnknownParameter` / `TypeMismatch` / `DuplicateParameter`**: store
//!   contract violations, surfaced to the external writer (or, for
//!   duplicates, to the daemon wiring). The poll loop itself only writes
//!   values it declared, so these never originate inside a tick.
//!
//! Validation corrections are deliberately absent: an out-of-range parameter
//! is replaced with its fallback and logged, never raised as an error.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, KitError>;

/// Application error taxonomy.
#[derive(Error, Debug)]
pub enum KitError {
    /// A hardware operation failed mid-sequence; cleanup has already run.
    #[error("dispatch '{label}' failed: {source}")]
    Dispatch {
        /// Label of the action sequence that failed.
        label: &'static str,
        /// Underlying driver failure.
        #[source]
        source: anyhow::Error,
    },

    /// A timed hold was interrupted by shutdown; cleanup has already run.
    #[error("dispatch '{label}' cancelled during hold")]
    Cancelled {
        /// Label of the interrupted action sequence.
        label: &'static str,
    },

    /// A required device or sysfs path is missing at startup.
    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// The remote-access endpoint port could not be bound.
    #[error("failed to bind remote-access endpoint on port {port}: {source}")]
    EndpointBind {
        /// Requested TCP port.
        port: u16,
        /// Bind failure reported by the OS.
        #[source]
        source: std::io::Error,
    },

    /// A read or write named a parameter that was never declared.
    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    /// A write carried a value of the wrong kind for the parameter.
    #[error("parameter '{name}' expects {expected}")]
    TypeMismatch {
        /// Parameter name.
        name: String,
        /// Kind the declaration requires ("integer" or "text").
        expected: &'static str,
    },

    /// Two declarations used the same parameter name.
    #[error("duplicate parameter declaration '{0}'")]
    DuplicateParameter(String),
}
