// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for the stencil harness.
//!
//! Every fatal failure of a benchmark run (device memory, mesh, markers,
//! kernel dispatch, configuration) is an [`Error`]. A verification mismatch
//! between the two variants is *not* an error: it travels inside the
//! report so timing data is never suppressed by it.

use thiserror::Error;

/// Errors produced by the harness and its device backends.
#[derive(Debug, Error)]
pub enum Error {
    /// Mesh construction or topology derivation failed.
    #[error("mesh error: {0}")]
    Mesh(String),
    /// Device memory could not be reserved.
    #[error("device allocation of {requested_bytes} bytes failed: {reason}")]
    Allocation {
        /// Size of the rejected request.
        requested_bytes: u64,
        /// Backend-specific cause.
        reason: String,
    },
    /// Stream, copy, readback or dispatch failure on the device.
    #[error("device error: {0}")]
    Device(String),
    /// Timing marker creation, recording, synchronization or readout failed.
    #[error("timing marker error: {0}")]
    Marker(String),
    /// A kernel variant was called with the wrong arguments or before setup.
    #[error("kernel error: {0}")]
    Kernel(String),
    /// Rejected configuration value.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Two fields that must have equal length do not.
    #[error("shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch {
        /// Length required by the operation.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;
