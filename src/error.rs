//! # Error Types
//!
//! Error handling for the packet engine.
//!
//! Every fallible engine operation returns [`Result`], whose error side is
//! [`EngineError`]. Packet-level errors stay recoverable: the caller drops the
//! offending packet (or buffer) and carries on.
//!
//! ## Error Categories
//! - **Registry**: unknown packet types, duplicate or malformed declarations
//! - **Codec**: corrupt buffers and payloads that do not match their layout
//! - **Pool**: releases of buffers this pool never leased
//! - **Watchdog**: lifecycle misuse and stop requests that outlive the grace period
//! - **Identity**: host identity queries that could not be answered
//!
//! ## Example Usage
//! ```rust
//! use packet_engine::error::{EngineError, Result};
//! use tracing::warn;
//!
//! fn checked_len(data: &[u8]) -> Result<usize> {
//!     if data.len() < 4 {
//!         return Err(EngineError::Corrupt("short header".into()));
//!     }
//!     Ok(data.len())
//! }
//!
//! if let Err(e) = checked_len(&[1, 2]) {
//!     warn!(error = %e, "Dropping packet");
//! }
//! ```

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Static error messages, borrowed instead of allocated on error paths.
pub mod constants {
    /// Decode errors
    pub const ERR_SHORT_HEADER: &str = "Buffer shorter than packet header";
    pub const ERR_LENGTH_MISMATCH: &str = "Header body length disagrees with buffer length";
    pub const ERR_PREFIX_OVERRUN: &str = "Length prefix exceeds remaining bytes";
    pub const ERR_TRUNCATED_SCALAR: &str = "Scalar field truncated";
    pub const ERR_TRAILING_BYTES: &str = "Trailing bytes after last field";

    /// Pool errors
    pub const ERR_FOREIGN_BUFFER: &str = "Buffer was leased from a different pool";
    pub const ERR_NOT_LEASED: &str = "Buffer is not currently leased";

    /// Identity errors
    pub const ERR_NO_MACHINE_ID: &str = "No machine id source available";
    pub const ERR_NO_OS_BUILD: &str = "No OS build source available";
}

/// Primary error type for all engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Packet type {0:#06x} is not registered")]
    NotFound(u16),

    #[error("Corrupt packet: {0}")]
    Corrupt(String),

    #[error("Packet type {type_id:#06x} expects {expected} fields, got {found}")]
    FieldCount {
        type_id: u16,
        expected: usize,
        found: usize,
    },

    #[error("Packet type {type_id:#06x} field {index}: expected {expected}, got {found}")]
    FieldMismatch {
        type_id: u16,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Packet type {type_id:#06x} field {index}: {len} bytes exceeds maximum {max}")]
    OversizedField {
        type_id: u16,
        index: usize,
        len: usize,
        max: usize,
    },

    #[error("Packet type {0:#06x} registered twice")]
    DuplicateType(u16),

    #[error("Invalid packet descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid release of buffer {buffer_id}: {reason}")]
    InvalidRelease { buffer_id: u64, reason: &'static str },

    #[error("Watchdog did not stop within {0:?}")]
    WatchdogStall(Duration),

    #[error("Watchdog already started")]
    AlreadyStarted,

    #[error("Identity unavailable: {0}")]
    IdentityUnavailable(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl EngineError {
    /// True for errors that only invalidate a single packet or buffer.
    pub fn is_packet_level(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound(_)
                | EngineError::Corrupt(_)
                | EngineError::FieldCount { .. }
                | EngineError::FieldMismatch { .. }
                | EngineError::OversizedField { .. }
        )
    }
}

/// Type alias for Results using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
