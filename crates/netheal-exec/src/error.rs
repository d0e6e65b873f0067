//! Error types for device execution
//!
//! Covers:
//! - Registry lookups and registry file loading
//! - Connection failures, classified as auth / unreachable / protocol
//! - Transport I/O

use std::fmt;

/// Why a device connection could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionFailure {
    /// Credentials rejected
    Auth,
    /// Host did not answer, refused, or could not be resolved
    Unreachable,
    /// Anything else on the wire: unexpected EOF, privilege negotiation, prompt never seen
    Protocol,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth => write!(f, "auth"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Protocol => write!(f, "protocol"),
        }
    }
}

/// Main execution error type
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Name is not present in the device registry
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Connection could not be established or was lost
    #[error("connection to {device} failed ({failure}): {message}")]
    Connection {
        /// Device name
        device: String,
        /// Failure class
        failure: ConnectionFailure,
        /// Transport detail
        message: String,
    },

    /// Registry file is unreadable or inconsistent
    #[error("registry error: {0}")]
    Registry(String),

    /// Unknown device type label
    #[error("unknown device type: {0}")]
    UnknownDeviceKind(String),

    /// Local I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    /// Build a connection error
    #[inline]
    #[must_use]
    pub fn connection(
        device: impl Into<String>,
        failure: ConnectionFailure,
        message: impl Into<String>,
    ) -> Self {
        Self::Connection {
            device: device.into(),
            failure,
            message: message.into(),
        }
    }

    /// Whether this error means the device session is unusable
    #[inline]
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Io(_))
    }
}
