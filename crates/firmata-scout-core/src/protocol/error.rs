//! Protocol errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while connecting to or talking with a Firmata board
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The port is not listed by the OS
    #[error("Port not available: {0}")]
    PortUnavailable(String),

    /// The port is listed but could not be opened
    #[error("Failed to open {port}: {reason}")]
    TransportOpenFailed {
        /// Port that refused to open
        port: String,
        /// OS error text
        reason: String,
    },

    /// A read, write or control-line change failed on an open port
    #[error("Serial I/O failed: {0}")]
    TransportIoFailed(String),

    /// The board never sent a version report
    #[error("No Firmata version report after {polls} polls")]
    HandshakeTimeout {
        /// Poll ticks spent waiting
        polls: u32,
    },

    /// Every attempt on a port failed
    #[error("Gave up on {port} after {attempts} attempts (last error: {last})")]
    AttemptsExhausted {
        /// Port that was tried
        port: String,
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last: Box<ProtocolError>,
    },

    /// The session was already closed
    #[error("Not connected to a Firmata device")]
    NotConnected,

    /// Pin number outside the range of the message
    #[error("Pin {pin} out of range (max {max})")]
    InvalidPin {
        /// Requested pin
        pin: u8,
        /// Highest legal pin
        max: u8,
    },

    /// Value does not fit the message
    #[error("Value {value} out of range (max {max})")]
    ValueOutOfRange {
        /// Requested value
        value: u16,
        /// Highest legal value
        max: u16,
    },

    /// Profile name not in the registry
    #[error("Unknown reset profile: {0}")]
    UnknownProfile(String),

    /// Settings that fail validation or cannot be read
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system error while loading or saving settings
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Coarse error classification reported per port by a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// See [`ProtocolError::PortUnavailable`]
    PortUnavailable,
    /// See [`ProtocolError::TransportOpenFailed`]
    TransportOpenFailed,
    /// Serial I/O failure
    TransportIoFailed,
    /// Port open but no version report
    HandshakeTimeout,
    /// See [`ProtocolError::AttemptsExhausted`]
    AttemptsExhausted,
    /// Anything else
    Other,
}

impl ProtocolError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::PortUnavailable(_) => ErrorKind::PortUnavailable,
            ProtocolError::TransportOpenFailed { .. } => ErrorKind::TransportOpenFailed,
            ProtocolError::TransportIoFailed(_) | ProtocolError::IoError(_) => {
                ErrorKind::TransportIoFailed
            }
            ProtocolError::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            ProtocolError::AttemptsExhausted { .. } => ErrorKind::AttemptsExhausted,
            _ => ErrorKind::Other,
        }
    }

    /// The error that ended the final attempt, looking through `AttemptsExhausted`
    pub fn root_kind(&self) -> ErrorKind {
        match self {
            ProtocolError::AttemptsExhausted { last, .. } => last.root_kind(),
            other => other.kind(),
        }
    }

    /// True for failures that only mean "no Firmata device answered here"
    pub fn is_not_firmata(&self) -> bool {
        matches!(self.root_kind(), ErrorKind::HandshakeTimeout)
    }
}
