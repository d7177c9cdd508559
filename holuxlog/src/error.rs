//! Error types for holuxlog.

use std::io;
use thiserror::Error;

/// Result type for holuxlog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for holuxlog operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed sentence received from the device.
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Invalid hex payload.
    #[error("Invalid hex data: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Device not found on any port.
    #[error("Device not found")]
    DeviceNotFound,

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A task is already running on the session.
    #[error("Session busy: {0}")]
    Busy(String),

    /// Unsupported device or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reasons a received line is rejected by the sentence decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than the minimum number of characters.
    #[error("sentence too short ({0} chars)")]
    TooShort(usize),

    /// Line does not start with `$`.
    #[error("sentence does not start with '$'")]
    BadPrefix,

    /// Line does not end with `*` and two hex digits.
    #[error("sentence has no '*HH' checksum suffix")]
    BadSuffix,

    /// Checksum digits do not match the data field.
    #[error("checksum mismatch: expected {expected:02X}, got {actual:02X}")]
    ChecksumMismatch {
        /// Checksum carried by the sentence.
        expected: u8,
        /// Checksum computed over the data field.
        actual: u8,
    },
}
