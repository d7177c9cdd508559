//! Device lifecycle states.

use std::fmt;

/// Lifecycle state of a logger session.
///
/// ```text
/// Idle -> SerialPortOpening -> SerialPortOpened -> Handshaken -> UsbMode
///   ^                                                              |
///   +---------------------- Disconnect / fatal error --------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SessionState {
    /// No port open.
    #[default]
    Idle,
    /// Port is being opened.
    SerialPortOpening,
    /// Port open, worker running.
    SerialPortOpened,
    /// Device answered the handshake.
    Handshaken,
    /// Device is in USB (download) mode.
    UsbMode,
}

impl SessionState {
    /// Whether a port is open and the worker is running.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::SerialPortOpened | Self::Handshaken | Self::UsbMode)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::SerialPortOpening => "opening port",
            Self::SerialPortOpened => "port open",
            Self::Handshaken => "handshaken",
            Self::UsbMode => "USB mode",
        };
        f.write_str(s)
    }
}
