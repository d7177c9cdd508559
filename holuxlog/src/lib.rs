//! # holuxlog
//!
//! A library for talking to Holux GPS data loggers and decoding their
//! track logs.
//!
//! This crate provides:
//!
//! - NMEA-style `$...*HH` sentence framing with XOR checksums
//! - A threaded command/response session engine (connect, debug
//!   commands, log upload, disconnect)
//! - A decoder for the binary flash dump (sectors, dynamic settings,
//!   record checksums, POIs)
//! - Serial port discovery with USB bridge classification
//!
//! ## Supported Devices
//!
//! - Holux M-241
//! - Holux GR-245
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use holuxlog::{DeviceFamily, parse_log};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dump = std::fs::read("m241.bin")?;
//!     let log = parse_log(DeviceFamily::HoluxM241.layout(), &dump);
//!     for (i, track) in log.tracks.iter().enumerate() {
//!         println!("track {i}: {} points", track.len());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod port;
pub mod protocol;
pub mod session;
pub mod target;
pub mod tracklog;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativeConnector, NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind, detect_ports, select_port},
    error::{Error, FrameError, Result},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{Frame, LineAssembler, decode_line, encode},
    session::{
        DeviceInfo, EngineConfig, FailCause, Session, SessionEvent, SessionState, Task, TaskKind,
        TaskOutput, UploadedLog,
    },
    target::DeviceFamily,
    tracklog::{LogRecord, LogSettings, ParseStats, ParsedLog, RecordMethod, Track, parse_log},
};
