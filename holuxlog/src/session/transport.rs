//! Byte transport seam between the session and a physical port.
//!
//! ```text
//!            write(bytes) -> bool
//! Session ---------------------------> Transport ---> device
//!    ^                                                  |
//!    |        LineSink::push_bytes(raw)                 |
//!    +------------- reader (owned by the transport) <---+
//! ```

use crate::error::Result;
use crate::port::SerialConfig;
use crate::protocol::sentence::LineAssembler;
use crate::session::engine::Shared;
use log::trace;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// An open connection to a device.
pub trait Transport: Send {
    /// Write `bytes` completely. Returns `false` on failure.
    fn write(&mut self, bytes: &[u8]) -> bool;

    /// Close the connection and stop delivering received data.
    fn close(&mut self);
}

/// Opens transports.
pub trait Connector: Send + Sync {
    /// Open a connection with `config`; received bytes go to `sink`.
    fn open(&self, config: &SerialConfig, sink: LineSink) -> Result<Box<dyn Transport>>;
}

/// Receives raw bytes from a transport and feeds complete lines to the
/// session that opened it.
///
/// Bytes pushed after the session was reset are dropped.
#[derive(Clone)]
pub struct LineSink {
    session: Weak<Shared>,
    generation: u64,
    assembler: Arc<Mutex<LineAssembler>>,
}

impl LineSink {
    pub(crate) fn new(session: Weak<Shared>, generation: u64) -> Self {
        Self {
            session,
            generation,
            assembler: Arc::new(Mutex::new(LineAssembler::new())),
        }
    }

    /// Push raw bytes as read from the port.
    pub fn push_bytes(&self, bytes: &[u8]) {
        let lines = self
            .assembler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes);
        for line in &lines {
            trace!("<- {line}");
        }
        if !lines.is_empty() {
            self.push_lines(lines);
        }
    }

    /// Push already assembled lines.
    pub fn push_lines(&self, lines: Vec<String>) {
        if let Some(session) = self.session.upgrade() {
            session.receive_lines(self.generation, lines);
        }
    }

    /// Whether the session that owns this sink is gone or was reset.
    pub fn is_closed(&self) -> bool {
        self.session
            .upgrade()
            .is_none_or(|session| !session.is_current(self.generation))
    }
}
