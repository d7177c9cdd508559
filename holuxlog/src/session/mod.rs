//! Logger session: lifecycle state machine and command/response engine.
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "native")]
//! # fn main() -> holuxlog::Result<()> {
//! use holuxlog::port::{NativeConnector, SerialConfig};
//! use holuxlog::session::{EngineConfig, Session, SessionEvent, Task};
//! use holuxlog::target::DeviceFamily;
//! use std::sync::Arc;
//!
//! let family = DeviceFamily::HoluxM241;
//! let serial = SerialConfig::new("/dev/ttyUSB0", family.default_baud());
//! let (session, events) = Session::new(
//!     family,
//!     serial,
//!     EngineConfig::default(),
//!     Arc::new(NativeConnector),
//! )?;
//!
//! session.execute_task(Task::Connect);
//! for event in events.iter() {
//!     match event {
//!         SessionEvent::TaskSucceeded(output) => println!("{output:?}"),
//!         SessionEvent::TaskFailed { cause, .. } => eprintln!("{cause}"),
//!         _ => continue,
//!     }
//!     break;
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "native"))]
//! # fn main() {}
//! ```

pub mod engine;
pub mod job;
pub mod state;
pub mod task;
pub mod timer;
pub mod transport;

pub use engine::{EngineConfig, Session};
pub use job::{DEFAULT_RESPONSE_TIMEOUT, Job, JobKind};
pub use state::SessionState;
pub use task::{DeviceInfo, FailCause, SessionEvent, Task, TaskKind, TaskOutput, UploadedLog};
pub use transport::{Connector, LineSink, Transport};
