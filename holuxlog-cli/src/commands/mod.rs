//! Command implementations.
//!
//! Each subcommand is implemented in its own module; [`logger`] holds the
//! session driver shared by the commands that talk to a device.

pub(crate) mod completions;
pub(crate) mod debug;
pub(crate) mod decode;
pub(crate) mod info;
pub(crate) mod list_ports;
pub(crate) mod logger;
pub(crate) mod upload;
