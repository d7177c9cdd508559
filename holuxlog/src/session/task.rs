//! User-facing operations and the events a session reports.

use crate::protocol::command::{self, register};
use crate::session::engine::EngineConfig;
use crate::session::job::{Job, JobKind};
use crate::session::state::SessionState;
use crate::target::DeviceFamily;
use crate::tracklog::ParsedLog;
use std::fmt;

/// Kind of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum TaskKind {
    /// Open the port and handshake.
    Connect,
    /// Leave USB mode and close the port.
    Disconnect,
    /// Send a raw command.
    DebugCommand,
    /// Download and decode the track log.
    UploadTrack,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::DebugCommand => "debug command",
            Self::UploadTrack => "upload track",
        };
        f.write_str(s)
    }
}

/// An operation requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Open the port, handshake and switch the device into USB mode.
    Connect,
    /// Leave USB mode and close the port.
    Disconnect,
    /// Send `payload` and optionally wait for a reply starting with `expect`.
    DebugCommand {
        /// Data field to send.
        payload: String,
        /// Reply prefix to wait for.
        expect: Option<String>,
    },
    /// Download the complete log and decode it.
    UploadTrack,
}

impl Task {
    /// Kind of this task.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Connect => TaskKind::Connect,
            Self::Disconnect => TaskKind::Disconnect,
            Self::DebugCommand { .. } => TaskKind::DebugCommand,
            Self::UploadTrack => TaskKind::UploadTrack,
        }
    }

    /// Whether the task may start in `state`.
    pub fn precondition(&self, state: SessionState) -> bool {
        match self {
            Self::Connect => state == SessionState::Idle,
            Self::Disconnect | Self::DebugCommand { .. } => state.is_connected(),
            Self::UploadTrack => state == SessionState::UsbMode,
        }
    }

    /// Jobs the task enqueues once the port is open.
    pub(crate) fn jobs(&self, family: DeviceFamily, config: &EngineConfig) -> Vec<Job> {
        let cmds = family.commands();
        let timeout = config.response_timeout;
        match self {
            Self::Connect => vec![
                Job::new(
                    "handshake",
                    cmds.command(cmds.handshake),
                    Some(cmds.response(cmds.handshake)),
                    JobKind::Handshake,
                    timeout,
                ),
                Job::new(
                    "query firmware release",
                    command::QUERY_RELEASE,
                    Some(command::RELEASE_RESPONSE.to_string()),
                    JobKind::QueryFirmware,
                    timeout,
                ),
                Job::new(
                    "query log format",
                    command::query_register(register::LOG_FORMAT),
                    Some(command::register_response(register::LOG_FORMAT)),
                    JobKind::QueryLogFormat,
                    timeout,
                ),
                Job::new(
                    "query next write address",
                    command::query_register(register::NEXT_WRITE_ADDRESS),
                    Some(command::register_response(register::NEXT_WRITE_ADDRESS)),
                    JobKind::QueryNextWriteAddress { read_log: false },
                    timeout,
                ),
                Job::new(
                    "enter USB mode",
                    cmds.command(cmds.enter_usb_mode),
                    Some(cmds.response(cmds.enter_usb_mode)),
                    JobKind::EnterUsbMode,
                    timeout,
                )
                .last_in_batch(),
            ],
            Self::Disconnect => vec![
                Job::new(
                    "leave USB mode",
                    cmds.command(cmds.exit_usb_mode),
                    None,
                    JobKind::ExitUsbMode,
                    timeout,
                )
                .last_in_batch(),
            ],
            Self::DebugCommand { payload, expect } => vec![
                Job::new(
                    "debug command",
                    payload.clone(),
                    expect.clone(),
                    JobKind::Debug,
                    timeout,
                )
                .last_in_batch(),
            ],
            Self::UploadTrack => vec![Job::new(
                "query log size",
                command::query_register(register::NEXT_WRITE_ADDRESS),
                Some(command::register_response(register::NEXT_WRITE_ADDRESS)),
                JobKind::QueryNextWriteAddress { read_log: true },
                timeout,
            )],
        }
    }
}

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum FailCause {
    /// A matched reply could not be handled.
    HandleFrameFailed,
    /// The device did not answer in time.
    NoResponse,
    /// Writing to the port failed.
    SendDataFailed,
    /// The port could not be opened.
    PortOpenFailed,
}

impl fmt::Display for FailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HandleFrameFailed => "unexpected reply from device",
            Self::NoResponse => "device did not respond",
            Self::SendDataFailed => "failed to send data to device",
            Self::PortOpenFailed => "failed to open serial port",
        };
        f.write_str(s)
    }
}

/// Device state collected by the connect sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceInfo {
    /// Logger family.
    pub family: DeviceFamily,
    /// Firmware release string.
    pub firmware: Option<String>,
    /// Format register.
    pub log_format: Option<u32>,
    /// Flash address of the next record, i.e. the amount of logged data.
    pub next_write_address: Option<u32>,
}

/// Downloaded log.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UploadedLog {
    /// Raw flash content.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub raw: Vec<u8>,
    /// Decoded tracks.
    pub log: ParsedLog,
}

/// Result of a successful task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    /// Connected.
    Connected(DeviceInfo),
    /// Disconnected.
    Disconnected,
    /// Reply remainder of a debug command, if a reply was expected.
    DebugReply(Option<String>),
    /// Downloaded and decoded log.
    Track(Box<UploadedLog>),
}

impl TaskOutput {
    /// Kind of the task that produced this output.
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Connected(_) => TaskKind::Connect,
            Self::Disconnected => TaskKind::Disconnect,
            Self::DebugReply(_) => TaskKind::DebugCommand,
            Self::Track(_) => TaskKind::UploadTrack,
        }
    }
}

/// Notification delivered to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session state changed.
    StateChanged {
        /// New state.
        state: SessionState,
        /// Outstanding task, if any.
        task: Option<TaskKind>,
    },
    /// A task was accepted.
    TaskStarted(TaskKind),
    /// Progress of a long running task.
    TaskProgress {
        /// Task.
        task: TaskKind,
        /// Units done.
        current: u64,
        /// Units total.
        total: u64,
    },
    /// A task finished successfully.
    TaskSucceeded(TaskOutput),
    /// A task failed.
    TaskFailed {
        /// Task.
        task: TaskKind,
        /// Cause.
        cause: FailCause,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preconditions() {
        assert!(Task::Connect.precondition(SessionState::Idle));
        assert!(!Task::Connect.precondition(SessionState::Handshaken));
        assert!(!Task::Disconnect.precondition(SessionState::Idle));
        assert!(!Task::Disconnect.precondition(SessionState::SerialPortOpening));
        assert!(Task::Disconnect.precondition(SessionState::SerialPortOpened));
        assert!(!Task::UploadTrack.precondition(SessionState::Handshaken));
        assert!(Task::UploadTrack.precondition(SessionState::UsbMode));
    }

    #[test]
    fn test_connect_batch() {
        let jobs = Task::Connect.jobs(DeviceFamily::HoluxM241, &EngineConfig::default());
        let commands: Vec<_> = jobs.iter().map(|j| j.command.as_str()).collect();
        assert_eq!(
            commands,
            ["HOLUX241,1", "PMTK605", "PMTK182,2,2", "PMTK182,2,8", "HOLUX241,2"]
        );
        assert!(jobs.iter().all(|j| j.expected.is_some()));
        assert_eq!(jobs.iter().filter(|j| j.last_in_batch).count(), 1);
        assert!(jobs[4].last_in_batch);
    }

    #[test]
    fn test_disconnect_expects_no_reply() {
        let jobs = Task::Disconnect.jobs(DeviceFamily::HoluxGr245, &EngineConfig::default());
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].command, "HOLUX241,3");
        assert_eq!(jobs[0].expected, None);
        assert!(jobs[0].last_in_batch);
    }
}
