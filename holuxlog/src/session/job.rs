//! Outbound jobs and their reply handlers.
//!
//! A job is one command written to the device. When it expects a reply it
//! becomes the session's outstanding job until a frame whose data field
//! starts with [`Job::expected`] arrives or its response timer fires. The
//! remainder of the matched data field (prefix and one comma stripped) is
//! passed to [`Job::handle`].

use crate::protocol::bytes::hex_to_bytes;
use crate::protocol::command::{self, parse_hex_u32};
use crate::session::state::SessionState;
use crate::session::task::DeviceInfo;
use log::{debug, warn};
use std::time::Duration;

/// Default time to wait for a reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// What a job's reply handler does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Vendor handshake; moves the session to `Handshaken`.
    Handshake,
    /// Firmware release query.
    QueryFirmware,
    /// Format register query.
    QueryLogFormat,
    /// Next write address query. With `read_log` the reply starts the
    /// chunk reads covering the whole log; each chunk queues the next one.
    QueryNextWriteAddress {
        /// Schedule log reads.
        read_log: bool,
    },
    /// Switch into USB mode; moves the session to `UsbMode`.
    EnterUsbMode,
    /// Leave USB mode.
    ExitUsbMode,
    /// One chunk of flash.
    ReadLogChunk {
        /// Flash offset.
        offset: u32,
        /// Bytes requested.
        len: u32,
    },
    /// Raw command; the reply is handed back as is.
    Debug,
}

/// One outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Short description for logs.
    pub description: String,
    /// Data field, without framing.
    pub command: String,
    /// Reply prefix to wait for.
    pub expected: Option<String>,
    /// Completing this job completes the task.
    pub last_in_batch: bool,
    /// Response timeout.
    pub timeout: Duration,
    /// Reply handler.
    pub kind: JobKind,
}

impl Job {
    /// Create a job that is not the last of its batch.
    pub fn new(
        description: impl Into<String>,
        command: impl Into<String>,
        expected: Option<String>,
        kind: JobKind,
        timeout: Duration,
    ) -> Self {
        Self {
            description: description.into(),
            command: command.into(),
            expected,
            last_in_batch: false,
            timeout,
            kind,
        }
    }

    /// Mark the job as the last of its batch.
    #[must_use]
    pub fn last_in_batch(mut self) -> Self {
        self.last_in_batch = true;
        self
    }

    /// Handle the remainder of a matched reply.
    ///
    /// Returns `false` when the reply is unusable.
    pub(crate) fn handle(&self, remainder: Option<&str>, ctx: &mut JobContext<'_>) -> bool {
        match self.kind {
            JobKind::Handshake => {
                ctx.new_state = Some(SessionState::Handshaken);
                true
            },
            JobKind::QueryFirmware => match remainder {
                Some(release) => {
                    debug!("Firmware release: {release}");
                    ctx.scratch.info.firmware = Some(release.to_string());
                    true
                },
                None => false,
            },
            JobKind::QueryLogFormat => match first_hex_field(remainder) {
                Some(format) => {
                    debug!("Log format: 0x{format:08X}");
                    ctx.scratch.info.log_format = Some(format);
                    true
                },
                None => false,
            },
            JobKind::QueryNextWriteAddress { read_log } => {
                let Some(address) = first_hex_field(remainder) else {
                    return false;
                };
                if address > ctx.flash_size {
                    warn!(
                        "Next write address 0x{address:08X} is past the end of flash (0x{:08X})",
                        ctx.flash_size
                    );
                    return false;
                }
                debug!("Next write address: 0x{address:08X}");
                ctx.scratch.info.next_write_address = Some(address);
                if read_log {
                    ctx.start_reads(address);
                }
                true
            },
            JobKind::EnterUsbMode => {
                ctx.new_state = Some(SessionState::UsbMode);
                true
            },
            JobKind::ExitUsbMode => {
                ctx.new_state = Some(SessionState::Handshaken);
                true
            },
            JobKind::ReadLogChunk { offset, len } => {
                let Some(payload) = remainder else {
                    return false;
                };
                let mut data = match hex_to_bytes(payload.trim()) {
                    Ok(data) if !data.is_empty() => data,
                    Ok(_) => return false,
                    Err(e) => {
                        warn!("Chunk at 0x{offset:08X} is not valid hex: {e}");
                        return false;
                    },
                };
                data.truncate(len as usize);
                ctx.scratch.data.extend_from_slice(&data);
                ctx.progress = Some((
                    ctx.scratch.data.len() as u64,
                    u64::from(ctx.scratch.expected_len),
                ));
                ctx.queue_read(offset.saturating_add(len));
                true
            },
            JobKind::Debug => {
                ctx.scratch.reply = remainder.map(str::to_string);
                true
            },
        }
    }
}

fn first_hex_field(remainder: Option<&str>) -> Option<u32> {
    parse_hex_u32(remainder?.split(',').next()?)
}

/// Data a task accumulates across its jobs.
#[derive(Debug, Clone, Default)]
pub(crate) struct TaskScratch {
    pub info: DeviceInfo,
    pub data: Vec<u8>,
    pub expected_len: u32,
    pub reply: Option<String>,
}

/// Effects of a reply handler, applied by the engine afterwards.
pub(crate) struct JobContext<'a> {
    pub scratch: &'a mut TaskScratch,
    pub chunk_size: u32,
    pub flash_size: u32,
    pub timeout: Duration,
    pub new_state: Option<SessionState>,
    pub follow_up: Vec<Job>,
    pub finish_task: bool,
    pub progress: Option<(u64, u64)>,
}

impl<'a> JobContext<'a> {
    pub fn new(
        scratch: &'a mut TaskScratch,
        chunk_size: u32,
        flash_size: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            scratch,
            chunk_size,
            flash_size,
            timeout,
            new_state: None,
            follow_up: Vec::new(),
            finish_task: false,
            progress: None,
        }
    }

    /// Begin reading `0..end`. `end` has already been checked against the
    /// flash size.
    fn start_reads(&mut self, end: u32) {
        self.scratch.expected_len = end;
        self.scratch.data.clear();
        self.scratch.data.reserve(end as usize);
        if end == 0 {
            debug!("Log is empty");
            self.finish_task = true;
            return;
        }

        debug!(
            "Reading {end} bytes in {} chunks",
            end.div_ceil(self.chunk_size.max(1))
        );
        self.queue_read(0);
        self.progress = Some((0, u64::from(end)));
    }

    /// Queue the chunk read starting at `offset`, if any is left.
    fn queue_read(&mut self, offset: u32) {
        let end = self.scratch.expected_len;
        if offset >= end {
            return;
        }
        let len = self.chunk_size.max(1).min(end - offset);
        let mut job = Job::new(
            format!("read log at 0x{offset:08X}"),
            command::read_log(offset, len),
            Some(command::read_log_response(offset)),
            JobKind::ReadLogChunk { offset, len },
            self.timeout,
        );
        job.last_in_batch = offset + len == end;
        self.follow_up.push(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(kind: JobKind) -> Job {
        Job::new("test", "X", Some("Y".into()), kind, DEFAULT_RESPONSE_TIMEOUT)
    }

    fn context(scratch: &mut TaskScratch) -> JobContext<'_> {
        JobContext::new(scratch, 0x400, 0x20_0000, DEFAULT_RESPONSE_TIMEOUT)
    }

    #[test]
    fn test_handshake_sets_state() {
        let mut scratch = TaskScratch::default();
        let mut ctx = context(&mut scratch);
        assert!(job(JobKind::Handshake).handle(None, &mut ctx));
        assert_eq!(ctx.new_state, Some(SessionState::Handshaken));
    }

    #[test]
    fn test_firmware_requires_value() {
        let mut scratch = TaskScratch::default();
        let mut ctx = context(&mut scratch);
        assert!(!job(JobKind::QueryFirmware).handle(None, &mut ctx));
        assert!(job(JobKind::QueryFirmware).handle(Some("1.13"), &mut ctx));
        assert_eq!(scratch.info.firmware.as_deref(), Some("1.13"));
    }

    #[test]
    fn test_log_format_must_be_hex() {
        let mut scratch = TaskScratch::default();
        let mut ctx = context(&mut scratch);
        assert!(!job(JobKind::QueryLogFormat).handle(Some("XYZ"), &mut ctx));
        assert!(job(JobKind::QueryLogFormat).handle(Some("0000003F"), &mut ctx));
        assert_eq!(scratch.info.log_format, Some(0x3F));
    }

    #[test]
    fn test_next_write_address_reads_one_chunk_at_a_time() {
        let mut scratch = TaskScratch::default();
        let mut ctx = context(&mut scratch);
        let kind = JobKind::QueryNextWriteAddress { read_log: true };
        assert!(job(kind).handle(Some("00000900"), &mut ctx));
        assert_eq!(ctx.progress, Some((0, 0x900)));
        assert!(!ctx.finish_task);

        let mut commands = Vec::new();
        let mut next = ctx.follow_up;
        while let Some(read) = next.pop() {
            assert!(next.is_empty());
            commands.push(read.command.clone());
            let JobKind::ReadLogChunk { len, .. } = read.kind else {
                panic!("unexpected job {read:?}");
            };
            let mut ctx = context(&mut scratch);
            assert!(read.handle(Some("00".repeat(len as usize).as_str()), &mut ctx));
            if read.last_in_batch {
                assert!(ctx.follow_up.is_empty());
                assert_eq!(read.expected.as_deref(), Some("PMTK182,8,00000800"));
            }
            next = ctx.follow_up;
        }
        assert_eq!(
            commands,
            [
                "PMTK182,7,00000000,00000400",
                "PMTK182,7,00000400,00000400",
                "PMTK182,7,00000800,00000100",
            ]
        );
        assert_eq!(scratch.data.len(), 0x900);
    }

    #[test]
    fn test_next_write_address_past_flash_end_is_rejected() {
        let mut scratch = TaskScratch::default();
        let mut ctx = context(&mut scratch);
        let kind = JobKind::QueryNextWriteAddress { read_log: true };
        assert!(!job(kind).handle(Some("FFFFFFFF"), &mut ctx));
        assert!(ctx.follow_up.is_empty());
        assert!(ctx.scratch.data.capacity() < 0x1000);

        let mut ctx = context(&mut scratch);
        assert!(job(kind).handle(Some("00200000"), &mut ctx));
        assert_eq!(ctx.follow_up.len(), 1);
    }

    #[test]
    fn test_empty_log_finishes_task() {
        let mut scratch = TaskScratch::default();
        let mut ctx = context(&mut scratch);
        let kind = JobKind::QueryNextWriteAddress { read_log: true };
        assert!(job(kind).handle(Some("00000000"), &mut ctx));
        assert!(ctx.follow_up.is_empty());
        assert!(ctx.finish_task);
    }

    #[test]
    fn test_read_chunk_appends_payload() {
        let mut scratch = TaskScratch {
            expected_len: 4,
            ..Default::default()
        };
        let mut ctx = context(&mut scratch);
        let kind = JobKind::ReadLogChunk { offset: 0, len: 4 };
        assert!(job(kind).handle(Some("DEADBEEF"), &mut ctx));
        assert!(!job(kind).handle(Some("NOTHEX"), &mut ctx));
        assert!(!job(kind).handle(None, &mut ctx));
        assert_eq!(ctx.progress, Some((4, 4)));
        assert_eq!(scratch.data, [0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_debug_keeps_reply() {
        let mut scratch = TaskScratch::default();
        let mut ctx = context(&mut scratch);
        assert!(job(JobKind::Debug).handle(Some("1,2"), &mut ctx));
        assert_eq!(scratch.reply.as_deref(), Some("1,2"));
    }
}
