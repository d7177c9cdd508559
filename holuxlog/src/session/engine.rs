//! Session engine.
//!
//! All mutable session state lives in one `Mutex<Inner>` paired with a
//! `Condvar`. Three kinds of threads touch it:
//!
//! ```text
//!  UI thread            reader thread          timer thread
//!  execute_task()       LineSink::push_bytes   ResponseTimer fires
//!      |                      |                      |
//!      v                      v                      v
//!  outbound FIFO  <----+  inbound FIFO (Line)   inbound FIFO (Timeout)
//!                      |      |
//!                      |      v
//!                      +-- worker thread: drain inbound, then dispatch
//!                          one outbound job if none is outstanding
//! ```
//!
//! The worker never holds the state lock while writing to the transport.
//! Every open of the port bumps a generation counter; work tagged with an
//! older generation is discarded.

use crate::error::Result;
use crate::port::SerialConfig;
use crate::protocol::command::{READ_CHUNK_SIZE, strip_response};
use crate::protocol::sentence::{decode_line, encode};
use crate::session::job::{DEFAULT_RESPONSE_TIMEOUT, Job, JobContext, TaskScratch};
use crate::session::state::SessionState;
use crate::session::task::{
    FailCause, SessionEvent, Task, TaskKind, TaskOutput, UploadedLog,
};
use crate::session::timer::ResponseTimer;
use crate::session::transport::{Connector, LineSink, Transport};
use crate::target::DeviceFamily;
use crate::tracklog::parse_log;
use log::{debug, error, info, trace, warn};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::thread;
use std::time::Duration;

/// Session engine tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Time to wait for a reply to a job.
    pub response_timeout: Duration,
    /// Time to wait for the worker thread to come up after the port opened.
    pub worker_ready_timeout: Duration,
    /// Bytes requested per log read.
    pub chunk_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            worker_ready_timeout: Duration::from_secs(1),
            chunk_size: READ_CHUNK_SIZE,
        }
    }
}

enum Inbound {
    Line(String),
    Timeout(u64),
}

struct Outstanding {
    job: Job,
    seq: u64,
}

struct ActiveTask {
    task: Task,
    scratch: TaskScratch,
}

/// Job written to the transport by the worker.
struct Dispatch {
    bytes: Vec<u8>,
    seq: u64,
    description: String,
    /// Jobs without an expected reply complete as soon as they are written.
    unanswered: Option<Job>,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    generation: u64,
    running: bool,
    outbound: VecDeque<Job>,
    inbound: VecDeque<Inbound>,
    outstanding_job: Option<Outstanding>,
    outstanding_task: Option<ActiveTask>,
    next_seq: u64,
}

/// Work to do once the state lock is released.
#[derive(Default)]
struct Effects {
    close_generation: Option<u64>,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    wake: Condvar,
    transport: Mutex<Option<(u64, Box<dyn Transport>)>>,
    timer: ResponseTimer,
    events: Sender<SessionEvent>,
    family: DeviceFamily,
    serial: SerialConfig,
    config: EngineConfig,
    connector: Arc<dyn Connector>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // the UI may have stopped listening
        let _ = self.events.send(event);
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        let inner = self.lock();
        inner.generation == generation && inner.state != SessionState::Idle
    }

    pub(crate) fn receive_lines(&self, generation: u64, lines: Vec<String>) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        inner.inbound.extend(lines.into_iter().map(Inbound::Line));
        self.wake.notify_all();
    }

    fn post_timeout(&self, seq: u64) {
        let mut inner = self.lock();
        if inner.running {
            inner.inbound.push_back(Inbound::Timeout(seq));
            self.wake.notify_all();
        }
    }

    fn set_state(&self, inner: &mut Inner, state: SessionState) {
        if inner.state == state {
            return;
        }
        debug!("Session state: {} -> {}", inner.state, state);
        inner.state = state;
        let task = inner.outstanding_task.as_ref().map(|t| t.task.kind());
        self.emit(SessionEvent::StateChanged { state, task });
    }

    fn cancel_pending(&self, inner: &mut Inner) {
        if !inner.outbound.is_empty() {
            debug!("Cancelling {} pending jobs", inner.outbound.len());
            inner.outbound.clear();
        }
    }

    fn reset(&self, inner: &mut Inner, fx: &mut Effects) {
        debug!("Resetting session");
        fx.close_generation = Some(inner.generation);
        inner.generation += 1;
        inner.running = false;
        inner.outbound.clear();
        inner.inbound.clear();
        inner.outstanding_job = None;
        inner.outstanding_task = None;
        self.timer.cancel();
        self.set_state(inner, SessionState::Idle);
        self.wake.notify_all();
    }

    fn apply(&self, fx: Effects) {
        if let Some(generation) = fx.close_generation {
            self.close_transport(generation);
        }
    }

    fn close_transport(&self, generation: u64) {
        let taken = {
            let mut slot = self
                .transport
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
                slot.take()
            } else {
                None
            }
        };
        if let Some((_, mut transport)) = taken {
            debug!("Closing {}", self.serial.port_name);
            transport.close();
        }
    }

    fn emit_failure(&self, inner: &mut Inner, cause: FailCause) -> Option<TaskKind> {
        let active = inner.outstanding_task.take()?;
        let task = active.task.kind();
        warn!("Task '{task}' failed: {cause}");
        self.emit(SessionEvent::TaskFailed { task, cause });
        Some(task)
    }

    fn fail_task(&self, inner: &mut Inner, cause: FailCause, fx: &mut Effects) {
        if self.emit_failure(inner, cause) == Some(TaskKind::Disconnect) {
            self.reset(inner, fx);
        }
    }

    /// Fail the task, if any, and tear the session down.
    fn abort(&self, inner: &mut Inner, cause: FailCause, fx: &mut Effects) {
        self.emit_failure(inner, cause);
        self.reset(inner, fx);
    }

    fn succeed_task(&self, inner: &mut Inner, fx: &mut Effects) {
        let Some(ActiveTask { task, mut scratch }) = inner.outstanding_task.take() else {
            return;
        };
        let kind = task.kind();
        let output = match task {
            Task::Connect => TaskOutput::Connected(scratch.info),
            Task::Disconnect => TaskOutput::Disconnected,
            Task::DebugCommand { .. } => TaskOutput::DebugReply(scratch.reply),
            Task::UploadTrack => {
                scratch.data.truncate(scratch.expected_len as usize);
                let log = parse_log(self.family.layout(), &scratch.data);
                TaskOutput::Track(Box::new(UploadedLog {
                    raw: scratch.data,
                    log,
                }))
            },
        };
        info!("Task '{kind}' finished");
        self.emit(SessionEvent::TaskSucceeded(output));
        if kind == TaskKind::Disconnect {
            self.reset(inner, fx);
        }
    }

    fn handle_inbound(&self, inner: &mut Inner, message: Inbound, fx: &mut Effects) {
        match message {
            Inbound::Line(line) => self.handle_line(inner, &line, fx),
            Inbound::Timeout(seq) => self.handle_timeout(inner, seq, fx),
        }
    }

    fn handle_line(&self, inner: &mut Inner, line: &str, fx: &mut Effects) {
        let frame = match decode_line(line) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping frame {line:?}: {e}");
                return;
            },
        };

        let remainder = inner
            .outstanding_job
            .as_ref()
            .and_then(|o| o.job.expected.as_deref())
            .and_then(|prefix| strip_response(&frame.data, prefix));
        let Some(remainder) = remainder else {
            trace!("Ignoring unrelated frame {}", frame.data);
            return;
        };
        self.timer.cancel();
        let Some(Outstanding { job, .. }) = inner.outstanding_job.take() else {
            return;
        };
        debug!("Reply to '{}': {}", job.description, frame.data);

        let mut spare = TaskScratch::default();
        let scratch = match inner.outstanding_task.as_mut() {
            Some(active) => &mut active.scratch,
            None => &mut spare,
        };
        let mut ctx = JobContext::new(
            scratch,
            self.config.chunk_size,
            self.family.profile().flash_size,
            self.config.response_timeout,
        );
        let ok = job.handle(remainder, &mut ctx);
        let JobContext {
            new_state,
            follow_up,
            finish_task,
            progress,
            ..
        } = ctx;

        if let Some(state) = new_state {
            self.set_state(inner, state);
        }
        if let (Some((current, total)), Some(active)) = (progress, &inner.outstanding_task) {
            self.emit(SessionEvent::TaskProgress {
                task: active.task.kind(),
                current,
                total,
            });
        }

        if !ok {
            error!("Unusable reply to '{}': {}", job.description, frame.data);
            self.cancel_pending(inner);
            if inner.outstanding_task.is_some() {
                self.fail_task(inner, FailCause::HandleFrameFailed, fx);
            } else {
                self.reset(inner, fx);
            }
            return;
        }

        inner.outbound.extend(follow_up);
        if finish_task || job.last_in_batch {
            self.succeed_task(inner, fx);
        }
    }

    fn handle_timeout(&self, inner: &mut Inner, seq: u64, fx: &mut Effects) {
        if !inner.outstanding_job.as_ref().is_some_and(|o| o.seq == seq) {
            trace!("Ignoring stale timeout {seq}");
            return;
        }
        if let Some(Outstanding { job, .. }) = inner.outstanding_job.take() {
            warn!("No response to '{}' within {:?}", job.description, job.timeout);
        }
        self.cancel_pending(inner);
        if inner.outstanding_task.is_some() {
            self.fail_task(inner, FailCause::NoResponse, fx);
        } else {
            self.reset(inner, fx);
        }
    }

    fn begin_dispatch(&self, inner: &mut Inner, job: Job) -> Dispatch {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        debug!("-> {} ({})", job.command, job.description);
        let bytes = encode(&job.command).into_bytes();
        let description = job.description.clone();

        if job.expected.is_some() {
            self.timer.start(seq, job.timeout);
            inner.outstanding_job = Some(Outstanding { job, seq });
            Dispatch {
                bytes,
                seq,
                description,
                unanswered: None,
            }
        } else {
            Dispatch {
                bytes,
                seq,
                description,
                unanswered: Some(job),
            }
        }
    }

    fn finish_dispatch(&self, inner: &mut Inner, dispatch: Dispatch, written: bool, fx: &mut Effects) {
        if !written {
            error!("Failed to send '{}'", dispatch.description);
            if inner
                .outstanding_job
                .as_ref()
                .is_some_and(|o| o.seq == dispatch.seq)
            {
                inner.outstanding_job = None;
                self.timer.cancel();
            }
            self.abort(inner, FailCause::SendDataFailed, fx);
            return;
        }

        let completes_task = dispatch.unanswered.is_some_and(|job| job.last_in_batch);
        if completes_task && inner.outstanding_task.is_some() {
            self.succeed_task(inner, fx);
        }
    }

    fn write(&self, generation: u64, bytes: &[u8]) -> bool {
        let mut slot = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut() {
            Some((g, transport)) if *g == generation => transport.write(bytes),
            _ => false,
        }
    }

    fn worker_loop(self: Arc<Self>, generation: u64) {
        {
            let mut inner = self.lock();
            if inner.generation != generation {
                return;
            }
            inner.running = true;
        }
        self.wake.notify_all();
        debug!("Session worker started");

        loop {
            let mut fx = Effects::default();
            let mut inner = self.lock();
            while inner.generation == generation
                && inner.inbound.is_empty()
                && (inner.outstanding_job.is_some() || inner.outbound.is_empty())
            {
                inner = self
                    .wake
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if inner.generation != generation {
                break;
            }

            while let Some(message) = inner.inbound.pop_front() {
                self.handle_inbound(&mut inner, message, &mut fx);
                if inner.generation != generation {
                    break;
                }
            }

            let dispatch = if inner.generation == generation && inner.outstanding_job.is_none() {
                inner
                    .outbound
                    .pop_front()
                    .map(|job| self.begin_dispatch(&mut inner, job))
            } else {
                None
            };
            drop(inner);
            self.apply(fx);

            let Some(dispatch) = dispatch else {
                continue;
            };
            let written = self.write(generation, &dispatch.bytes);

            let mut fx = Effects::default();
            let mut inner = self.lock();
            if inner.generation == generation {
                self.finish_dispatch(&mut inner, dispatch, written, &mut fx);
            }
            drop(inner);
            self.apply(fx);
        }
        debug!("Session worker stopped");
    }

    /// Fail with `cause` unless the session was reset in the meantime.
    fn abort_if_current(&self, generation: u64, cause: FailCause) {
        let mut fx = Effects::default();
        let mut inner = self.lock();
        if inner.generation == generation {
            self.abort(&mut inner, cause, &mut fx);
        }
        drop(inner);
        self.apply(fx);
    }

    fn open_port(self: Arc<Self>, generation: u64) {
        info!(
            "Opening {} at {} baud",
            self.serial.port_name, self.serial.baud_rate
        );
        let sink = LineSink::new(Arc::downgrade(&self), generation);
        let transport = match self.connector.open(&self.serial, sink) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to open {}: {e}", self.serial.port_name);
                self.abort_if_current(generation, FailCause::PortOpenFailed);
                return;
            },
        };
        let previous = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((generation, transport));
        if let Some((_, mut stale)) = previous {
            stale.close();
        }

        let worker = Arc::clone(&self);
        let spawned = thread::Builder::new()
            .name("holuxlog-session".into())
            .spawn(move || worker.worker_loop(generation));
        if let Err(e) = spawned {
            error!("Failed to start session worker: {e}");
            self.abort_if_current(generation, FailCause::PortOpenFailed);
            self.close_transport(generation);
            return;
        }

        let mut fx = Effects::default();
        let inner = self.lock();
        let (mut inner, _) = self
            .wake
            .wait_timeout_while(inner, self.config.worker_ready_timeout, |i| {
                i.generation == generation && !i.running
            })
            .unwrap_or_else(PoisonError::into_inner);

        if inner.generation != generation {
            drop(inner);
            self.close_transport(generation);
            return;
        }
        if inner.running {
            self.set_state(&mut inner, SessionState::SerialPortOpened);
            inner
                .outbound
                .extend(Task::Connect.jobs(self.family, &self.config));
            self.wake.notify_all();
        } else {
            error!("Session worker did not start within {:?}", self.config.worker_ready_timeout);
            self.abort(&mut inner, FailCause::PortOpenFailed, &mut fx);
        }
        drop(inner);
        self.apply(fx);
    }
}

/// A session with one logger.
///
/// Tasks are submitted with [`Session::execute_task`]; their progress and
/// outcome arrive as [`SessionEvent`]s on the receiver returned by
/// [`Session::new`]. Dropping the session closes the port.
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create an idle session.
    pub fn new(
        family: DeviceFamily,
        serial: SerialConfig,
        config: EngineConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, Receiver<SessionEvent>)> {
        let (events, receiver) = mpsc::channel();

        let slot: Arc<OnceLock<Weak<Shared>>> = Arc::new(OnceLock::new());
        let fire_slot = Arc::clone(&slot);
        let timer = ResponseTimer::spawn(move |seq| {
            if let Some(shared) = fire_slot.get().and_then(Weak::upgrade) {
                shared.post_timeout(seq);
            }
        })?;

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::default()),
            wake: Condvar::new(),
            transport: Mutex::new(None),
            timer,
            events,
            family,
            serial,
            config,
            connector,
        });
        let _ = slot.set(Arc::downgrade(&shared));

        Ok((Self { shared }, receiver))
    }

    /// Logger family.
    pub fn family(&self) -> DeviceFamily {
        self.shared.family
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Kind of the outstanding task, if any.
    pub fn current_task(&self) -> Option<TaskKind> {
        self.shared
            .lock()
            .outstanding_task
            .as_ref()
            .map(|t| t.task.kind())
    }

    /// Jobs waiting to be sent.
    pub fn pending_jobs(&self) -> usize {
        self.shared.lock().outbound.len()
    }

    /// Whether a job is waiting for its reply.
    pub fn has_outstanding_job(&self) -> bool {
        self.shared.lock().outstanding_job.is_some()
    }

    /// Start a task.
    ///
    /// Returns `false` when another task is outstanding or the task cannot
    /// run in the current state.
    pub fn execute_task(&self, task: Task) -> bool {
        let shared = &self.shared;
        let kind = task.kind();
        let mut fx = Effects::default();
        let mut inner = shared.lock();

        if let Some(active) = &inner.outstanding_task {
            warn!(
                "Rejecting '{kind}': '{}' is still running",
                active.task.kind()
            );
            return false;
        }
        if !task.precondition(inner.state) {
            warn!("Rejecting '{kind}': session is {}", inner.state);
            return false;
        }

        info!("Starting '{kind}'");
        let mut scratch = TaskScratch::default();
        scratch.info.family = shared.family;
        inner.outstanding_task = Some(ActiveTask {
            task: task.clone(),
            scratch,
        });
        shared.emit(SessionEvent::TaskStarted(kind));

        if matches!(task, Task::Connect) {
            let generation = inner.generation;
            shared.set_state(&mut inner, SessionState::SerialPortOpening);
            drop(inner);

            let opener = Arc::clone(shared);
            let spawned = thread::Builder::new()
                .name("holuxlog-open".into())
                .spawn(move || opener.open_port(generation));
            if let Err(e) = spawned {
                error!("Failed to start port opener: {e}");
                shared.abort_if_current(generation, FailCause::PortOpenFailed);
            }
            return true;
        }

        let jobs = task.jobs(shared.family, &shared.config);
        if jobs.is_empty() {
            shared.succeed_task(&mut inner, &mut fx);
        } else {
            inner.outbound.extend(jobs);
            shared.wake.notify_all();
        }
        drop(inner);
        shared.apply(fx);
        true
    }

    /// Append jobs to the outbound queue.
    pub fn enqueue_jobs(&self, jobs: impl IntoIterator<Item = Job>) {
        let mut inner = self.shared.lock();
        inner.outbound.extend(jobs);
        self.shared.wake.notify_all();
    }

    /// Drop every job that has not been sent yet.
    pub fn cancel_all_pending_jobs(&self) {
        let mut inner = self.shared.lock();
        self.shared.cancel_pending(&mut inner);
    }

    /// Close the port and return to `Idle` without talking to the device.
    pub fn close(&self) {
        let mut fx = Effects::default();
        let mut inner = self.shared.lock();
        if inner.state == SessionState::Idle {
            return;
        }
        info!("Closing session");
        self.shared.reset(&mut inner, &mut fx);
        drop(inner);
        self.shared.apply(fx);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::sentence::xor_checksum_bytes;
    use crate::session::job::JobKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

    struct MockTransport {
        sink: LineSink,
        responder: Responder,
        fail_write: bool,
        written: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl Transport for MockTransport {
        fn write(&mut self, bytes: &[u8]) -> bool {
            if self.fail_write {
                return false;
            }
            let line = String::from_utf8_lossy(bytes).into_owned();
            let frame = decode_line(&line).unwrap().unwrap();
            self.written.lock().unwrap().push(frame.data.clone());

            // noise with a bad checksum, then the replies split mid-line
            self.sink.push_bytes(b"$GPTXT,BAD*00\r\n");
            for reply in (self.responder)(&frame.data) {
                let encoded = encode(&reply);
                let (head, tail) = encoded.as_bytes().split_at(encoded.len() / 2);
                self.sink.push_bytes(head);
                self.sink.push_bytes(tail);
            }
            true
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Clone)]
    struct MockConnector {
        responder: Responder,
        fail_open: bool,
        fail_write: bool,
        written: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockConnector {
        fn new(responder: Responder) -> Self {
            Self {
                responder,
                fail_open: false,
                fail_write: false,
                written: Arc::default(),
                closed: Arc::default(),
            }
        }

        fn written(&self) -> Vec<String> {
            self.written.lock().unwrap().clone()
        }
    }

    impl Connector for MockConnector {
        fn open(&self, _config: &SerialConfig, sink: LineSink) -> Result<Box<dyn Transport>> {
            if self.fail_open {
                return Err(Error::DeviceNotFound);
            }
            self.closed.store(false, Ordering::SeqCst);
            Ok(Box::new(MockTransport {
                sink,
                responder: Arc::clone(&self.responder),
                fail_write: self.fail_write,
                written: Arc::clone(&self.written),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    /// A logger holding `memory` in its flash.
    fn logger(memory: Vec<u8>) -> Responder {
        Arc::new(move |cmd: &str| -> Vec<String> {
            match cmd {
                "HOLUX241,1" => vec!["PMTK010,002".into(), "HOLUX001,1".into()],
                "PMTK605" => vec!["PMTK705,1.13".into()],
                "PMTK182,2,2" => vec!["PMTK182,3,2,00000003".into()],
                "PMTK182,2,8" => vec![format!("PMTK182,3,8,{:08X}", memory.len())],
                "HOLUX241,2" => vec!["HOLUX001,2".into()],
                "PMTK182,2,3" => vec!["PMTK182,3,3,00000032".into()],
                _ => {
                    let Some(args) = cmd.strip_prefix("PMTK182,7,") else {
                        return Vec::new();
                    };
                    let (offset, len) = args.split_once(',').unwrap();
                    let offset = usize::from_str_radix(offset, 16).unwrap();
                    let len = usize::from_str_radix(len, 16).unwrap();
                    let end = (offset + len).min(memory.len());
                    vec![format!(
                        "PMTK182,8,{offset:08X},{}",
                        hex::encode_upper(&memory[offset..end])
                    )]
                },
            }
        })
    }

    /// One sector: three UTC+VALID records, the end marker, then padding.
    fn flash_image() -> Vec<u8> {
        let mut image = vec![0xFFu8; 0x200];
        image[0..2].copy_from_slice(&0xFFFFu16.to_le_bytes());
        image[2..6].copy_from_slice(&3u32.to_le_bytes());
        image[6..8].copy_from_slice(&0x0106u16.to_le_bytes());
        for utc in [100u32, 105, 110] {
            let mut record = utc.to_le_bytes().to_vec();
            record.extend_from_slice(&2u16.to_le_bytes());
            record.push(xor_checksum_bytes(&record, 0, record.len()));
            image.extend(record);
        }
        image.resize(0x500, 0xFF);
        image
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            response_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    fn session(connector: &MockConnector) -> (Session, Receiver<SessionEvent>) {
        Session::new(
            DeviceFamily::HoluxM241,
            SerialConfig::new("mock", 38_400),
            fast_config(),
            Arc::new(connector.clone()),
        )
        .unwrap()
    }

    /// Collect events up to and including the next task outcome.
    fn wait_done(rx: &Receiver<SessionEvent>) -> (Vec<SessionEvent>, SessionEvent) {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv_timeout(Duration::from_secs(5)).expect("session event");
            match event {
                SessionEvent::TaskSucceeded(_) | SessionEvent::TaskFailed { .. } => {
                    return (seen, event);
                },
                other => seen.push(other),
            }
        }
    }

    fn eventually(cond: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn connect(session: &Session, rx: &Receiver<SessionEvent>) {
        assert!(session.execute_task(Task::Connect));
        let (_, done) = wait_done(rx);
        assert!(matches!(done, SessionEvent::TaskSucceeded(TaskOutput::Connected(_))));
    }

    #[test]
    fn test_connect_reaches_usb_mode() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, rx) = session(&connector);

        assert!(session.execute_task(Task::Connect));
        let (events, done) = wait_done(&rx);

        let SessionEvent::TaskSucceeded(TaskOutput::Connected(info)) = done else {
            panic!("unexpected outcome {done:?}");
        };
        assert_eq!(info.family, DeviceFamily::HoluxM241);
        assert_eq!(info.firmware.as_deref(), Some("1.13"));
        assert_eq!(info.log_format, Some(3));
        assert_eq!(info.next_write_address, Some(0x500));

        let states: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { state, task } => {
                    assert_eq!(*task, Some(TaskKind::Connect));
                    Some(*state)
                },
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            [
                SessionState::SerialPortOpening,
                SessionState::SerialPortOpened,
                SessionState::Handshaken,
                SessionState::UsbMode,
            ]
        );
        assert_eq!(events[0], SessionEvent::TaskStarted(TaskKind::Connect));
        assert_eq!(session.state(), SessionState::UsbMode);
        assert_eq!(
            connector.written(),
            ["HOLUX241,1", "PMTK605", "PMTK182,2,2", "PMTK182,2,8", "HOLUX241,2"]
        );
        assert_eq!(session.current_task(), None);
    }

    #[test]
    fn test_task_rejected_while_busy_or_in_wrong_state() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, rx) = session(&connector);

        assert!(!session.execute_task(Task::UploadTrack));
        assert!(!session.execute_task(Task::Disconnect));

        assert!(session.execute_task(Task::Connect));
        assert!(!session.execute_task(Task::Connect));
        let (_, done) = wait_done(&rx);
        assert!(matches!(done, SessionEvent::TaskSucceeded(_)));

        assert!(!session.execute_task(Task::Connect));
    }

    #[test]
    fn test_handler_failure_cancels_batch() {
        let healthy = logger(flash_image());
        let connector = MockConnector::new(Arc::new(move |cmd: &str| {
            if cmd == "PMTK182,2,2" {
                vec!["PMTK182,3,2,XYZ".into()]
            } else {
                healthy(cmd)
            }
        }));
        let (session, rx) = session(&connector);

        assert!(session.execute_task(Task::Connect));
        let (_, done) = wait_done(&rx);
        assert_eq!(
            done,
            SessionEvent::TaskFailed {
                task: TaskKind::Connect,
                cause: FailCause::HandleFrameFailed,
            }
        );
        assert_eq!(session.pending_jobs(), 0);
        assert!(!session.has_outstanding_job());
        assert_eq!(session.current_task(), None);
        // the remaining two jobs were never sent
        assert_eq!(connector.written(), ["HOLUX241,1", "PMTK605", "PMTK182,2,2"]);
        assert_eq!(session.state(), SessionState::Handshaken);
    }

    #[test]
    fn test_no_response_times_out() {
        let healthy = logger(flash_image());
        let connector = MockConnector::new(Arc::new(move |cmd: &str| {
            if cmd == "PMTK605" { Vec::new() } else { healthy(cmd) }
        }));
        let (session, rx) = session(&connector);

        assert!(session.execute_task(Task::Connect));
        let (_, done) = wait_done(&rx);
        assert_eq!(
            done,
            SessionEvent::TaskFailed {
                task: TaskKind::Connect,
                cause: FailCause::NoResponse,
            }
        );
        assert!(!session.has_outstanding_job());
        assert_eq!(session.pending_jobs(), 0);
        assert_eq!(connector.written(), ["HOLUX241,1", "PMTK605"]);
    }

    /// Collect events up to and including the change to `wanted`.
    fn wait_for_state(rx: &Receiver<SessionEvent>, wanted: SessionState) -> Vec<SessionEvent> {
        let mut seen = Vec::new();
        loop {
            let event = rx.recv_timeout(Duration::from_secs(5)).expect("session event");
            let reached = matches!(event, SessionEvent::StateChanged { state, .. } if state == wanted);
            seen.push(event);
            if reached {
                return seen;
            }
        }
    }

    fn outstanding_seq(session: &Session) -> Option<u64> {
        session.shared.lock().outstanding_job.as_ref().map(|o| o.seq)
    }

    #[test]
    fn test_no_response_without_task_resets_session() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, rx) = session(&connector);
        connect(&session, &rx);

        session.enqueue_jobs([Job::new(
            "unanswered query",
            "PMTK182,2,9",
            Some("PMTK182,3,9".into()),
            JobKind::Debug,
            Duration::from_millis(100),
        )]);
        let events = wait_for_state(&rx, SessionState::Idle);

        assert!(
            !events
                .iter()
                .any(|e| matches!(e, SessionEvent::TaskFailed { .. }))
        );
        assert_eq!(
            events.last(),
            Some(&SessionEvent::StateChanged {
                state: SessionState::Idle,
                task: None,
            })
        );
        assert!(!session.has_outstanding_job());
        assert!(eventually(|| connector.closed.load(Ordering::SeqCst)));
    }

    #[test]
    fn test_handler_failure_without_task_resets_session() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, rx) = session(&connector);
        connect(&session, &rx);

        // the release string is not a hex register value
        session.enqueue_jobs([
            Job::new(
                "misread release",
                "PMTK605",
                Some("PMTK705".into()),
                JobKind::QueryLogFormat,
                DEFAULT_RESPONSE_TIMEOUT,
            ),
            Job::new(
                "never sent",
                "PMTK182,2,3",
                Some("PMTK182,3,3".into()),
                JobKind::Debug,
                DEFAULT_RESPONSE_TIMEOUT,
            ),
        ]);
        let events = wait_for_state(&rx, SessionState::Idle);

        assert!(
            !events
                .iter()
                .any(|e| matches!(e, SessionEvent::TaskFailed { .. }))
        );
        assert_eq!(session.pending_jobs(), 0);
        assert!(!session.has_outstanding_job());
        assert_eq!(connector.written().last().map(String::as_str), Some("PMTK605"));
        assert!(eventually(|| connector.closed.load(Ordering::SeqCst)));
    }

    #[test]
    fn test_stale_timeout_is_ignored() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, rx) = session(&connector);
        connect(&session, &rx);
        let answered = session.shared.lock().next_seq - 1;

        session.enqueue_jobs([Job::new(
            "slow query",
            "PMTK182,2,9",
            Some("PMTK182,3,9".into()),
            JobKind::Debug,
            Duration::from_secs(30),
        )]);
        assert!(eventually(|| outstanding_seq(&session).is_some()));
        let pending = outstanding_seq(&session);
        assert_ne!(pending, Some(answered));

        // a timeout for the job that was already answered
        session.shared.post_timeout(answered);
        assert!(eventually(|| session.shared.lock().inbound.is_empty()));
        assert_eq!(outstanding_seq(&session), pending);
        assert_eq!(session.state(), SessionState::UsbMode);
        assert!(rx.try_recv().is_err());

        // the matching timeout still applies
        if let Some(seq) = pending {
            session.shared.post_timeout(seq);
        }
        wait_for_state(&rx, SessionState::Idle);
        assert!(!session.has_outstanding_job());
    }

    #[test]
    fn test_upload_rejects_address_past_flash_end() {
        let healthy = logger(flash_image());
        let queries = Arc::new(Mutex::new(0u32));
        let connector = MockConnector::new(Arc::new(move |cmd: &str| {
            if cmd == "PMTK182,2,8" {
                let mut count = queries.lock().unwrap();
                *count += 1;
                if *count > 1 {
                    return vec!["PMTK182,3,8,FFFFFFFF".into()];
                }
            }
            healthy(cmd)
        }));
        let (session, rx) = session(&connector);
        connect(&session, &rx);

        assert!(session.execute_task(Task::UploadTrack));
        let (_, done) = wait_done(&rx);
        assert_eq!(
            done,
            SessionEvent::TaskFailed {
                task: TaskKind::UploadTrack,
                cause: FailCause::HandleFrameFailed,
            }
        );
        assert_eq!(session.pending_jobs(), 0);
        assert_eq!(connector.written().last().map(String::as_str), Some("PMTK182,2,8"));
        assert_eq!(session.state(), SessionState::UsbMode);
    }

    #[test]
    fn test_send_failure_resets_session() {
        let mut connector = MockConnector::new(logger(flash_image()));
        connector.fail_write = true;
        let (session, rx) = session(&connector);

        assert!(session.execute_task(Task::Connect));
        let (_, done) = wait_done(&rx);
        assert_eq!(
            done,
            SessionEvent::TaskFailed {
                task: TaskKind::Connect,
                cause: FailCause::SendDataFailed,
            }
        );
        assert_eq!(session.state(), SessionState::Idle);
        assert!(eventually(|| connector.closed.load(Ordering::SeqCst)));
    }

    #[test]
    fn test_port_open_failure() {
        let mut connector = MockConnector::new(logger(flash_image()));
        connector.fail_open = true;
        let (session, rx) = session(&connector);

        assert!(session.execute_task(Task::Connect));
        let (_, done) = wait_done(&rx);
        assert_eq!(
            done,
            SessionEvent::TaskFailed {
                task: TaskKind::Connect,
                cause: FailCause::PortOpenFailed,
            }
        );
        assert_eq!(session.state(), SessionState::Idle);
        // a fresh attempt is accepted
        assert!(session.execute_task(Task::Connect));
        let _ = wait_done(&rx);
    }

    #[test]
    fn test_upload_track() {
        let image = flash_image();
        let connector = MockConnector::new(logger(image.clone()));
        let (session, rx) = session(&connector);
        connect(&session, &rx);

        assert!(session.execute_task(Task::UploadTrack));
        let (events, done) = wait_done(&rx);

        let SessionEvent::TaskSucceeded(TaskOutput::Track(upload)) = done else {
            panic!("unexpected outcome {done:?}");
        };
        assert_eq!(upload.raw, image);
        assert_eq!(upload.log.tracks.len(), 1);
        assert_eq!(upload.log.record_count(), 3);
        assert_eq!(upload.log.tracks[0][2].utc, Some(110));

        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::TaskProgress { current, total, .. } => Some((*current, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, [(0, 0x500), (0x400, 0x500), (0x500, 0x500)]);

        let written = connector.written();
        assert_eq!(
            &written[written.len() - 2..],
            ["PMTK182,7,00000000,00000400", "PMTK182,7,00000400,00000100"]
        );
        assert_eq!(session.state(), SessionState::UsbMode);
    }

    #[test]
    fn test_upload_of_empty_log() {
        let connector = MockConnector::new(logger(Vec::new()));
        let (session, rx) = session(&connector);
        connect(&session, &rx);

        assert!(session.execute_task(Task::UploadTrack));
        let (_, done) = wait_done(&rx);
        let SessionEvent::TaskSucceeded(TaskOutput::Track(upload)) = done else {
            panic!("unexpected outcome {done:?}");
        };
        assert!(upload.raw.is_empty());
        assert!(upload.log.tracks.is_empty());
    }

    #[test]
    fn test_debug_command() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, rx) = session(&connector);
        connect(&session, &rx);

        assert!(session.execute_task(Task::DebugCommand {
            payload: "PMTK182,2,3".into(),
            expect: Some("PMTK182,3,3".into()),
        }));
        let (_, done) = wait_done(&rx);
        assert_eq!(
            done,
            SessionEvent::TaskSucceeded(TaskOutput::DebugReply(Some("00000032".into())))
        );

        assert!(session.execute_task(Task::DebugCommand {
            payload: "PMTK000".into(),
            expect: None,
        }));
        let (_, done) = wait_done(&rx);
        assert_eq!(done, SessionEvent::TaskSucceeded(TaskOutput::DebugReply(None)));
    }

    #[test]
    fn test_disconnect_then_reconnect() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, rx) = session(&connector);
        connect(&session, &rx);

        assert!(session.execute_task(Task::Disconnect));
        let (_, done) = wait_done(&rx);
        assert_eq!(done, SessionEvent::TaskSucceeded(TaskOutput::Disconnected));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(eventually(|| connector.closed.load(Ordering::SeqCst)));
        assert_eq!(connector.written().last().map(String::as_str), Some("HOLUX241,3"));

        connect(&session, &rx);
        assert_eq!(session.state(), SessionState::UsbMode);
    }

    #[test]
    fn test_close_returns_to_idle() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, rx) = session(&connector);
        connect(&session, &rx);

        session.close();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(connector.closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_all_pending_jobs() {
        let connector = MockConnector::new(logger(flash_image()));
        let (session, _rx) = session(&connector);
        let job = |n: u8| {
            Job::new(
                format!("job {n}"),
                format!("PMTK182,2,{n}"),
                None,
                JobKind::Debug,
                DEFAULT_RESPONSE_TIMEOUT,
            )
        };

        session.enqueue_jobs([job(1), job(2), job(3)]);
        assert_eq!(session.pending_jobs(), 3);
        session.cancel_all_pending_jobs();
        assert_eq!(session.pending_jobs(), 0);
    }
}
