//! Runs session tasks from the command line.

use {
    crate::{
        Cli, CliError, config::Config, get_port, resolve_family, serial_config, use_fancy_output,
        was_interrupted,
    },
    anyhow::{Result, bail},
    console::style,
    holuxlog::{
        DeviceFamily, DeviceInfo, EngineConfig, NativeConnector, Session, SessionEvent, Task,
        TaskOutput,
    },
    indicatif::{ProgressBar, ProgressStyle},
    log::debug,
    std::{
        sync::{
            Arc,
            mpsc::{Receiver, RecvTimeoutError},
        },
        time::Duration,
    },
};

/// How often the event loop checks for Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A connected logger.
pub(crate) struct Logger {
    session: Session,
    events: Receiver<SessionEvent>,
    family: DeviceFamily,
}

/// Engine settings from CLI, then config, then defaults.
pub(crate) fn engine_config(cli: &Cli, config: &Config) -> EngineConfig {
    let mut engine = EngineConfig::default();
    if let Some(ms) = cli.timeout.or(config.session.response_timeout_ms) {
        engine.response_timeout = Duration::from_millis(ms);
    }
    if let Some(chunk) = config.session.chunk_size.filter(|&c| c > 0) {
        engine.chunk_size = chunk;
    }
    engine
}

/// Progress bar on stderr, hidden in quiet or non-TTY mode.
pub(crate) fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

impl Logger {
    /// Select a port, open a session and run the connect sequence.
    pub(crate) fn connect(cli: &Cli, config: &mut Config) -> Result<(Self, DeviceInfo)> {
        let family = resolve_family(cli, config)?;
        let port = get_port(cli, config)?;
        let serial = serial_config(cli, config, family, port);

        if !cli.quiet {
            eprintln!("{} Using {serial} ({family})", style("🔌").cyan());
        }

        let (session, events) = Session::new(
            family,
            serial,
            engine_config(cli, config),
            Arc::new(NativeConnector),
        )?;
        let logger = Self {
            session,
            events,
            family,
        };

        if !cli.quiet {
            eprintln!("{} Waiting for the logger...", style("⏳").yellow());
        }
        match logger.run(Task::Connect, None)? {
            TaskOutput::Connected(info) => {
                if !cli.quiet {
                    eprintln!("{} Connected", style("✓").green());
                }
                Ok((logger, info))
            },
            other => bail!("connect finished with unexpected result: {}", other.kind()),
        }
    }

    /// Logger family of this session.
    pub(crate) fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Run `task` and wait for its outcome.
    ///
    /// Ctrl-C closes the port and returns a cancellation error.
    pub(crate) fn run(&self, task: Task, progress: Option<&ProgressBar>) -> Result<TaskOutput> {
        let kind = task.kind();
        if !self.session.execute_task(task) {
            return Err(holuxlog::Error::Busy(format!(
                "'{kind}' cannot run while the session is {}",
                self.session.state()
            ))
            .into());
        }

        loop {
            if was_interrupted() {
                self.session.close();
                return Err(CliError::Cancelled("interrupted".to_string()).into());
            }

            match self.events.recv_timeout(POLL_INTERVAL) {
                Ok(SessionEvent::StateChanged { state, task }) => {
                    debug!("Session state: {state} (task: {task:?})");
                },
                Ok(SessionEvent::TaskStarted(started)) => debug!("Started '{started}'"),
                Ok(SessionEvent::TaskProgress { current, total, .. }) => {
                    if let Some(pb) = progress {
                        if total > 0 {
                            pb.set_position(current * 100 / total);
                        }
                        pb.set_message(format!("{current}/{total} bytes"));
                    }
                },
                Ok(SessionEvent::TaskSucceeded(output)) if output.kind() == kind => {
                    return Ok(output);
                },
                Ok(SessionEvent::TaskFailed { task, cause }) if task == kind => {
                    return Err(CliError::Device(format!("{task} failed: {cause}")).into());
                },
                Ok(other) => debug!("Ignoring {other:?}"),
                Err(RecvTimeoutError::Timeout) => {},
                Err(RecvTimeoutError::Disconnected) => bail!("session ended unexpectedly"),
            }
        }
    }

    /// Leave USB mode and close the port.
    pub(crate) fn disconnect(self) -> Result<()> {
        if self.session.state().is_connected() {
            self.run(Task::Disconnect, None)?;
        }
        Ok(())
    }
}
