//! Raw command sentence implementation.

use {
    super::logger::Logger,
    crate::{Cli, CliError, config::Config},
    anyhow::{Result, bail},
    console::style,
    holuxlog::{Task, TaskOutput},
};

/// Debug command implementation.
pub(crate) fn cmd_debug(
    cli: &Cli,
    config: &mut Config,
    command: &str,
    expect: Option<&str>,
) -> Result<()> {
    let payload = command.trim().trim_start_matches('$');
    if payload.is_empty() || payload.contains(['*', '\r', '\n']) {
        return Err(CliError::Usage(format!(
            "'{command}' is not a sentence data field (leave out '$' and the checksum)"
        ))
        .into());
    }

    let (logger, _) = Logger::connect(cli, config)?;
    let result = logger.run(
        Task::DebugCommand {
            payload: payload.to_string(),
            expect: expect.map(str::to_string),
        },
        None,
    );
    let disconnected = logger.disconnect();

    match result? {
        TaskOutput::DebugReply(Some(reply)) => println!("{reply}"),
        TaskOutput::DebugReply(None) => {
            if !cli.quiet {
                eprintln!("{} Sent {payload}", style("✓").green());
            }
        },
        other => bail!("debug command finished with unexpected result: {}", other.kind()),
    }
    disconnected
}
