//! Track download command implementation.

use {
    super::{
        decode::{summary, write_output},
        logger::{Logger, progress_bar},
    },
    crate::{
        Cli,
        config::Config,
        export::{ExportFormat, render},
        resolve_format,
    },
    anyhow::{Context, Result, bail},
    chrono::Local,
    console::style,
    holuxlog::{Task, TaskOutput},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Default export file name, e.g. `holux-20240131-154500.gpx`.
fn default_output(config: &Config, format: ExportFormat) -> PathBuf {
    let name = format!(
        "holux-{}.{}",
        Local::now().format("%Y%m%d-%H%M%S"),
        format.extension()
    );
    match &config.export.output_dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Upload command implementation.
pub(crate) fn cmd_upload(
    cli: &Cli,
    config: &mut Config,
    output: Option<&Path>,
    format: Option<ExportFormat>,
    raw: Option<&Path>,
) -> Result<()> {
    let format = resolve_format(format, config)?;
    let output = output.map_or_else(|| default_output(config, format), Path::to_path_buf);

    let (logger, info) = Logger::connect(cli, config)?;
    if !cli.quiet {
        if let Some(size) = info.next_write_address {
            eprintln!("{} Downloading {size} bytes", style("⬇").cyan());
        }
    }

    let pb = progress_bar(cli.quiet);
    let result = logger.run(Task::UploadTrack, Some(&pb));
    pb.finish_and_clear();
    let family = logger.family();
    let disconnected = logger.disconnect();

    let uploaded = match result? {
        TaskOutput::Track(uploaded) => uploaded,
        other => bail!("upload finished with unexpected result: {}", other.kind()),
    };
    if let Err(e) = disconnected {
        log::warn!("Disconnect failed: {e:#}");
    }

    if let Some(raw) = raw {
        fs::write(raw, &uploaded.raw)
            .with_context(|| format!("Failed to write {}", raw.display()))?;
        if !cli.quiet {
            eprintln!("  Raw dump saved to {}", style(raw.display()).yellow());
        }
    }

    if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    let text = render(&uploaded.log, format, &family.to_string())?;
    write_output(&text, Some(&output))?;

    if !cli.quiet {
        eprintln!("{} {}", style("✓").green(), summary(&uploaded.log));
        eprintln!("  Saved to {}", style(output.display()).yellow());
    }
    Ok(())
}
