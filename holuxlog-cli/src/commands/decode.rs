//! Offline decoding of a saved flash dump.

use {
    crate::{
        Cli,
        config::Config,
        export::{ExportFormat, render},
        resolve_family, resolve_format,
    },
    anyhow::{Context, Result},
    console::style,
    holuxlog::{DeviceFamily, ParsedLog, RecordMethod, parse_log},
    log::info,
    std::{fs, path::Path},
};

/// One-line summary of a decoded log.
pub(crate) fn summary(log: &ParsedLog) -> String {
    format!(
        "{} tracks, {} points, {} POIs ({} sectors, {} skipped, {} abandoned)",
        log.tracks.iter().filter(|t| !t.is_empty()).count(),
        log.record_count(),
        log.pois.len(),
        log.stats.sectors,
        log.stats.skipped_sectors,
        log.stats.abandoned_sectors,
    )
}

/// Auto-log criteria in effect at the end of the log.
pub(crate) fn settings_line(log: &ParsedLog) -> Option<String> {
    let settings = log.settings?;
    let method = match settings.record_method {
        RecordMethod::Overlap => "overwrite when full",
        RecordMethod::StopWhenFull => "stop when full",
    };
    Some(format!(
        "logging every {:.1} s / {:.1} m / {:.1} km/h, {method}",
        f64::from(settings.by_seconds) / 10.0,
        f64::from(settings.by_distance) / 10.0,
        f64::from(settings.by_speed) / 10.0,
    ))
}

/// Write `text` to `output`, or stdout when no file is given.
pub(crate) fn write_output(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{text}");
            Ok(())
        },
    }
}

/// Decode `dump` for `family` and render it.
pub(crate) fn decode_file(
    dump: &Path,
    family: DeviceFamily,
    format: ExportFormat,
) -> Result<(ParsedLog, String)> {
    let data = fs::read(dump).with_context(|| format!("Failed to read {}", dump.display()))?;
    info!("Decoding {} bytes as {family}", data.len());
    let log = parse_log(family.layout(), &data);
    let name = dump
        .file_stem()
        .map_or_else(|| family.to_string(), |s| s.to_string_lossy().into_owned());
    let text = render(&log, format, &name)?;
    Ok((log, text))
}

/// Decode command implementation.
pub(crate) fn cmd_decode(
    cli: &Cli,
    config: &Config,
    dump: &Path,
    output: Option<&Path>,
    format: Option<ExportFormat>,
) -> Result<()> {
    let family = resolve_family(cli, config)?;
    let format = resolve_format(format, config)?;

    let (log, text) = decode_file(dump, family, format)?;
    write_output(&text, output)?;

    if !cli.quiet {
        eprintln!("{} {}", style("✓").green(), summary(&log));
        if let Some(line) = settings_line(&log) {
            eprintln!("  {}", style(line).dim());
        }
        if let Some(path) = output {
            eprintln!("  Saved to {}", style(path.display()).yellow());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use holuxlog::LogSettings;

    #[test]
    fn test_decode_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = decode_file(
            &dir.path().join("missing.bin"),
            DeviceFamily::HoluxM241,
            ExportFormat::Gpx,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("Failed to read"));
    }

    #[test]
    fn test_decode_empty_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();

        let (log, text) = decode_file(&path, DeviceFamily::HoluxM241, ExportFormat::Gpx).unwrap();
        assert_eq!(log.record_count(), 0);
        assert!(text.contains("<name>empty</name>"));
        assert!(summary(&log).starts_with("0 tracks, 0 points, 0 POIs"));
        assert_eq!(settings_line(&log), None);
    }

    #[test]
    fn test_settings_line() {
        let log = ParsedLog {
            settings: Some(LogSettings {
                format: 0x3,
                record_size: 7,
                mode: 0x0106,
                record_method: RecordMethod::StopWhenFull,
                by_seconds: 50,
                by_distance: 0,
                by_speed: 125,
            }),
            ..Default::default()
        };
        assert_eq!(
            settings_line(&log).as_deref(),
            Some("logging every 5.0 s / 0.0 m / 12.5 km/h, stop when full")
        );
    }
}
