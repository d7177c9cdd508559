//! Device info command implementation.

use {
    super::logger::Logger,
    crate::{Cli, config::Config},
    anyhow::Result,
    console::style,
    holuxlog::{DeviceInfo, tracklog::field_names},
};

fn format_info(info: &DeviceInfo) -> Vec<(&'static str, String)> {
    let unknown = || "unknown".to_string();
    vec![
        ("Device", info.family.to_string()),
        ("Firmware", info.firmware.clone().unwrap_or_else(unknown)),
        (
            "Log format",
            info.log_format
                .map_or_else(unknown, |f| format!("0x{f:08X}")),
        ),
        (
            "Log fields",
            info.log_format.map_or_else(unknown, |f| {
                field_names(info.family.fields(), f).join(", ")
            }),
        ),
        (
            "Log size",
            info.next_write_address
                .map_or_else(unknown, |a| format!("{a} bytes (0x{a:08X})")),
        ),
    ]
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &mut Config, json: bool) -> Result<()> {
    let (logger, info) = Logger::connect(cli, config)?;
    logger.disconnect()?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": info,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for (label, value) in format_info(&info) {
        println!("{:>12}: {}", style(label).bold(), value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use holuxlog::DeviceFamily;

    #[test]
    fn test_format_info() {
        let info = DeviceInfo {
            family: DeviceFamily::HoluxM241,
            firmware: Some("1.13".to_string()),
            log_format: Some(0x0000_003F),
            next_write_address: None,
        };
        let lines = format_info(&info);
        assert_eq!(lines[1], ("Firmware", "1.13".to_string()));
        assert_eq!(lines[2], ("Log format", "0x0000003F".to_string()));
        assert_eq!(
            lines[3],
            ("Log fields", "UTC, VALID, LATITUDE, LONGITUDE, HEIGHT, SPEED".to_string())
        );
        assert_eq!(lines[4], ("Log size", "unknown".to_string()));
    }
}
