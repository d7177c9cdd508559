//! Port listing command implementation.

use {
    anyhow::Result,
    console::style,
    holuxlog::device::{DetectedPort, detect_ports, select_port},
};

fn port_json(p: &DetectedPort) -> serde_json::Value {
    serde_json::json!({
        "name": p.name,
        "device": p.device.name(),
        "known": p.device.is_known(),
        "vid": p.vid,
        "pid": p.pid,
        "manufacturer": p.manufacturer,
        "product": p.product,
        "serial": p.serial,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = detect_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected.iter().map(port_json).collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports:").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &detected {
        let device_type = if port.device.is_known() {
            format!(" [{}]", style(port.device.name()).yellow())
        } else {
            String::new()
        };
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{device_type}{vid_pid}{product}",
            style("•").green(),
            style(&port.name).cyan(),
        );
    }

    if let Some(best) = select_port(&detected) {
        eprintln!(
            "\n{} Auto-detected: {}",
            style("→").green().bold(),
            style(&best.name).cyan().bold()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use holuxlog::device::DeviceKind;

    #[test]
    fn test_port_json_fields() {
        let port = DetectedPort {
            name: "/dev/ttyACM0".to_string(),
            device: DeviceKind::MediaTek,
            vid: Some(0x0E8D),
            pid: Some(0x3329),
            manufacturer: Some("MediaTek Inc".to_string()),
            product: None,
            serial: None,
        };
        let value = port_json(&port);
        assert_eq!(value["name"], "/dev/ttyACM0");
        assert_eq!(value["device"], "MediaTek GPS");
        assert_eq!(value["known"], true);
        assert_eq!(value["vid"], 0x0E8D);
        assert!(value["product"].is_null());
    }
}
