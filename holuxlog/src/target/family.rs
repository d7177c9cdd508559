//! Per-family constants.
//!
//! Families differ only in data: default baud rate, watermark text and the
//! vendor command numbers. Everything is expressed as static tables so the
//! session and the parser stay family agnostic.

use crate::protocol::command;
use crate::tracklog::field::{FieldSpec, HOLUX_FIELDS};
use crate::tracklog::parser::{LogLayout, Watermark};
use std::fmt;

const WATERMARK_TAILS: &[&[u8]] = &[b"LOGGER", b"WAYPNT"];

/// Vendor command numbers of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorCommands {
    /// Tag of commands sent to the device.
    pub tag: &'static str,
    /// Tag of the device's replies.
    pub response_tag: &'static str,
    /// Handshake.
    pub handshake: u8,
    /// Switch into USB (download) mode.
    pub enter_usb_mode: u8,
    /// Leave USB mode.
    pub exit_usb_mode: u8,
}

impl VendorCommands {
    /// Data field of vendor command `n`.
    pub fn command(&self, n: u8) -> String {
        command::vendor(self.tag, n, None)
    }

    /// Prefix of the reply to vendor command `n`.
    pub fn response(&self, n: u8) -> String {
        command::vendor_response(self.response_tag, n)
    }
}

const HOLUX_COMMANDS: VendorCommands = VendorCommands {
    tag: "HOLUX241",
    response_tag: "HOLUX001",
    handshake: 1,
    enter_usb_mode: 2,
    exit_usb_mode: 3,
};

/// Static description of a family.
#[derive(Debug, Clone, Copy)]
pub struct FamilyProfile {
    /// Human readable model name.
    pub name: &'static str,
    /// Baud rate the logger talks at out of the box.
    pub default_baud: u32,
    /// Vendor commands.
    pub commands: VendorCommands,
    /// Size of the log flash in bytes; the next write address never exceeds it.
    pub flash_size: u32,
    /// Flash log layout.
    pub layout: LogLayout,
}

static M241: FamilyProfile = FamilyProfile {
    name: "Holux M-241",
    default_baud: 38_400,
    commands: HOLUX_COMMANDS,
    flash_size: 2 * 1024 * 1024,
    layout: LogLayout {
        fields: &HOLUX_FIELDS,
        watermark: Watermark {
            head: b"HOLUXGR241",
            tails: WATERMARK_TAILS,
        },
    },
};

static GR245: FamilyProfile = FamilyProfile {
    name: "Holux GR-245",
    default_baud: 115_200,
    commands: HOLUX_COMMANDS,
    flash_size: 4 * 1024 * 1024,
    layout: LogLayout {
        fields: &HOLUX_FIELDS,
        watermark: Watermark {
            head: b"HOLUXGR245",
            tails: WATERMARK_TAILS,
        },
    },
};

/// Supported logger families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DeviceFamily {
    /// Holux M-241.
    #[default]
    HoluxM241,
    /// Holux GR-245.
    HoluxGr245,
}

impl DeviceFamily {
    /// All families, in display order.
    pub const ALL: [Self; 2] = [Self::HoluxM241, Self::HoluxGr245];

    /// Static profile of this family.
    pub fn profile(&self) -> &'static FamilyProfile {
        match self {
            Self::HoluxM241 => &M241,
            Self::HoluxGr245 => &GR245,
        }
    }

    /// Default baud rate.
    #[must_use]
    pub fn default_baud(&self) -> u32 {
        self.profile().default_baud
    }

    /// Flash log layout.
    pub fn layout(&self) -> &'static LogLayout {
        &self.profile().layout
    }

    /// Record field table.
    pub fn fields(&self) -> &'static [FieldSpec] {
        self.profile().layout.fields
    }

    /// Vendor commands.
    pub fn commands(&self) -> &'static VendorCommands {
        &self.profile().commands
    }

    /// Parse a family from a CLI or config value.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "m241" | "holuxm241" | "gr241" => Some(Self::HoluxM241),
            "gr245" | "holuxgr245" => Some(Self::HoluxGr245),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.profile().name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(DeviceFamily::from_name("m241"), Some(DeviceFamily::HoluxM241));
        assert_eq!(DeviceFamily::from_name("M-241"), Some(DeviceFamily::HoluxM241));
        assert_eq!(DeviceFamily::from_name("gr_245"), Some(DeviceFamily::HoluxGr245));
        assert_eq!(DeviceFamily::from_name("gr999"), None);
    }

    #[test]
    fn test_default_baud() {
        assert_eq!(DeviceFamily::HoluxM241.default_baud(), 38_400);
        assert_eq!(DeviceFamily::HoluxGr245.default_baud(), 115_200);
    }

    #[test]
    fn test_flash_size() {
        assert_eq!(DeviceFamily::HoluxM241.profile().flash_size, 0x20_0000);
        assert_eq!(DeviceFamily::HoluxGr245.profile().flash_size, 0x40_0000);
    }

    #[test]
    fn test_vendor_commands() {
        let cmds = DeviceFamily::HoluxM241.commands();
        assert_eq!(cmds.command(cmds.handshake), "HOLUX241,1");
        assert_eq!(cmds.response(cmds.enter_usb_mode), "HOLUX001,2");
    }

    #[test]
    fn test_watermarks_differ() {
        let m241 = DeviceFamily::HoluxM241.layout().watermark;
        let gr245 = DeviceFamily::HoluxGr245.layout().watermark;
        assert_eq!(m241.match_len(b"HOLUXGR241LOGGER", 0), Some(16));
        assert_eq!(gr245.match_len(b"HOLUXGR241LOGGER", 0), None);
        assert_eq!(gr245.match_len(b"HOLUXGR245WAYPNT ", 0), Some(17));
    }

    #[test]
    fn test_display() {
        assert_eq!(DeviceFamily::HoluxGr245.to_string(), "Holux GR-245");
    }
}
