//! Decoded waypoint records.

use crate::tracklog::parser::LogSettings;
use chrono::{DateTime, Utc};

/// Maximum number of satellites a record can describe.
pub const MAX_SATELLITES: usize = 32;

/// Record reason bits (RCR field).
pub mod reason {
    /// Logged by the time criterion.
    pub const TIME: u16 = 1 << 0;
    /// Logged by the speed criterion.
    pub const SPEED: u16 = 1 << 1;
    /// Logged by the distance criterion.
    pub const DISTANCE: u16 = 1 << 2;
    /// Logged by pressing the POI button.
    pub const BUTTON: u16 = 1 << 3;
}

/// Fix validity bits (VALID field).
pub mod validity {
    /// No fix.
    pub const NO_FIX: u16 = 0x0001;
    /// Standard GPS fix.
    pub const SPS: u16 = 0x0002;
    /// Differential fix.
    pub const DGPS: u16 = 0x0004;
    /// Estimated (dead reckoning).
    pub const ESTIMATED: u16 = 0x0040;
}

/// One satellite entry of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SatInfo {
    /// PRN.
    pub id: u8,
    /// Used in the fix.
    pub used: bool,
    /// Elevation in degrees.
    pub elevation: i16,
    /// Azimuth in degrees.
    pub azimuth: u16,
    /// Signal to noise ratio in dB.
    pub snr: u16,
}

/// One decoded fix.
///
/// Fields the record format did not carry stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LogRecord {
    /// Seconds since the Unix epoch, UTC.
    pub utc: Option<u32>,
    /// Fix validity bitmask.
    pub valid: Option<u16>,
    /// Latitude in degrees, north positive.
    pub latitude: Option<f64>,
    /// Longitude in degrees, east positive.
    pub longitude: Option<f64>,
    /// Height in meters.
    pub height: Option<f64>,
    /// Speed in km/h.
    pub speed: Option<f64>,
    /// Heading in degrees.
    pub heading: Option<f64>,
    /// DGPS station id.
    pub dgps_station: Option<u16>,
    /// DGPS data age in seconds.
    pub dgps_age: Option<f64>,
    /// Position dilution of precision ×100.
    pub pdop: Option<u16>,
    /// Horizontal dilution of precision ×100.
    pub hdop: Option<u16>,
    /// Vertical dilution of precision ×100.
    pub vdop: Option<u16>,
    /// Satellites in view.
    pub sats_in_view: Option<u8>,
    /// Satellites used in the fix.
    pub sats_in_use: Option<u8>,
    /// Per-satellite details.
    pub satellites: Vec<SatInfo>,
    /// Record reason bitmask.
    pub reason: Option<u16>,
    /// Milliseconds part of the timestamp.
    pub millisecond: Option<u16>,
    /// Distance in meters.
    pub distance: Option<f64>,
}

impl LogRecord {
    /// Timestamp including milliseconds, if the record has one.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        let secs = i64::from(self.utc?);
        let nanos = u32::from(self.millisecond.unwrap_or(0).min(999)) * 1_000_000;
        DateTime::from_timestamp(secs, nanos)
    }

    /// Whether the record was logged with the POI button.
    pub fn is_poi(&self) -> bool {
        self.reason.is_some_and(|r| r & reason::BUTTON != 0)
    }

    /// Whether the record carries a usable position.
    pub fn has_position(&self) -> bool {
        self.latitude.is_some()
            && self.longitude.is_some()
            && self.valid.is_none_or(|v| v & validity::NO_FIX == 0)
    }
}

/// Records of one continuous logging span.
pub type Track = Vec<LogRecord>;

/// Result of decoding a complete dump.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ParsedLog {
    /// Tracks in log order.
    pub tracks: Vec<Track>,
    /// Records logged with the POI button (also present in `tracks`).
    pub pois: Vec<LogRecord>,
    /// Decoder statistics.
    pub stats: ParseStats,
    /// Logger settings in effect at the end of the last decoded sector.
    pub settings: Option<LogSettings>,
}

impl ParsedLog {
    /// Total number of decoded records.
    pub fn record_count(&self) -> usize {
        self.tracks.iter().map(Vec::len).sum()
    }
}

/// Counters collected while scanning a dump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ParseStats {
    /// Sectors visited.
    pub sectors: usize,
    /// Sectors skipped because of an invalid header.
    pub skipped_sectors: usize,
    /// Sectors abandoned after undecodable content.
    pub abandoned_sectors: usize,
    /// Dynamic setting tokens applied.
    pub settings: usize,
    /// Watermarks skipped.
    pub watermarks: usize,
}
