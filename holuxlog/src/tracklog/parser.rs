//! Flash dump scanner.
//!
//! The log area is a sequence of 64 KiB sectors. Each sector starts with a
//! 0x200 byte header followed by a stream of tokens:
//!
//! ```text
//! +------------------+----------------------------------------------+
//! | header (0x200 B) | record | record | setting | watermark | ... | FF FF ..
//! +------------------+----------------------------------------------+
//!
//! header:   count u16 | format u32 | mode u16 | seconds u32 | distance u32 | speed u32 | ...
//! setting:  AA AA AA AA AA AA AA | id u8 | value u32 | BB BB BB BB
//! watermark: <head> <tail> <spaces>
//! record:   fields of the current format | xor checksum u8
//! ```
//!
//! A setting token may change the format register, and with it the record
//! size, in the middle of a sector.

use crate::protocol::bytes::{is_filled_with, matches_at, read_u16, read_u32, slice_at};
use crate::protocol::sentence::xor_checksum_bytes;
use crate::tracklog::field::{FieldSpec, decode_record, record_size};
use crate::tracklog::record::{LogRecord, ParseStats, ParsedLog, Track};
use log::{debug, error, trace, warn};

/// Size of one flash sector.
pub const SECTOR_SIZE: usize = 0x10000;

/// Size of the header at the start of every sector.
pub const SECTOR_HEADER_SIZE: usize = 0x200;

/// Declared record count of a sector that is still being written.
pub const SECTOR_NOT_FULL: u16 = 0xFFFF;

/// Logger mode words of a valid sector header.
pub const VALID_SECTOR_MODES: [u16; 2] = [0x0104, 0x0106];

/// Total size of a setting token.
pub const SETTING_TOKEN_SIZE: usize = 16;

const SETTING_PREFIX: [u8; 7] = [0xAA; 7];
const SETTING_SUFFIX: [u8; 4] = [0xBB; 4];

/// Setting ids carried by setting tokens.
pub mod setting {
    /// New format register.
    pub const FORMAT: u8 = 2;
    /// New auto-log interval.
    pub const BY_SECONDS: u8 = 3;
    /// New auto-log distance.
    pub const BY_DISTANCE: u8 = 4;
    /// New auto-log speed.
    pub const BY_SPEED: u8 = 5;
    /// New record method.
    pub const RECORD_METHOD: u8 = 6;
    /// Logger started or stopped.
    pub const LOGGER_STATE: u8 = 7;
}

/// Mode bit: stop logging when the flash is full.
const MODE_STOP_WHEN_FULL: u16 = 1 << 2;

/// Mode bit: logger running.
const MODE_LOGGING: u16 = 1 << 1;

/// Vendor text the firmware writes between records.
#[derive(Debug, Clone, Copy)]
pub struct Watermark {
    /// Fixed leading bytes.
    pub head: &'static [u8],
    /// Accepted continuations of `head`.
    pub tails: &'static [&'static [u8]],
}

impl Watermark {
    /// Length of the watermark at `offset`, trailing spaces included.
    pub fn match_len(&self, buf: &[u8], offset: usize) -> Option<usize> {
        if !matches_at(buf, offset, self.head) {
            return None;
        }
        let after_head = offset + self.head.len();
        let tail = self
            .tails
            .iter()
            .find(|tail| matches_at(buf, after_head, tail))?;
        let mut end = after_head + tail.len();
        while buf.get(end) == Some(&b' ') {
            end += 1;
        }
        Some(end - offset)
    }
}

/// Device-specific description of the log layout.
#[derive(Debug, Clone, Copy)]
pub struct LogLayout {
    /// Record field table.
    pub fields: &'static [FieldSpec],
    /// Watermark written by the firmware.
    pub watermark: Watermark,
}

/// Overlap or stop when the log is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum RecordMethod {
    /// Oldest sectors are overwritten.
    Overlap,
    /// Logging stops when the flash is full.
    StopWhenFull,
}

impl RecordMethod {
    fn from_mode(mode: u16) -> Self {
        if mode & MODE_STOP_WHEN_FULL != 0 {
            Self::StopWhenFull
        } else {
            Self::Overlap
        }
    }
}

/// Header at the start of a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorHeader {
    /// Records in the sector, [`SECTOR_NOT_FULL`] while it is being written.
    pub declared_count: u16,
    /// Format register when the sector was opened.
    pub format: u32,
    /// Logger mode word.
    pub mode: u16,
    /// Auto-log interval in tenths of a second.
    pub by_seconds: u32,
    /// Auto-log distance in tenths of a meter.
    pub by_distance: u32,
    /// Auto-log speed in tenths of km/h.
    pub by_speed: u32,
}

impl SectorHeader {
    /// Parse the header at `offset`; `None` when the buffer is too short.
    pub fn parse(buf: &[u8], offset: usize) -> Option<Self> {
        slice_at(buf, offset, SECTOR_HEADER_SIZE)?;
        Some(Self {
            declared_count: read_u16(buf, offset)?,
            format: read_u32(buf, offset + 2)?,
            mode: read_u16(buf, offset + 6)?,
            by_seconds: read_u32(buf, offset + 8)?,
            by_distance: read_u32(buf, offset + 12)?,
            by_speed: read_u32(buf, offset + 16)?,
        })
    }

    /// Whether the mode word is one the firmware writes.
    pub fn is_valid(&self) -> bool {
        VALID_SECTOR_MODES.contains(&self.mode)
    }
}

/// Logger settings in effect at the current scan position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LogSettings {
    /// Format register.
    pub format: u32,
    /// Static record size for `format`.
    pub record_size: usize,
    /// Logger mode word.
    pub mode: u16,
    /// Record method.
    pub record_method: RecordMethod,
    /// Auto-log interval in tenths of a second.
    pub by_seconds: u32,
    /// Auto-log distance in tenths of a meter.
    pub by_distance: u32,
    /// Auto-log speed in tenths of km/h.
    pub by_speed: u32,
}

impl LogSettings {
    fn from_header(header: &SectorHeader, fields: &[FieldSpec]) -> Self {
        Self {
            format: header.format,
            record_size: record_size(fields, header.format),
            mode: header.mode,
            record_method: RecordMethod::from_mode(header.mode),
            by_seconds: header.by_seconds,
            by_distance: header.by_distance,
            by_speed: header.by_speed,
        }
    }
}

/// Whether a setting token starts at `offset`.
pub fn is_setting_token(buf: &[u8], offset: usize) -> bool {
    matches_at(buf, offset, &SETTING_PREFIX) && matches_at(buf, offset + 12, &SETTING_SUFFIX)
}

/// Whether the record at `offset` carries a valid XOR checksum.
fn checksum_ok(buf: &[u8], offset: usize, size: usize) -> bool {
    if size == 0 || slice_at(buf, offset, size).is_none() {
        return false;
    }
    xor_checksum_bytes(buf, offset, size - 1) == buf[offset + size - 1]
}

/// Decodes a complete dump into tracks.
pub struct LogParser<'a> {
    layout: &'a LogLayout,
    tracks: Vec<Track>,
    current: Track,
    pois: Vec<LogRecord>,
    stats: ParseStats,
    settings: Option<LogSettings>,
}

impl<'a> LogParser<'a> {
    /// Create a parser for the given layout.
    pub fn new(layout: &'a LogLayout) -> Self {
        Self {
            layout,
            tracks: Vec::new(),
            current: Vec::new(),
            pois: Vec::new(),
            stats: ParseStats::default(),
            settings: None,
        }
    }

    /// Scan `buf` and return everything decoded.
    pub fn parse(mut self, buf: &[u8]) -> ParsedLog {
        // one more than the number of whole sectors, even for an exact multiple
        let sector_total = buf.len() / SECTOR_SIZE + 1;
        debug!(
            "Parsing {} bytes of log data ({sector_total} sectors)",
            buf.len()
        );

        for sector in 0..sector_total {
            self.stats.sectors += 1;
            self.parse_sector(buf, sector, sector_total);
        }

        self.flush_track();
        debug!(
            "Decoded {} tracks, {} POIs",
            self.tracks.len(),
            self.pois.len()
        );

        ParsedLog {
            tracks: self.tracks,
            pois: self.pois,
            stats: self.stats,
            settings: self.settings,
        }
    }

    fn parse_sector(&mut self, buf: &[u8], sector: usize, sector_total: usize) {
        let start = sector * SECTOR_SIZE;
        let Some(header) = SectorHeader::parse(buf, start) else {
            trace!("Sector {sector}: no header");
            return;
        };
        if !header.is_valid() && sector < sector_total - 1 {
            warn!(
                "Sector {sector}: invalid mode 0x{:04X}, skipping",
                header.mode
            );
            self.stats.skipped_sectors += 1;
            return;
        }

        let mut settings = LogSettings::from_header(&header, self.layout.fields);
        debug!(
            "Sector {sector}: {} records declared, format 0x{:08X}, record size {}",
            header.declared_count, settings.format, settings.record_size
        );

        let end = buf.len().min(start + SECTOR_SIZE);
        let mut offset = start + SECTOR_HEADER_SIZE;
        let mut count: u16 = 0;

        while offset < end && count < header.declared_count {
            if header.declared_count == SECTOR_NOT_FULL
                && is_filled_with(buf, offset, settings.record_size, 0xFF)
            {
                trace!("Sector {sector}: end of data at 0x{offset:X}");
                break;
            } else if is_setting_token(buf, offset) {
                self.apply_setting(buf, offset, &mut settings);
                offset += SETTING_TOKEN_SIZE;
            } else if let Some(len) = self.layout.watermark.match_len(buf, offset) {
                trace!("Watermark at 0x{offset:X} ({len} bytes)");
                self.stats.watermarks += 1;
                offset += len;
            } else if checksum_ok(buf, offset, settings.record_size) {
                match decode_record(self.layout.fields, settings.format, buf, offset) {
                    Some((record, _)) => self.push_record(record),
                    None => {
                        error!("Sector {sector}: truncated record at 0x{offset:X}");
                        self.stats.abandoned_sectors += 1;
                        break;
                    },
                }
                offset += settings.record_size;
                count += 1;
            } else {
                error!(
                    "Sector {sector}: undecodable data at 0x{offset:X}, abandoning sector"
                );
                self.stats.abandoned_sectors += 1;
                break;
            }
        }
        self.settings = Some(settings);
    }

    fn apply_setting(&mut self, buf: &[u8], offset: usize, settings: &mut LogSettings) {
        self.stats.settings += 1;
        let id = buf[offset + 7];
        let value = read_u32(buf, offset + 8).unwrap_or_default();
        let short = read_u16(buf, offset + 8).unwrap_or_default();

        match id {
            setting::FORMAT => {
                settings.format = value;
                settings.record_size = record_size(self.layout.fields, value);
                debug!(
                    "Format changed to 0x{value:08X}, record size {}",
                    settings.record_size
                );
            },
            setting::BY_SECONDS => {
                settings.by_seconds = value;
                debug!("Log interval changed to {:.1} s", f64::from(value) / 10.0);
            },
            setting::BY_DISTANCE => {
                settings.by_distance = value;
                debug!("Log distance changed to {:.1} m", f64::from(value) / 10.0);
            },
            setting::BY_SPEED => {
                settings.by_speed = value;
                debug!("Log speed changed to {:.1} km/h", f64::from(value) / 10.0);
            },
            setting::RECORD_METHOD => {
                settings.record_method = RecordMethod::from_mode(short);
                debug!("Record method changed to {:?}", settings.record_method);
            },
            setting::LOGGER_STATE => {
                settings.mode = short;
                if short & MODE_LOGGING == 0 && !self.current.is_empty() {
                    debug!("Logger stopped, closing track of {} records", self.current.len());
                    self.flush_track();
                }
            },
            _ => warn!("Unknown log setting {id} (value 0x{value:08X})"),
        }
    }

    fn push_record(&mut self, record: LogRecord) {
        if record.is_poi() {
            self.pois.push(record.clone());
        }
        self.current.push(record);
    }

    fn flush_track(&mut self) {
        if !self.current.is_empty() {
            self.tracks.push(std::mem::take(&mut self.current));
        }
    }
}

/// Decode a complete dump.
pub fn parse_log(layout: &LogLayout, buf: &[u8]) -> ParsedLog {
    LogParser::new(layout).parse(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracklog::field::{HOLUX_FIELDS, bits, mask};

    static LAYOUT: LogLayout = LogLayout {
        fields: &HOLUX_FIELDS,
        watermark: Watermark {
            head: b"HOLUXGR241",
            tails: &[b"LOGGER", b"WAYPNT"],
        },
    };

    const FMT: u32 = mask(bits::UTC) | mask(bits::VALID);

    fn sector_header(count: u16, format: u32, mode: u16) -> Vec<u8> {
        let mut sector = vec![0xFFu8; SECTOR_HEADER_SIZE];
        sector[0..2].copy_from_slice(&count.to_le_bytes());
        sector[2..6].copy_from_slice(&format.to_le_bytes());
        sector[6..8].copy_from_slice(&mode.to_le_bytes());
        sector[8..12].copy_from_slice(&50u32.to_le_bytes());
        sector[12..16].copy_from_slice(&0u32.to_le_bytes());
        sector[16..20].copy_from_slice(&0u32.to_le_bytes());
        sector
    }

    /// UTC + VALID record with a valid checksum.
    fn record(utc: u32) -> Vec<u8> {
        let mut rec = utc.to_le_bytes().to_vec();
        rec.extend_from_slice(&0x0002u16.to_le_bytes());
        rec.push(xor_checksum_bytes(&rec, 0, rec.len()));
        rec
    }

    fn setting_token(id: u8, value: u32) -> Vec<u8> {
        let mut token = SETTING_PREFIX.to_vec();
        token.push(id);
        token.extend_from_slice(&value.to_le_bytes());
        token.extend_from_slice(&SETTING_SUFFIX);
        token
    }

    fn pad_sector(mut sector: Vec<u8>) -> Vec<u8> {
        sector.resize(SECTOR_SIZE, 0xFF);
        sector
    }

    #[test]
    fn test_not_full_sector_stops_at_sentinel() {
        let mut sector = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        for _ in 0..3 {
            sector.extend_from_slice(&[0u8; 7]);
        }
        sector.extend_from_slice(&[0xFF; 7]);

        let parsed = parse_log(&LAYOUT, &sector);
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.tracks[0].len(), 3);
        assert_eq!(parsed.tracks[0][0].utc, Some(0));
        assert_eq!(parsed.stats.abandoned_sectors, 0);
        assert!(parsed.pois.is_empty());
    }

    #[test]
    fn test_declared_count_limits_records() {
        let mut sector = sector_header(2, FMT, 0x0104);
        for utc in 1..=4 {
            sector.extend(record(utc));
        }
        let parsed = parse_log(&LAYOUT, &pad_sector(sector));
        assert_eq!(parsed.record_count(), 2);
        assert_eq!(parsed.tracks[0][1].utc, Some(2));
    }

    #[test]
    fn test_logger_stop_splits_tracks() {
        let mut sector = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        sector.extend(record(10));
        sector.extend(record(11));
        sector.extend(setting_token(setting::LOGGER_STATE, 0x0104));
        sector.extend(setting_token(setting::LOGGER_STATE, 0x0106));
        sector.extend(record(20));

        let parsed = parse_log(&LAYOUT, &pad_sector(sector));
        assert_eq!(parsed.tracks.len(), 2);
        assert_eq!(parsed.tracks[0].len(), 2);
        assert_eq!(parsed.tracks[1].len(), 1);
        assert_eq!(parsed.tracks[1][0].utc, Some(20));
        assert_eq!(parsed.stats.settings, 2);
    }

    #[test]
    fn test_logger_stop_on_empty_track_does_not_add_track() {
        let mut sector = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        sector.extend(setting_token(setting::LOGGER_STATE, 0x0104));
        sector.extend(record(1));
        let parsed = parse_log(&LAYOUT, &pad_sector(sector));
        assert_eq!(parsed.tracks.len(), 1);
    }

    #[test]
    fn test_format_change_resizes_records() {
        let fmt2 = FMT | mask(bits::RCR);
        let mut sector = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        sector.extend(record(1));
        sector.extend(setting_token(setting::FORMAT, fmt2));

        let mut rec = 2u32.to_le_bytes().to_vec();
        rec.extend_from_slice(&0x0002u16.to_le_bytes());
        rec.extend_from_slice(&0x0008u16.to_le_bytes());
        rec.push(xor_checksum_bytes(&rec, 0, rec.len()));
        assert_eq!(rec.len(), record_size(&HOLUX_FIELDS, fmt2));
        sector.extend(rec);

        let parsed = parse_log(&LAYOUT, &pad_sector(sector));
        assert_eq!(parsed.record_count(), 2);
        assert_eq!(parsed.tracks[0][1].reason, Some(0x0008));
        assert_eq!(parsed.pois.len(), 1);
        assert_eq!(parsed.pois[0].utc, Some(2));
    }

    #[test]
    fn test_watermark_and_unknown_setting_are_skipped() {
        let mut sector = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        sector.extend(record(1));
        sector.extend_from_slice(b"HOLUXGR241WAYPNT   ");
        sector.extend(setting_token(42, 7));
        sector.extend(record(2));

        let parsed = parse_log(&LAYOUT, &pad_sector(sector));
        assert_eq!(parsed.record_count(), 2);
        assert_eq!(parsed.stats.watermarks, 1);
        assert_eq!(parsed.stats.settings, 1);
    }

    #[test]
    fn test_header_settings_are_reported() {
        let mut sector = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        sector.extend(record(1));
        let parsed = parse_log(&LAYOUT, &pad_sector(sector));

        let settings = parsed.settings.expect("settings");
        assert_eq!(settings.format, FMT);
        assert_eq!(settings.record_size, 7);
        assert_eq!(settings.mode, 0x0106);
        assert_eq!(settings.record_method, RecordMethod::StopWhenFull);
        assert_eq!(settings.by_seconds, 50);
        assert_eq!(settings.by_distance, 0);
    }

    #[test]
    fn test_auto_log_settings_follow_tokens() {
        let mut sector = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        sector.extend(record(1));
        sector.extend(setting_token(setting::BY_SECONDS, 150));
        sector.extend(setting_token(setting::BY_DISTANCE, 1000));
        sector.extend(setting_token(setting::BY_SPEED, 200));
        sector.extend(record(2));

        let parsed = parse_log(&LAYOUT, &pad_sector(sector));
        assert_eq!(parsed.record_count(), 2);
        assert_eq!(parsed.stats.settings, 3);
        let settings = parsed.settings.expect("settings");
        assert_eq!(settings.by_seconds, 150);
        assert_eq!(settings.by_distance, 1000);
        assert_eq!(settings.by_speed, 200);
    }

    #[test]
    fn test_record_method_token() {
        let mut sector = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        sector.extend(setting_token(setting::RECORD_METHOD, 0x0000));
        sector.extend(record(1));
        let parsed = parse_log(&LAYOUT, &pad_sector(sector.clone()));
        let settings = parsed.settings.expect("settings");
        assert_eq!(settings.record_method, RecordMethod::Overlap);
        // the mode word only follows logger state tokens
        assert_eq!(settings.mode, 0x0106);

        sector.extend(setting_token(setting::RECORD_METHOD, 0x0004));
        let parsed = parse_log(&LAYOUT, &pad_sector(sector));
        assert_eq!(
            parsed.settings.map(|s| s.record_method),
            Some(RecordMethod::StopWhenFull)
        );
    }

    #[test]
    fn test_last_sector_settings_win() {
        let mut first = sector_header(1, FMT, 0x0106);
        first.extend(record(1));
        first.extend(setting_token(setting::BY_SECONDS, 10));
        let mut second = sector_header(SECTOR_NOT_FULL, FMT, 0x0104);
        second.extend(record(2));

        let mut dump = pad_sector(first);
        dump.extend(pad_sector(second));

        // the second sector starts again from its own header
        let settings = parse_log(&LAYOUT, &dump).settings.expect("settings");
        assert_eq!(settings.by_seconds, 50);
        assert_eq!(settings.mode, 0x0104);
        assert_eq!(settings.record_method, RecordMethod::StopWhenFull);
    }

    #[test]
    fn test_watermark_match_len() {
        let wm = LAYOUT.watermark;
        assert_eq!(wm.match_len(b"HOLUXGR241LOGGER  x", 0), Some(18));
        assert_eq!(wm.match_len(b"xHOLUXGR241WAYPNT", 1), Some(16));
        assert_eq!(wm.match_len(b"HOLUXGR241OTHER", 0), None);
    }

    #[test]
    fn test_bad_checksum_abandons_only_that_sector() {
        let mut first = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        first.extend(record(1));
        first.extend_from_slice(&[1, 2, 3, 4, 5, 6, 0]);
        first.extend(record(2));

        let mut second = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        second.extend(record(3));

        let mut dump = pad_sector(first);
        dump.extend(pad_sector(second));

        let parsed = parse_log(&LAYOUT, &dump);
        assert_eq!(parsed.stats.abandoned_sectors, 1);
        let utcs: Vec<_> = parsed.tracks.iter().flatten().map(|r| r.utc).collect();
        assert_eq!(utcs, vec![Some(1), Some(3)]);
    }

    #[test]
    fn test_invalid_header_skips_sector_unless_last() {
        let mut bad = sector_header(SECTOR_NOT_FULL, FMT, 0x0000);
        bad.extend(record(1));
        let mut good = sector_header(SECTOR_NOT_FULL, FMT, 0x0104);
        good.extend(record(2));

        let mut dump = pad_sector(bad);
        dump.extend(pad_sector(good));

        let parsed = parse_log(&LAYOUT, &dump);
        assert_eq!(parsed.stats.skipped_sectors, 1);
        // an exact multiple of the sector size still visits one extra sector
        assert_eq!(parsed.stats.sectors, 3);
        assert_eq!(parsed.record_count(), 1);
        assert_eq!(parsed.tracks[0][0].utc, Some(2));

        // a partial last sector is decoded even with an unexpected mode
        let mut last = sector_header(SECTOR_NOT_FULL, FMT, 0x0000);
        last.extend(record(5));
        last.extend_from_slice(&[0xFF; 7]);
        let parsed = parse_log(&LAYOUT, &last);
        assert_eq!(parsed.stats.skipped_sectors, 0);
        assert_eq!(parsed.record_count(), 1);
    }

    #[test]
    fn test_tracks_continue_across_sectors() {
        let mut first = sector_header(1, FMT, 0x0106);
        first.extend(record(1));
        let mut second = sector_header(SECTOR_NOT_FULL, FMT, 0x0106);
        second.extend(record(2));
        second.extend_from_slice(&[0xFF; 7]);

        let mut dump = pad_sector(first);
        dump.extend(second);

        let parsed = parse_log(&LAYOUT, &dump);
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.tracks[0].len(), 2);
    }

    #[test]
    fn test_empty_dump() {
        let parsed = parse_log(&LAYOUT, &[]);
        assert!(parsed.tracks.is_empty());
        assert_eq!(parsed.stats.sectors, 1);
    }
}
