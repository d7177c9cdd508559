//! Record field tables.
//!
//! A record is the concatenation of every field whose bit is set in the
//! current format register, in ascending bit order, followed by a one-byte
//! XOR checksum.
//!
//! ```text
//! bit  field       bytes  type
//!  0   UTC           4    u32 seconds since 1970
//!  1   VALID         2    u16 bitmask
//!  2   LATITUDE      4    f32 degrees
//!  3   LONGITUDE     4    f32 degrees
//!  4   HEIGHT        4    f32 meters
//!  5   SPEED         4    f32 km/h
//!  6   HEADING       4    f32 degrees
//!  7   DSTA          2    u16
//!  8   DAGE          4    f32 seconds
//!  9   PDOP          2    u16 ×100
//! 10   HDOP          2    u16 ×100
//! 11   VDOP          2    u16 ×100
//! 12   NSAT          2    u8 in view, u8 in use
//! 13   SID           4    u8 id, u8 used, u8 count, u8 -   (per satellite)
//! 14   ELEVATION     2    i16                            (per satellite)
//! 15   AZIMUTH       2    u16                            (per satellite)
//! 16   SNR           2    u16                            (per satellite)
//! 17   RCR           2    u16 reason bitmask
//! 18   MILLISECOND   2    u16
//! 19   DISTANCE      8    f64 meters
//! ```

use crate::protocol::bytes::{read_f32, read_f64, read_i16, read_u8, read_u16, read_u32};
use crate::tracklog::record::{LogRecord, MAX_SATELLITES, SatInfo};

/// Bit positions of the format register.
pub mod bits {
    #![allow(missing_docs)]
    pub const UTC: u8 = 0;
    pub const VALID: u8 = 1;
    pub const LATITUDE: u8 = 2;
    pub const LONGITUDE: u8 = 3;
    pub const HEIGHT: u8 = 4;
    pub const SPEED: u8 = 5;
    pub const HEADING: u8 = 6;
    pub const DSTA: u8 = 7;
    pub const DAGE: u8 = 8;
    pub const PDOP: u8 = 9;
    pub const HDOP: u8 = 10;
    pub const VDOP: u8 = 11;
    pub const NSAT: u8 = 12;
    pub const SID: u8 = 13;
    pub const ELEVATION: u8 = 14;
    pub const AZIMUTH: u8 = 15;
    pub const SNR: u8 = 16;
    pub const RCR: u8 = 17;
    pub const MILLISECOND: u8 = 18;
    pub const DISTANCE: u8 = 19;
}

/// Mask with a single field bit set.
pub const fn mask(bit: u8) -> u32 {
    1 << bit
}

/// Decodes one field at `offset` into the record.
///
/// Returns the number of bytes consumed, or `None` when the buffer ends
/// inside the field.
pub type DecodeFn = fn(&mut LogRecord, &[u8], usize, u32) -> Option<usize>;

/// One entry of a field table.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Bit in the format register.
    pub bit: u8,
    /// Display name.
    pub name: &'static str,
    /// Width in bytes (per satellite for the satellite group).
    pub width: usize,
    /// Decoder.
    pub decode: DecodeFn,
}

impl FieldSpec {
    /// Whether the field belongs to the per-satellite group.
    pub fn is_satellite_group(&self) -> bool {
        (bits::SID..=bits::SNR).contains(&self.bit)
    }
}

const fn field(bit: u8, name: &'static str, width: usize, decode: DecodeFn) -> FieldSpec {
    FieldSpec {
        bit,
        name,
        width,
        decode,
    }
}

/// Field table shared by the Holux M-241 and GR-245.
pub static HOLUX_FIELDS: [FieldSpec; 20] = [
    field(bits::UTC, "UTC", 4, |r, b, o, _| {
        r.utc = Some(read_u32(b, o)?);
        Some(4)
    }),
    field(bits::VALID, "VALID", 2, |r, b, o, _| {
        r.valid = Some(read_u16(b, o)?);
        Some(2)
    }),
    field(bits::LATITUDE, "LATITUDE", 4, |r, b, o, _| {
        r.latitude = Some(f64::from(read_f32(b, o)?));
        Some(4)
    }),
    field(bits::LONGITUDE, "LONGITUDE", 4, |r, b, o, _| {
        r.longitude = Some(f64::from(read_f32(b, o)?));
        Some(4)
    }),
    field(bits::HEIGHT, "HEIGHT", 4, |r, b, o, _| {
        r.height = Some(f64::from(read_f32(b, o)?));
        Some(4)
    }),
    field(bits::SPEED, "SPEED", 4, |r, b, o, _| {
        r.speed = Some(f64::from(read_f32(b, o)?));
        Some(4)
    }),
    field(bits::HEADING, "HEADING", 4, |r, b, o, _| {
        r.heading = Some(f64::from(read_f32(b, o)?));
        Some(4)
    }),
    field(bits::DSTA, "DSTA", 2, |r, b, o, _| {
        r.dgps_station = Some(read_u16(b, o)?);
        Some(2)
    }),
    field(bits::DAGE, "DAGE", 4, |r, b, o, _| {
        r.dgps_age = Some(f64::from(read_f32(b, o)?));
        Some(4)
    }),
    field(bits::PDOP, "PDOP", 2, |r, b, o, _| {
        r.pdop = Some(read_u16(b, o)?);
        Some(2)
    }),
    field(bits::HDOP, "HDOP", 2, |r, b, o, _| {
        r.hdop = Some(read_u16(b, o)?);
        Some(2)
    }),
    field(bits::VDOP, "VDOP", 2, |r, b, o, _| {
        r.vdop = Some(read_u16(b, o)?);
        Some(2)
    }),
    field(bits::NSAT, "NSAT", 2, |r, b, o, _| {
        r.sats_in_view = Some(read_u8(b, o)?);
        r.sats_in_use = Some(read_u8(b, o + 1)?);
        Some(2)
    }),
    field(bits::SID, "SID", 4, decode_satellites),
    // consumed inline by the SID decoder
    field(bits::ELEVATION, "ELEVATION", 2, |_, _, _, _| Some(0)),
    field(bits::AZIMUTH, "AZIMUTH", 2, |_, _, _, _| Some(0)),
    field(bits::SNR, "SNR", 2, |_, _, _, _| Some(0)),
    field(bits::RCR, "RCR", 2, |r, b, o, _| {
        r.reason = Some(read_u16(b, o)?);
        Some(2)
    }),
    field(bits::MILLISECOND, "MILLISECOND", 2, |r, b, o, _| {
        r.millisecond = Some(read_u16(b, o)?);
        Some(2)
    }),
    field(bits::DISTANCE, "DISTANCE", 8, |r, b, o, _| {
        r.distance = Some(read_f64(b, o)?);
        Some(8)
    }),
];

/// Decode the satellite group.
///
/// The satellite count sits in bits [23:16] of the first SID word. Each
/// satellite contributes a SID word followed by its ELEVATION, AZIMUTH and
/// SNR values when those bits are set.
fn decode_satellites(record: &mut LogRecord, buf: &[u8], offset: usize, fmt: u32) -> Option<usize> {
    let count = ((read_u32(buf, offset)? >> 16) & 0xFF) as usize;
    if count == 0 {
        return Some(4);
    }

    let mut pos = offset;
    for _ in 0..count.min(MAX_SATELLITES) {
        let mut sat = SatInfo {
            id: read_u8(buf, pos)?,
            used: read_u8(buf, pos + 1)? != 0,
            ..Default::default()
        };
        pos += 4;
        if fmt & mask(bits::ELEVATION) != 0 {
            sat.elevation = read_i16(buf, pos)?;
            pos += 2;
        }
        if fmt & mask(bits::AZIMUTH) != 0 {
            sat.azimuth = read_u16(buf, pos)?;
            pos += 2;
        }
        if fmt & mask(bits::SNR) != 0 {
            sat.snr = read_u16(buf, pos)?;
            pos += 2;
        }
        record.satellites.push(sat);
    }
    Some(pos - offset)
}

/// Static size in bytes of a record written with format `fmt`, checksum
/// byte included.
///
/// The satellite group is sized for [`MAX_SATELLITES`] entries and only
/// counts when the SID bit is set.
pub fn record_size(table: &[FieldSpec], fmt: u32) -> usize {
    let with_sats = fmt & mask(bits::SID) != 0;
    let fields: usize = table
        .iter()
        .filter(|f| fmt & mask(f.bit) != 0)
        .map(|f| match (f.is_satellite_group(), with_sats) {
            (false, _) => f.width,
            (true, true) => f.width * MAX_SATELLITES,
            (true, false) => 0,
        })
        .sum();
    fields + 1
}

/// Decode one record at `offset`.
///
/// Returns the record and the number of field bytes actually consumed
/// (checksum excluded). Callers advance by [`record_size`], not by the
/// consumed count.
pub fn decode_record(
    table: &[FieldSpec],
    fmt: u32,
    buf: &[u8],
    offset: usize,
) -> Option<(LogRecord, usize)> {
    let mut record = LogRecord::default();
    let mut pos = offset;
    for bit in 0..32u8 {
        if fmt & mask(bit) == 0 {
            continue;
        }
        let Some(spec) = table.iter().find(|f| f.bit == bit) else {
            continue;
        };
        pos += (spec.decode)(&mut record, buf, pos, fmt)?;
    }
    Some((record, pos - offset))
}

/// Names of the fields enabled in `fmt`.
pub fn field_names(table: &[FieldSpec], fmt: u32) -> Vec<&'static str> {
    table
        .iter()
        .filter(|f| fmt & mask(f.bit) != 0)
        .map(|f| f.name)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAT_GROUP: u32 =
        mask(bits::SID) | mask(bits::ELEVATION) | mask(bits::AZIMUTH) | mask(bits::SNR);

    #[test]
    fn test_table_is_in_ascending_bit_order() {
        for pair in HOLUX_FIELDS.windows(2) {
            assert!(pair[0].bit < pair[1].bit, "{} before {}", pair[0].name, pair[1].name);
        }
    }

    #[test]
    fn test_record_size_minimal() {
        let fmt = mask(bits::UTC) | mask(bits::VALID);
        assert_eq!(record_size(&HOLUX_FIELDS, fmt), 7);
        assert_eq!(record_size(&HOLUX_FIELDS, 0), 1);
    }

    #[test]
    fn test_record_size_satellite_group() {
        let fmt = mask(bits::UTC) | SAT_GROUP;
        assert_eq!(record_size(&HOLUX_FIELDS, fmt), 4 + 32 * (4 + 2 + 2 + 2) + 1);

        // without SID the per-satellite fields carry nothing
        let fmt = mask(bits::UTC) | mask(bits::ELEVATION) | mask(bits::SNR);
        assert_eq!(record_size(&HOLUX_FIELDS, fmt), 5);
    }

    #[test]
    fn test_decode_positional_fields() {
        let fmt = mask(bits::UTC)
            | mask(bits::VALID)
            | mask(bits::LATITUDE)
            | mask(bits::LONGITUDE)
            | mask(bits::HEIGHT)
            | mask(bits::RCR)
            | mask(bits::DISTANCE);
        let mut buf = Vec::new();
        buf.extend_from_slice(&1_234_567_890u32.to_le_bytes());
        buf.extend_from_slice(&0x0002u16.to_le_bytes());
        buf.extend_from_slice(&48.5f32.to_le_bytes());
        buf.extend_from_slice(&(-2.25f32).to_le_bytes());
        buf.extend_from_slice(&512.0f32.to_le_bytes());
        buf.extend_from_slice(&0x0008u16.to_le_bytes());
        buf.extend_from_slice(&1500.5f64.to_le_bytes());

        let (record, used) = decode_record(&HOLUX_FIELDS, fmt, &buf, 0).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(used + 1, record_size(&HOLUX_FIELDS, fmt));
        assert_eq!(record.utc, Some(1_234_567_890));
        assert_eq!(record.valid, Some(2));
        assert_eq!(record.latitude, Some(48.5));
        assert_eq!(record.longitude, Some(-2.25));
        assert_eq!(record.height, Some(512.0));
        assert_eq!(record.speed, None);
        assert!(record.is_poi());
        assert_eq!(record.distance, Some(1500.5));
    }

    #[test]
    fn test_decode_satellites_uses_inline_count() {
        let fmt = mask(bits::UTC) | SAT_GROUP;
        let mut buf = Vec::new();
        buf.extend_from_slice(&100u32.to_le_bytes());
        for (id, used, ele, azi, snr) in [(5u8, 1u8, 45i16, 180u16, 38u16), (17, 0, -3, 270, 20)] {
            buf.extend_from_slice(&[id, used, 2, 0]);
            buf.extend_from_slice(&ele.to_le_bytes());
            buf.extend_from_slice(&azi.to_le_bytes());
            buf.extend_from_slice(&snr.to_le_bytes());
        }

        let (record, used) = decode_record(&HOLUX_FIELDS, fmt, &buf, 0).unwrap();
        assert_eq!(used, 4 + 2 * 10);
        assert!(used < record_size(&HOLUX_FIELDS, fmt));
        assert_eq!(record.satellites.len(), 2);
        assert_eq!(
            record.satellites[0],
            SatInfo {
                id: 5,
                used: true,
                elevation: 45,
                azimuth: 180,
                snr: 38
            }
        );
        assert_eq!(record.satellites[1].elevation, -3);
        assert!(!record.satellites[1].used);
    }

    #[test]
    fn test_decode_satellites_without_entries() {
        let fmt = mask(bits::SID) | mask(bits::SNR);
        let buf = [0u8; 4];
        let (record, used) = decode_record(&HOLUX_FIELDS, fmt, &buf, 0).unwrap();
        assert_eq!(used, 4);
        assert!(record.satellites.is_empty());
    }

    #[test]
    fn test_decode_truncated_record() {
        let fmt = mask(bits::UTC) | mask(bits::DISTANCE);
        assert!(decode_record(&HOLUX_FIELDS, fmt, &[0u8; 6], 0).is_none());
    }

    #[test]
    fn test_field_names() {
        let fmt = mask(bits::UTC) | mask(bits::SPEED);
        assert_eq!(field_names(&HOLUX_FIELDS, fmt), vec!["UTC", "SPEED"]);
    }
}
