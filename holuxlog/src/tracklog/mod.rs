//! Binary track log decoding.
//!
//! A flash dump downloaded from the logger is scanned sector by sector by
//! [`parser`]; each waypoint record is decoded by [`field`] according to the
//! format register in effect at that position.

pub mod field;
pub mod parser;
pub mod record;

pub use field::{FieldSpec, HOLUX_FIELDS, decode_record, field_names, record_size};
pub use parser::{
    LogLayout, LogParser, LogSettings, RecordMethod, SectorHeader, Watermark, parse_log,
};
pub use record::{LogRecord, ParseStats, ParsedLog, SatInfo, Track};
