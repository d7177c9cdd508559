//! Data fields of the commands the session sends, and their replies.
//!
//! Query/response pairs:
//!
//! ```text
//! PMTK182,2,<id>                    -> PMTK182,3,<id>,<value>
//! PMTK182,7,<offset:08X>,<len:08X>  -> PMTK182,8,<offset:08X>,<hex payload>
//! PMTK605                           -> PMTK705,<firmware release>
//! HOLUX241,<n>[,<arg>]              -> HOLUX001,<n>[,<value>]
//! ```

/// Log register ids for `PMTK182,2` queries.
pub mod register {
    /// Field presence mask of new records.
    pub const LOG_FORMAT: u8 = 2;
    /// Auto-log interval in tenths of a second.
    pub const BY_SECONDS: u8 = 3;
    /// Auto-log distance in tenths of a meter.
    pub const BY_DISTANCE: u8 = 4;
    /// Auto-log speed in tenths of km/h.
    pub const BY_SPEED: u8 = 5;
    /// Overlap / stop-when-full.
    pub const RECORD_METHOD: u8 = 6;
    /// Logger status word.
    pub const LOG_STATUS: u8 = 7;
    /// Flash address the next record will be written to.
    pub const NEXT_WRITE_ADDRESS: u8 = 8;
}

/// Firmware release query.
pub const QUERY_RELEASE: &str = "PMTK605";

/// Reply to [`QUERY_RELEASE`].
pub const RELEASE_RESPONSE: &str = "PMTK705";

/// Size of one log read request.
pub const READ_CHUNK_SIZE: u32 = 0x400;

/// Query a log register.
pub fn query_register(id: u8) -> String {
    format!("PMTK182,2,{id}")
}

/// Prefix of the reply to [`query_register`].
pub fn register_response(id: u8) -> String {
    format!("PMTK182,3,{id}")
}

/// Request `len` bytes of flash starting at `offset`.
pub fn read_log(offset: u32, len: u32) -> String {
    format!("PMTK182,7,{offset:08X},{len:08X}")
}

/// Prefix of the reply to [`read_log`].
pub fn read_log_response(offset: u32) -> String {
    format!("PMTK182,8,{offset:08X}")
}

/// Vendor command `<tag>,<n>[,<arg>]`.
pub fn vendor(tag: &str, n: u8, arg: Option<&str>) -> String {
    match arg {
        Some(arg) => format!("{tag},{n},{arg}"),
        None => format!("{tag},{n}"),
    }
}

/// Prefix of the reply to vendor command `n`.
pub fn vendor_response(tag: &str, n: u8) -> String {
    format!("{tag},{n}")
}

/// Parse a hex register value as sent by the device (no `0x` prefix).
pub fn parse_hex_u32(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() || s.len() > 8 {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

/// Strip `prefix` and one following comma from a data field.
///
/// Returns `None` when the field does not start with `prefix`,
/// `Some(None)` when nothing follows it.
pub fn strip_response<'a>(data: &'a str, prefix: &str) -> Option<Option<&'a str>> {
    let rest = data.strip_prefix(prefix)?;
    let rest = rest.strip_prefix(',').unwrap_or(rest);
    Some((!rest.is_empty()).then_some(rest))
}
