//! Textual sentence framing used by MTK-based loggers.
//!
//! ## Frame Format
//!
//! ```text
//! +-----+--------------------+-----+----------+------+
//! | '$' |     data field     | '*' | checksum | CRLF |
//! +-----+--------------------+-----+----------+------+
//! |  1  |      variable      |  1  | 2 (hex)  |  2   |
//! +-----+--------------------+-----+----------+------+
//! ```
//!
//! The checksum is the XOR of every byte of the data field, written as two
//! uppercase hex digits.

use crate::error::FrameError;

/// Minimum length of a line that can carry a sentence.
pub const MIN_SENTENCE_LEN: usize = 7;

/// Line terminator.
pub const LINE_END: &str = "\r\n";

/// Marker some firmware prints around diagnostic output.
const DIAGNOSTIC_MARKER: &str = "===";

/// One decoded, checksum-validated sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The line as received, without the line terminator.
    pub raw: String,
    /// Text between `$` and `*`.
    pub data: String,
    /// Checksum carried by the sentence (already verified).
    pub checksum: u8,
}

/// XOR checksum of a string's bytes.
pub fn xor_checksum_str(s: &str) -> u8 {
    xor_checksum_bytes(s.as_bytes(), 0, s.len())
}

/// XOR checksum of `len` bytes of `buf` starting at `offset`.
///
/// The range is clamped to the buffer.
pub fn xor_checksum_bytes(buf: &[u8], offset: usize, len: usize) -> u8 {
    let start = offset.min(buf.len());
    let end = offset.saturating_add(len).min(buf.len());
    buf[start..end].iter().fold(0u8, |acc, b| acc ^ b)
}

/// Build a complete sentence for `data`.
pub fn encode(data: &str) -> String {
    format!("${}*{:02X}{LINE_END}", data, xor_checksum_str(data))
}

/// Decode one received line.
///
/// Returns `Ok(None)` for lines that are not part of the protocol (blank
/// lines and `===` diagnostic markers).
pub fn decode_line(line: &str) -> Result<Option<Frame>, FrameError> {
    if line.trim().is_empty() || line.starts_with(DIAGNOSTIC_MARKER) {
        return Ok(None);
    }
    if line.len() < MIN_SENTENCE_LEN {
        return Err(FrameError::TooShort(line.len()));
    }
    if !line.starts_with('$') {
        return Err(FrameError::BadPrefix);
    }

    let body = line.trim_end_matches(['\r', '\n']);
    let bytes = body.as_bytes();
    let n = bytes.len();
    if n < 4 || bytes[n - 3] != b'*' {
        return Err(FrameError::BadSuffix);
    }
    if !bytes[n - 2..].iter().all(u8::is_ascii_hexdigit) {
        return Err(FrameError::BadSuffix);
    }
    let expected = u8::from_str_radix(&body[n - 2..], 16).map_err(|_| FrameError::BadSuffix)?;

    let data = &body[1..n - 3];
    let actual = xor_checksum_str(data);
    if actual != expected {
        return Err(FrameError::ChecksumMismatch { expected, actual });
    }

    Ok(Some(Frame {
        raw: body.to_string(),
        data: data.to_string(),
        checksum: expected,
    }))
}

/// Reassembles CRLF-terminated lines from arbitrarily chunked bytes.
#[derive(Debug, Default)]
pub struct LineAssembler {
    carry: Vec<u8>,
}

impl LineAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self
            .carry
            .windows(2)
            .position(|w| w == LINE_END.as_bytes())
        {
            let line = String::from_utf8_lossy(&self.carry[..pos]).into_owned();
            self.carry.drain(..pos + LINE_END.len());
            lines.push(line);
        }
        lines
    }

    /// Bytes held back waiting for a terminator.
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }

    /// Drop any partial line.
    pub fn clear(&mut self) {
        self.carry.clear();
    }
}
