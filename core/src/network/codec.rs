//! Alert codec
//!
//! Alerts travel as a single frame (see [`super::wire`]) whose body is UTF-8:
//!
//! ```text
//! {id_hex},{created_at},{latitude},{longitude},{text_len},{text}
//! ```
//!
//! `text_len` is the byte length of `text`, so commas inside the text never
//! shift the preceding fields and any truncation is detected. Coordinates are
//! written in Rust's shortest round-trip exponent form, at most 24 bytes each
//! (sign, 17 significant digits, point, three-digit exponent).

use std::fmt;

use super::wire::{decode_frame_exact, encode_frame, FrameError, FRAME_HEADER_LEN, MAX_FRAME_LEN};
use crate::protocol::{Alert, AlertId, ALERT_ID_LEN};

/// Current alert frame format version
pub const ALERT_FRAME_VERSION: u8 = 1;

/// Field delimiter inside the frame body
const DELIMITER: char = ',';

/// Number of delimited fields, including the text length prefix
const FIELD_COUNT: usize = 6;

/// Worst-case frame bytes around the text: frame header, hex id, `u64`
/// timestamp, two coordinates, a three-digit text length and the delimiters.
pub const MAX_ENVELOPE_LEN: usize =
    FRAME_HEADER_LEN + 2 * ALERT_ID_LEN + 20 + 24 + 24 + 3 + (FIELD_COUNT - 1);

/// Errors when decoding a received payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Structurally invalid payload (bad framing, wrong field count, bad number)
    Malformed(&'static str),
    /// Frame version this build does not understand
    UnsupportedVersion(u8),
    /// Frame exceeds the radio attribute size
    TooLarge(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(reason) => write!(f, "malformed alert: {}", reason),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported alert version {}", v),
            DecodeError::TooLarge(len) => {
                write!(f, "alert frame too large ({} bytes, max {})", len, MAX_FRAME_LEN)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<FrameError> for DecodeError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::TooShort => DecodeError::Malformed("truncated frame"),
            FrameError::TrailingBytes => DecodeError::Malformed("trailing bytes after frame"),
            FrameError::TooLarge(len) => DecodeError::TooLarge(len),
        }
    }
}

/// Encode an alert for transmission
pub fn encode(alert: &Alert) -> Vec<u8> {
    let body = format!(
        "{id}{d}{created}{d}{lat:e}{d}{lon:e}{d}{len}{d}{text}",
        id = alert.id(),
        created = alert.created_at(),
        lat = alert.latitude(),
        lon = alert.longitude(),
        len = alert.text().len(),
        text = alert.text(),
        d = DELIMITER,
    );
    encode_frame(ALERT_FRAME_VERSION, body.as_bytes())
}

/// Decode a received payload into an alert
///
/// Never returns a partially populated alert: any framing, field or number
/// error yields a [`DecodeError`].
pub fn decode(bytes: &[u8]) -> Result<Alert, DecodeError> {
    let frame = decode_frame_exact(bytes)?;
    if frame.version != ALERT_FRAME_VERSION {
        return Err(DecodeError::UnsupportedVersion(frame.version));
    }

    let body =
        std::str::from_utf8(frame.body).map_err(|_| DecodeError::Malformed("body is not UTF-8"))?;

    let fields: Vec<&str> = body.splitn(FIELD_COUNT, DELIMITER).collect();
    if fields.len() != FIELD_COUNT {
        return Err(DecodeError::Malformed("wrong field count"));
    }

    let id: AlertId = fields[0]
        .parse()
        .map_err(|_| DecodeError::Malformed("invalid id"))?;
    let created_at: u64 = fields[1]
        .parse()
        .map_err(|_| DecodeError::Malformed("invalid timestamp"))?;
    let latitude: f64 = fields[2]
        .parse()
        .map_err(|_| DecodeError::Malformed("invalid latitude"))?;
    let longitude: f64 = fields[3]
        .parse()
        .map_err(|_| DecodeError::Malformed("invalid longitude"))?;
    let text_len: usize = fields[4]
        .parse()
        .map_err(|_| DecodeError::Malformed("invalid text length"))?;

    let text = fields[5];
    if text.len() != text_len {
        return Err(DecodeError::Malformed("text length mismatch"));
    }

    Alert::from_parts(id, text, created_at, latitude, longitude)
        .map_err(|_| DecodeError::Malformed("field out of range"))
}
