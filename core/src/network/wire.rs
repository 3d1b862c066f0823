//! Radio frame helpers.
//!
//! Every payload written to a peer is wrapped as `[version][len][body]` so a
//! receiver can reject formats it does not understand before parsing.
//!
//! The radio carries a single payload kind, so the leading byte names the
//! body's format version rather than a message type. Devices running an
//! older build drop newer alerts as unsupported instead of misreading them.

/// Frame header size in bytes: 1 byte version + 4 byte length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest frame a peer will write in one GATT attribute write.
pub const MAX_FRAME_LEN: usize = 512;

/// Parsed frame view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Format version byte.
    pub version: u8,
    /// Frame body.
    pub body: &'a [u8],
    /// Total frame size (header + body).
    pub total_size: usize,
}

/// Errors when decoding a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Input does not contain a full frame.
    TooShort,
    /// Trailing bytes after a complete frame.
    TrailingBytes,
    /// Declared length exceeds [`MAX_FRAME_LEN`].
    TooLarge(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooShort => write!(f, "frame too short"),
            FrameError::TrailingBytes => write!(f, "trailing bytes after frame"),
            FrameError::TooLarge(len) => {
                write!(f, "frame too large ({} bytes, max {})", len, MAX_FRAME_LEN)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Encode a framed payload as `[version][len][body]`.
pub fn encode_frame(version: u8, body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    bytes.push(version);
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(body);
    bytes
}

/// Decode a frame from the front of `bytes`.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(FrameError::TooShort);
    }

    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    let total_size = FRAME_HEADER_LEN.saturating_add(len);
    if total_size > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(total_size));
    }

    if bytes.len() < total_size {
        return Err(FrameError::TooShort);
    }

    Ok(Frame {
        version: bytes[0],
        body: &bytes[FRAME_HEADER_LEN..total_size],
        total_size,
    })
}

/// Decode a frame and require that it consumes the full buffer.
pub fn decode_frame_exact(bytes: &[u8]) -> Result<Frame<'_>, FrameError> {
    let frame = decode_frame(bytes)?;
    if frame.total_size != bytes.len() {
        return Err(FrameError::TrailingBytes);
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let bytes = encode_frame(1, b"abc");
        assert_eq!(bytes, vec![1, 0, 0, 0, 3, b'a', b'b', b'c']);

        let frame = decode_frame_exact(&bytes).unwrap();
        assert_eq!(frame.version, 1);
        assert_eq!(frame.body, b"abc");
        assert_eq!(frame.total_size, 8);
    }

    #[test]
    fn test_truncated_frame() {
        let bytes = encode_frame(1, b"abcdef");
        assert_eq!(decode_frame(&bytes[..3]), Err(FrameError::TooShort));
        assert_eq!(decode_frame(&bytes[..7]), Err(FrameError::TooShort));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode_frame(1, b"abc");
        bytes.push(0xff);
        assert!(decode_frame(&bytes).is_ok());
        assert_eq!(decode_frame_exact(&bytes), Err(FrameError::TrailingBytes));
    }

    #[test]
    fn test_declared_length_over_limit() {
        let bytes = [1, 0xff, 0xff, 0xff, 0xff];
        assert!(matches!(decode_frame(&bytes), Err(FrameError::TooLarge(_))));
    }
}
