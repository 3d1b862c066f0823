//! Alert value types
//!
//! An [`Alert`] is immutable once created. Identity is carried entirely by
//! its [`AlertId`]: two alerts with the same id are the same logical alert
//! even if a noisy retransmission altered other fields.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::network::codec::MAX_ENVELOPE_LEN;
use crate::network::wire::MAX_FRAME_LEN;

/// Maximum alert text size in UTF-8 bytes.
///
/// Whatever the frame envelope leaves of a single 512-byte GATT attribute,
/// so every valid alert encodes to one frame.
pub const MAX_TEXT_BYTES: usize = MAX_FRAME_LEN - MAX_ENVELOPE_LEN;

/// Length of an alert identifier in bytes (128 bits)
pub const ALERT_ID_LEN: usize = 16;

/// Current time in milliseconds since the Unix epoch
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Monotonic time read from the tokio clock, so paused test time applies
pub(crate) fn monotonic_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Opaque 128-bit alert identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertId([u8; ALERT_ID_LEN]);

impl AlertId {
    /// Generate a fresh random identifier from the OS RNG
    pub fn random() -> Self {
        let mut bytes = [0u8; ALERT_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw identifier bytes
    pub const fn from_bytes(bytes: [u8; ALERT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; ALERT_ID_LEN] {
        &self.0
    }

    /// Short hex prefix for log lines
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AlertId({})", self.short())
    }
}

impl FromStr for AlertId {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| AlertError::InvalidId)?;
        let bytes: [u8; ALERT_ID_LEN] = bytes.try_into().map_err(|_| AlertError::InvalidId)?;
        Ok(Self(bytes))
    }
}

/// Errors when constructing an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertError {
    /// Text exceeds [`MAX_TEXT_BYTES`]
    TextTooLong(usize),
    /// Latitude/longitude not finite or out of range
    InvalidCoordinate,
    /// Identifier is not 32 hex characters
    InvalidId,
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::TextTooLong(len) => {
                write!(f, "alert text too long ({} bytes, max {})", len, MAX_TEXT_BYTES)
            }
            AlertError::InvalidCoordinate => write!(f, "invalid coordinate"),
            AlertError::InvalidId => write!(f, "invalid alert id"),
        }
    }
}

impl std::error::Error for AlertError {}

/// A geotagged disaster alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    id: AlertId,
    text: String,
    created_at: u64,
    latitude: f64,
    longitude: f64,
}

impl Alert {
    /// Create a new alert originating on this device now
    pub fn new(text: impl Into<String>, latitude: f64, longitude: f64) -> Result<Self, AlertError> {
        Self::from_parts(AlertId::random(), text, current_time_millis(), latitude, longitude)
    }

    /// Build an alert from explicit fields (used by the codec and tests)
    pub fn from_parts(
        id: AlertId,
        text: impl Into<String>,
        created_at: u64,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, AlertError> {
        let text = text.into();
        if text.len() > MAX_TEXT_BYTES {
            return Err(AlertError::TextTooLong(text.len()));
        }
        if !valid_latitude(latitude) || !valid_longitude(longitude) {
            return Err(AlertError::InvalidCoordinate);
        }
        Ok(Self {
            id,
            text,
            created_at,
            latitude,
            longitude,
        })
    }

    pub fn id(&self) -> AlertId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Origination time (Unix milliseconds)
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// True when every field matches, not just the id
    pub fn same_contents(&self, other: &Alert) -> bool {
        self.id == other.id
            && self.text == other.text
            && self.created_at == other.created_at
            && self.latitude.to_bits() == other.latitude.to_bits()
            && self.longitude.to_bits() == other.longitude.to_bits()
    }
}

impl PartialEq for Alert {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Alert {}

impl Hash for Alert {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

fn valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

fn valid_longitude(lon: f64) -> bool {
    lon.is_finite() && (-180.0..=180.0).contains(&lon)
}
