//! Relay errors

use crate::network::codec::DecodeError;
use crate::network::transport::{PeerAddress, TransportError};
use crate::protocol::{AlertError, AlertId};

/// Errors surfaced by the relay service
#[derive(Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Radio is disabled or not authorized
    TransportUnavailable,
    /// Writing to one peer failed; other peers are unaffected
    SendFailure { peer: PeerAddress, reason: TransportError },
    /// A link dropped
    ConnectionLost(PeerAddress),
    /// A received payload could not be decoded
    Decode(DecodeError),
    /// Alert fields failed validation
    InvalidAlert(AlertError),
    /// This alert id was already seen
    AlreadySeen(AlertId),
    /// The service is not running
    NotRunning,
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::TransportUnavailable => write!(f, "radio transport unavailable"),
            RelayError::SendFailure { peer, reason } => {
                write!(f, "send to {} failed: {}", peer, reason)
            }
            RelayError::ConnectionLost(peer) => write!(f, "connection to {} lost", peer),
            RelayError::Decode(e) => write!(f, "decode error: {}", e),
            RelayError::InvalidAlert(e) => write!(f, "invalid alert: {}", e),
            RelayError::AlreadySeen(id) => write!(f, "alert {} already seen", id.short()),
            RelayError::NotRunning => write!(f, "relay service is not running"),
        }
    }
}

impl std::error::Error for RelayError {}

impl From<DecodeError> for RelayError {
    fn from(e: DecodeError) -> Self {
        RelayError::Decode(e)
    }
}

impl From<AlertError> for RelayError {
    fn from(e: AlertError) -> Self {
        RelayError::InvalidAlert(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_display() {
        assert_eq!(
            RelayError::TransportUnavailable.to_string(),
            "radio transport unavailable"
        );
        assert_eq!(
            RelayError::NotRunning.to_string(),
            "relay service is not running"
        );

        let err = RelayError::SendFailure {
            peer: PeerAddress::new("AA:BB"),
            reason: TransportError::Timeout,
        };
        assert_eq!(err.to_string(), "send to AA:BB failed: radio operation timed out");

        let err = RelayError::ConnectionLost(PeerAddress::new("AA:BB"));
        assert_eq!(err.to_string(), "connection to AA:BB lost");

        let err = RelayError::AlreadySeen(AlertId::from_bytes([0x0f; 16]));
        assert_eq!(err.to_string(), "alert 0f0f0f0f already seen");
    }

    #[test]
    fn test_conversions() {
        let err: RelayError = DecodeError::UnsupportedVersion(7).into();
        assert_eq!(err, RelayError::Decode(DecodeError::UnsupportedVersion(7)));
        assert_eq!(err.to_string(), "decode error: unsupported alert version 7");

        let err: RelayError = AlertError::InvalidCoordinate.into();
        assert!(matches!(err, RelayError::InvalidAlert(AlertError::InvalidCoordinate)));
    }

    #[test]
    fn test_relay_error_is_error_trait() {
        let err: Box<dyn std::error::Error> = Box::new(RelayError::NotRunning);
        assert!(!err.to_string().is_empty());
    }
}
