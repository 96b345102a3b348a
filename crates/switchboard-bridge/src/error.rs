//! Error taxonomy for the media bridge.

use switchboard_codec::CodecError;
use switchboard_types::CallId;
use thiserror::Error;

/// The two websocket legs of a bridge session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// Telephony provider media stream.
    Upstream,
    /// Voice-AI realtime backend.
    Downstream,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Upstream => f.write_str("upstream"),
            Self::Downstream => f.write_str("downstream"),
        }
    }
}

/// Errors raised while running a bridge session.
///
/// Severity matters more than the variant itself: codec failures are
/// skip-and-continue, an upstream close ends the call, a downstream close
/// is retried once before becoming fatal, and handshake or registry
/// failures abort session setup.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A malformed audio frame. Never fatal; the frame is dropped.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A websocket leg closed or its writer task is gone.
    #[error("{leg} connection closed")]
    ConnectionClosed { leg: Leg },

    /// The realtime session-configuration exchange failed or timed out.
    #[error("realtime handshake failed: {0}")]
    Handshake(String),

    /// A session for this call id already exists.
    #[error("session already registered for call {0}")]
    RegistryConflict(CallId),

    /// No audio crossed the bridge in either direction for the configured
    /// idle window.
    #[error("session idle timeout")]
    IdleTimeout,

    /// The backend conversation service rejected or failed the context
    /// fetch. Fatal before session start (fail-closed).
    #[error("context fetch failed: {0}")]
    Context(String),
}

impl BridgeError {
    /// Whether this error ends the session outright.
    ///
    /// `ConnectionClosed` on the downstream leg is reported as fatal here;
    /// the session loop applies its single reconnect attempt before
    /// consulting this.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Codec(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_are_recoverable() {
        let err = BridgeError::Codec(CodecError::FrameLength {
            expected: 160,
            actual: 12,
        });
        assert!(!err.is_fatal());
    }

    #[test]
    fn connection_and_handshake_errors_are_fatal() {
        assert!(BridgeError::ConnectionClosed { leg: Leg::Upstream }.is_fatal());
        assert!(BridgeError::Handshake("no session.updated".into()).is_fatal());
        assert!(BridgeError::IdleTimeout.is_fatal());
        assert!(BridgeError::RegistryConflict(CallId::from("CA1")).is_fatal());
    }

    #[test]
    fn display_names_the_leg() {
        let err = BridgeError::ConnectionClosed {
            leg: Leg::Downstream,
        };
        assert_eq!(err.to_string(), "downstream connection closed");
    }
}
