//! Shared error types for the client core.
//!
//! Inbound pipeline errors never cross the public surface: they are
//! repaired (retry), logged, or routed to the unexpected-error hook.
//! The variants here are the ones callers of the outbound APIs and the
//! collaborator traits can observe.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A stanza did not carry the attributes or children its tag requires.
    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    /// The websocket is no longer open; the write was dropped.
    #[error("transport closed")]
    TransportClosed,

    /// A key-store transaction failed; no retry receipt was sent.
    #[error("key store transaction failed: {reason}")]
    KeyStoreTx { reason: String },

    /// The media upload endpoint rejected the payload or returned no URL.
    #[error("media upload failed: {reason}")]
    MediaUpload { reason: String },

    /// The caller supplied an argument the protocol cannot express.
    #[error("invalid argument: {reason}")]
    InvalidArg { reason: String },

    /// Ciphertext failed authentication or padding checks on decrypt.
    #[error("media payload failed verification: {reason}")]
    MediaVerification { reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Error::Protocol {
            reason: reason.into(),
        }
    }

    pub fn invalid_arg(reason: impl Into<String>) -> Self {
        Error::InvalidArg {
            reason: reason.into(),
        }
    }

    pub fn media_upload(reason: impl Into<String>) -> Self {
        Error::MediaUpload {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("receipt without id");
        assert!(format!("{err}").contains("receipt without id"));

        let err = Error::KeyStoreTx {
            reason: "store offline".into(),
        };
        assert!(format!("{err}").contains("store offline"));
    }
}
