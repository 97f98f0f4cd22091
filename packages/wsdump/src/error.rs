use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Failures while establishing the session. Nothing has been spawned yet when
/// one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("unsupported url scheme {0:?} (expected ws or wss)")]
    UnsupportedScheme(String),

    #[error("invalid {name} header value")]
    InvalidHeader { name: &'static str },

    #[error("tls configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),
}

/// Errors from an open connection, classified the way the dispatcher reacts
/// to them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The peer sent something that is not a valid frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection is no longer open.
    #[error("connection closed")]
    Closed,
}

impl ConnectionError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl From<tungstenite::Error> for ConnectionError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            e @ (tungstenite::Error::Protocol { .. }
            | tungstenite::Error::Capacity { .. }
            | tungstenite::Error::Utf8 { .. }
            | tungstenite::Error::HttpFormat { .. }) => Self::Protocol(e.to_string()),
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Anything that ends a session with a failure status.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Terminal output failure. Never propagated past the console.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("console write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("console lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] Box<figment::Error>),

    #[error("unknown encoding label: {0}")]
    UnknownEncoding(String),

    #[error("invalid verbosity {0:?}")]
    InvalidVerbosity(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_errors_map_to_closed() {
        assert_eq!(
            ConnectionError::from(tungstenite::Error::ConnectionClosed),
            ConnectionError::Closed
        );
        assert_eq!(
            ConnectionError::from(tungstenite::Error::AlreadyClosed),
            ConnectionError::Closed
        );
    }

    #[test]
    fn protocol_errors_are_classified() {
        let err = tungstenite::Error::Protocol(
            tungstenite::error::ProtocolError::ResetWithoutClosingHandshake,
        );
        assert!(ConnectionError::from(err).is_protocol());
    }

    #[test]
    fn io_errors_are_transport() {
        let err = tungstenite::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(matches!(
            ConnectionError::from(err),
            ConnectionError::Transport(_)
        ));
    }
}
