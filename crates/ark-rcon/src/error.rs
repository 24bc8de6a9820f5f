use std::io::Error as IoError;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum RconError {
    #[error("authentication rejected by server")]
    Auth,
    #[error("failed to connect to {host}")]
    Connect {
        host: String,
        #[source]
        source: IoError,
    },
    #[error("no complete response within {0:?}")]
    Timeout(Duration),
    #[error("connection closed mid-exchange")]
    ConnectionLost,
    #[error("malformed packet: {0}")]
    Protocol(String),
    #[error("socket error")]
    Io(#[from] IoError),
}

impl RconError {
    /// Connection-level errors warrant one reconnect-and-retry.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::ConnectionLost | Self::Io(_)
        )
    }
}
