use crate::types::{SourceId, WeightCategory};
use thiserror::Error;

/// All errors generated in `oracle-monitor`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("push channel closed by server")]
    ChannelClosed,

    #[error("push channel read timeout: no frames for {0} seconds")]
    ReadTimeout(u64),

    #[error("HTTP request to {endpoint} failed: {reason}")]
    Http { endpoint: String, reason: String },

    #[error("unexpected HTTP status {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("local storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("weight {value} for {category}/{source_id} is outside [0, 2]")]
    WeightOutOfRange {
        category: WeightCategory,
        source_id: SourceId,
        value: f64,
    },
}

impl MonitorError {
    /// Determine if an error means the push session is gone and the
    /// [`ConnectionManager`](crate::connection::ConnectionManager) must reconnect.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_disconnect(&self) -> bool {
        match self {
            MonitorError::Transport(_) | MonitorError::ChannelClosed | MonitorError::ReadTimeout(_) => {
                true
            }
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MonitorError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(value: std::io::Error) -> Self {
        Self::Storage(value.to_string())
    }
}
