use derive_more::Display;
use serde::Serialize;

/// Which transport currently feeds the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("reconnecting ({attempt})")]
    Reconnecting { attempt: u32 },
    #[display("polling fallback")]
    PollingFallback,
}

impl ConnectionState {
    /// True while the push channel is the active transport.
    pub fn is_push(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Pure transition table of the [`ConnectionManager`](super::ConnectionManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMachine {
    state: ConnectionState,
    max_reconnect_attempts: u32,
}

impl ConnectionMachine {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Connecting,
            max_reconnect_attempts: max_reconnect_attempts.max(1),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// A push session was established (initial connect, reconnect or probe).
    pub fn on_connected(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connected;
        self.state
    }

    /// A handshake failed or the live session was lost.
    pub fn on_failure(&mut self) -> ConnectionState {
        self.state = match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                ConnectionState::Reconnecting { attempt: 1 }
            }
            ConnectionState::Reconnecting { attempt } if attempt >= self.max_reconnect_attempts => {
                ConnectionState::PollingFallback
            }
            ConnectionState::Reconnecting { attempt } => ConnectionState::Reconnecting {
                attempt: attempt + 1,
            },
            ConnectionState::PollingFallback => ConnectionState::PollingFallback,
        };
        self.state
    }
}
