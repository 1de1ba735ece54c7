use std::time::SystemTime;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Subscribing,
    Subscribed,
    Error,
    TimedOut,
    Closed,
}

impl ConnectionState {
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Error | Self::TimedOut | Self::Closed)
    }
}

/// Lifecycle callback reported by the change-feed transport.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ChannelSignal {
    Subscribed,
    ChannelError(String),
    TimedOut,
    Closed,
}

impl ChannelSignal {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUBSCRIBED" => Some(Self::Subscribed),
            "CHANNEL_ERROR" | "CHANNELERROR" | "ERROR" => {
                Some(Self::ChannelError("reported by host".to_string()))
            }
            "TIMED_OUT" | "TIMEDOUT" => Some(Self::TimedOut),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ConnectionStats {
    pub attempts: u32,
    pub failed_probes: u32,
    #[serde(skip)]
    pub last_success_at: Option<SystemTime>,
}

/// Caller-visible connection summary. Failures stay invisible until the
/// retry budget is spent.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempts: u32,
    pub exhausted: bool,
}
