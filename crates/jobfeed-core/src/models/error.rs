use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum FeedErrorKind {
    TransientNetwork,
    /// The change feed ran out of reconnect attempts.
    ChannelDisconnect,
    MalformedEvent,
    InvalidInput,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct FeedError {
    pub kind: FeedErrorKind,
    pub page: Option<u32>,
    pub message: String,
}

impl FeedError {
    pub fn new(kind: FeedErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            page: None,
            message: message.into(),
        }
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FeedErrorKind::InvalidInput, message)
    }

    pub fn malformed_event(message: impl Into<String>) -> Self {
        Self::new(FeedErrorKind::MalformedEvent, message)
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind, FeedErrorKind::TransientNetwork)
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
