pub mod channel;

pub use channel::ChannelTransport;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::models::{ChannelSignal, FeedResult, QueryClass};

pub const POSTINGS_TABLE: &str = "job_postings";

/// What a subscription listens to: row changes on the postings table,
/// narrowed to the coarse criteria of a query class.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SubscriptionFilter {
    pub table: &'static str,
    pub class: QueryClass,
}

impl SubscriptionFilter {
    pub fn for_class(class: QueryClass) -> Self {
        Self {
            table: POSTINGS_TABLE,
            class,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TransportMessage {
    Signal(ChannelSignal),
    Change(serde_json::Value),
}

/// Handed to the transport on subscribe. Everything pushed through it is
/// tagged with the subscription epoch, so the session can drop traffic
/// from subscriptions it already replaced.
#[derive(Clone, Debug)]
pub struct ChangeSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportMessage)>,
}

impl ChangeSink {
    pub fn new(epoch: u64, tx: mpsc::UnboundedSender<(u64, TransportMessage)>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn signal(&self, signal: ChannelSignal) -> bool {
        self.tx
            .send((self.epoch, TransportMessage::Signal(signal)))
            .is_ok()
    }

    pub fn change(&self, payload: serde_json::Value) -> bool {
        self.tx
            .send((self.epoch, TransportMessage::Change(payload)))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Push side of the feed. Calls must not block: acknowledgements and
/// failures arrive later through the sink.
pub trait ChangeFeedTransport: Send + Sync {
    fn subscribe(&self, filter: &SubscriptionFilter, sink: ChangeSink) -> FeedResult<()>;

    fn unsubscribe(&self, epoch: u64);

    /// Cheap liveness check for the subscription with this epoch.
    fn probe(&self, epoch: u64) -> bool;
}
