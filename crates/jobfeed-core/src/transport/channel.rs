use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::models::{ChannelSignal, FeedError, FeedResult};
use crate::transport::{ChangeFeedTransport, ChangeSink, SubscriptionFilter};

/// Transport driven from outside: the embedding host (or a test) owns the
/// real socket and forwards its traffic here.
#[derive(Default)]
pub struct ChannelTransport {
    state: Mutex<ChannelState>,
}

#[derive(Default)]
struct ChannelState {
    subscriptions: BTreeMap<u64, (SubscriptionFilter, ChangeSink)>,
    unhealthy: bool,
    auto_ack: bool,
    subscribe_calls: usize,
    reject_next: Option<String>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge every subscribe immediately.
    pub fn with_auto_ack() -> Self {
        let transport = Self::default();
        transport.lock().auto_ack = true;
        transport
    }

    /// Delivers a change payload to every live subscription.
    pub fn publish(&self, payload: serde_json::Value) -> usize {
        let state = self.lock();
        state
            .subscriptions
            .values()
            .filter(|(_, sink)| sink.change(payload.clone()))
            .count()
    }

    pub fn publish_json(&self, raw: &str) -> FeedResult<usize> {
        let payload = serde_json::from_str(raw)
            .map_err(|error| FeedError::malformed_event(format!("invalid change payload: {error}")))?;
        Ok(self.publish(payload))
    }

    /// Reports a lifecycle signal on every live subscription.
    pub fn report(&self, signal: ChannelSignal) -> usize {
        let state = self.lock();
        state
            .subscriptions
            .values()
            .filter(|(_, sink)| sink.signal(signal.clone()))
            .count()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.lock().unhealthy = !healthy;
    }

    pub fn reject_next_subscribe(&self, message: impl Into<String>) {
        self.lock().reject_next = Some(message.into());
    }

    pub fn active_epochs(&self) -> Vec<u64> {
        self.lock().subscriptions.keys().copied().collect()
    }

    pub fn active_filters(&self) -> Vec<SubscriptionFilter> {
        self.lock()
            .subscriptions
            .values()
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ChangeFeedTransport for ChannelTransport {
    fn subscribe(&self, filter: &SubscriptionFilter, sink: ChangeSink) -> FeedResult<()> {
        let mut state = self.lock();
        state.subscribe_calls += 1;

        if let Some(message) = state.reject_next.take() {
            sink.signal(ChannelSignal::ChannelError(message));
            return Ok(());
        }
        if state.auto_ack {
            sink.signal(ChannelSignal::Subscribed);
        }
        state
            .subscriptions
            .insert(sink.epoch(), (filter.clone(), sink));
        Ok(())
    }

    fn unsubscribe(&self, epoch: u64) {
        self.lock().subscriptions.remove(&epoch);
    }

    fn probe(&self, epoch: u64) -> bool {
        let state = self.lock();
        !state.unhealthy
            && state
                .subscriptions
                .get(&epoch)
                .is_some_and(|(_, sink)| !sink.is_closed())
    }
}
