pub mod backoff;

pub use backoff::BackoffPolicy;

use std::time::{Duration, SystemTime};

use crate::models::{ChannelSignal, ConnectionState, ConnectionStats, ConnectionStatus, QueryClass};

/// Side effects the session must carry out after a transition. The
/// supervisor itself never touches the transport or the clock.
#[derive(Clone, Debug, PartialEq)]
pub enum SupervisorAction {
    Subscribe { epoch: u64, class: QueryClass },
    Unsubscribe { epoch: u64 },
    ScheduleReconnect { epoch: u64, attempt: u32, delay: Duration },
    CancelReconnect,
    StartHealthCheck { epoch: u64, interval: Duration },
    StopHealthCheck,
    GiveUp { epoch: u64, attempts: u32 },
}

/// Owns the change-feed subscription lifecycle for one query class.
///
/// Every subscribe attempt gets a fresh epoch; signals, timers and probes
/// carrying an older epoch are ignored.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    policy: BackoffPolicy,
    health_interval: Duration,
    max_failed_probes: u32,
    state: ConnectionState,
    stats: ConnectionStats,
    class: Option<QueryClass>,
    epoch: u64,
    exhausted: bool,
    rng: fastrand::Rng,
}

impl ConnectionSupervisor {
    pub fn new(policy: BackoffPolicy, health_interval: Duration, max_failed_probes: u32) -> Self {
        Self {
            policy,
            health_interval,
            max_failed_probes: max_failed_probes.max(1),
            state: ConnectionState::Idle,
            stats: ConnectionStats::default(),
            class: None,
            epoch: 0,
            exhausted: false,
            rng: fastrand::Rng::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn class(&self) -> Option<&QueryClass> {
        self.class.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            attempts: self.stats.attempts,
            exhausted: self.exhausted,
        }
    }

    /// Makes sure a subscription exists for `class`, reusing the live one
    /// when the class is unchanged. Classes without keywords or sources are
    /// never subscribed.
    pub fn ensure(&mut self, class: &QueryClass) -> Vec<SupervisorAction> {
        if !class.is_subscribable() {
            return self.teardown();
        }
        if self.class.as_ref() == Some(class) && self.state != ConnectionState::Idle {
            return Vec::new();
        }

        let mut actions = self.teardown();
        self.class = Some(class.clone());
        actions.extend(self.begin_subscribe());
        actions
    }

    pub fn teardown(&mut self) -> Vec<SupervisorAction> {
        if self.state == ConnectionState::Idle && self.class.is_none() {
            return Vec::new();
        }

        let mut actions = vec![SupervisorAction::StopHealthCheck, SupervisorAction::CancelReconnect];
        if self.state != ConnectionState::Idle {
            actions.push(SupervisorAction::Unsubscribe { epoch: self.epoch });
        }
        tracing::debug!(epoch = self.epoch, state = ?self.state, "tearing down change feed");

        self.state = ConnectionState::Idle;
        self.stats = ConnectionStats::default();
        self.class = None;
        self.exhausted = false;
        self.epoch = self.epoch.saturating_add(1);
        actions
    }

    pub fn on_signal(
        &mut self,
        epoch: u64,
        signal: &ChannelSignal,
        now: SystemTime,
    ) -> Vec<SupervisorAction> {
        if epoch != self.epoch || self.state == ConnectionState::Idle || self.exhausted {
            return Vec::new();
        }

        match signal {
            ChannelSignal::Subscribed => {
                self.state = ConnectionState::Subscribed;
                self.stats = ConnectionStats {
                    attempts: 0,
                    failed_probes: 0,
                    last_success_at: Some(now),
                };
                tracing::info!(epoch, "change feed subscribed");
                vec![SupervisorAction::StartHealthCheck {
                    epoch,
                    interval: self.health_interval,
                }]
            }
            ChannelSignal::ChannelError(message) => {
                tracing::warn!(epoch, message = %message, "change feed channel error");
                self.fail(ConnectionState::Error)
            }
            ChannelSignal::TimedOut => {
                tracing::warn!(epoch, "change feed timed out");
                self.fail(ConnectionState::TimedOut)
            }
            ChannelSignal::Closed => {
                tracing::warn!(epoch, "change feed closed");
                self.fail(ConnectionState::Closed)
            }
        }
    }

    /// Fires when a scheduled reconnect delay elapses.
    pub fn on_reconnect_due(&mut self, epoch: u64) -> Vec<SupervisorAction> {
        if epoch != self.epoch || !self.state.is_failed() || self.exhausted {
            return Vec::new();
        }
        let mut actions = vec![SupervisorAction::Unsubscribe { epoch }];
        actions.extend(self.begin_subscribe());
        actions
    }

    /// Records a health probe. Enough consecutive failures force a
    /// resubscribe even though the transport still claims to be connected.
    pub fn on_probe(&mut self, epoch: u64, healthy: bool) -> Vec<SupervisorAction> {
        if epoch != self.epoch || self.state != ConnectionState::Subscribed {
            return Vec::new();
        }
        if healthy {
            self.stats.failed_probes = 0;
            return Vec::new();
        }

        self.stats.failed_probes = self.stats.failed_probes.saturating_add(1);
        if self.stats.failed_probes < self.max_failed_probes {
            tracing::debug!(epoch, failed_probes = self.stats.failed_probes, "health probe failed");
            return Vec::new();
        }

        tracing::warn!(
            epoch,
            failed_probes = self.stats.failed_probes,
            "change feed looks dead, resubscribing"
        );
        self.stats.failed_probes = 0;
        let mut actions = vec![
            SupervisorAction::StopHealthCheck,
            SupervisorAction::Unsubscribe { epoch },
        ];
        actions.extend(self.begin_subscribe());
        actions
    }

    /// Manual restart, typically after the retry budget ran out.
    pub fn retrigger(&mut self) -> Vec<SupervisorAction> {
        if self.class.is_none()
            || matches!(
                self.state,
                ConnectionState::Subscribing | ConnectionState::Subscribed
            )
        {
            return Vec::new();
        }

        tracing::info!(epoch = self.epoch, "manual change feed retrigger");
        self.stats.attempts = 0;
        self.exhausted = false;
        let mut actions = vec![
            SupervisorAction::CancelReconnect,
            SupervisorAction::Unsubscribe { epoch: self.epoch },
        ];
        actions.extend(self.begin_subscribe());
        actions
    }

    fn begin_subscribe(&mut self) -> Vec<SupervisorAction> {
        let Some(class) = self.class.clone() else {
            return Vec::new();
        };
        self.epoch = self.epoch.saturating_add(1);
        self.state = ConnectionState::Subscribing;
        vec![SupervisorAction::Subscribe {
            epoch: self.epoch,
            class,
        }]
    }

    fn fail(&mut self, state: ConnectionState) -> Vec<SupervisorAction> {
        self.state = state;
        let mut actions = vec![SupervisorAction::StopHealthCheck];

        if self.policy.is_exhausted(self.stats.attempts) {
            self.exhausted = true;
            tracing::error!(
                epoch = self.epoch,
                attempts = self.stats.attempts,
                "change feed retry budget exhausted"
            );
            actions.push(SupervisorAction::CancelReconnect);
            actions.push(SupervisorAction::GiveUp {
                epoch: self.epoch,
                attempts: self.stats.attempts,
            });
            return actions;
        }

        self.stats.attempts = self.stats.attempts.saturating_add(1);
        let delay = self.policy.jittered(self.stats.attempts, &mut self.rng);
        tracing::info!(
            epoch = self.epoch,
            attempt = self.stats.attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling change feed reconnect"
        );
        actions.push(SupervisorAction::ScheduleReconnect {
            epoch: self.epoch,
            attempt: self.stats.attempts,
            delay,
        });
        actions
    }
}
