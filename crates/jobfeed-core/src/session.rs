use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::AbortHandle;

use crate::backend::{SearchBackend, SearchRequest};
use crate::config::FeedConfig;
use crate::coordinator::{CommitOutcome, FetchPlan, FetchTicket, QueryCoordinator};
use crate::merge::{ChangeEventMerger, MergeEffect};
use crate::models::{
    ChangeEvent, ConnectionStatus, DedupKey, FeedError, FeedErrorKind, FeedResult, Pagination,
    SearchQuery,
};
use crate::projection::{self, ProjectedJob, QuickFilterKey, QuickFilters, SortMode, TierGroup};
use crate::supervisor::{ConnectionSupervisor, SupervisorAction};
use crate::transport::{ChangeFeedTransport, ChangeSink, SubscriptionFilter, TransportMessage};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// Forward navigation found nothing new; `page` is the page kept.
    NoMoreResults { page: u32 },
}

/// Everything a host needs to render the feed. Published after every state
/// change.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FeedView {
    pub query: Option<SearchQuery>,
    pub jobs: Vec<ProjectedJob>,
    /// `jobs` split into location-tier sections, by key.
    pub tiers: Vec<TierGroup>,
    pub pagination: Option<Pagination>,
    pub total_found: u64,
    pub loading: bool,
    /// A failed fetch, or else a change feed that ran out of retries.
    pub error: Option<FeedError>,
    pub connection: ConnectionStatus,
    pub notice: Option<Notice>,
    pub sort_mode: SortMode,
    pub filters: QuickFilters,
}

struct SessionState {
    coordinator: QueryCoordinator,
    supervisor: ConnectionSupervisor,
    sort_mode: SortMode,
    filters: QuickFilters,
    fresh: HashMap<DedupKey, AbortHandle>,
    notice: Option<(Notice, AbortHandle)>,
    reconnect_timer: Option<AbortHandle>,
    health_timer: Option<AbortHandle>,
    channel_error: Option<FeedError>,
    closed: bool,
}

impl SessionState {
    fn cancel_timers(&mut self) {
        for (_, timer) in self.fresh.drain() {
            timer.abort();
        }
        if let Some((_, timer)) = self.notice.take() {
            timer.abort();
        }
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.health_timer.take() {
            timer.abort();
        }
    }
}

struct SessionInner {
    config: FeedConfig,
    backend: Arc<dyn SearchBackend>,
    transport: Arc<dyn ChangeFeedTransport>,
    merger: ChangeEventMerger,
    state: Mutex<SessionState>,
    view: watch::Sender<FeedView>,
    tx: mpsc::UnboundedSender<(u64, TransportMessage)>,
    pump: AbortHandle,
}

/// One live feed: a paginated search merged with a change-feed
/// subscription. Cheap to clone; clones share the same session.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct FeedSession {
    inner: Arc<SessionInner>,
}

impl FeedSession {
    pub fn new(
        config: FeedConfig,
        backend: Arc<dyn SearchBackend>,
        transport: Arc<dyn ChangeFeedTransport>,
    ) -> FeedResult<Self> {
        config.validate()?;
        let supervisor = ConnectionSupervisor::new(
            config.backoff_policy(),
            config.health_check_interval(),
            config.max_failed_health_checks,
        );
        Ok(Self::with_supervisor(config, backend, transport, supervisor))
    }

    /// Same as [`FeedSession::new`] with a caller-built supervisor, mostly
    /// to pin the jitter seed.
    pub fn with_supervisor(
        config: FeedConfig,
        backend: Arc<dyn SearchBackend>,
        transport: Arc<dyn ChangeFeedTransport>,
        supervisor: ConnectionSupervisor,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (view, _) = watch::channel(FeedView::default());
        let state = SessionState {
            coordinator: QueryCoordinator::new(),
            supervisor,
            sort_mode: SortMode::default(),
            filters: QuickFilters::default(),
            fresh: HashMap::new(),
            notice: None,
            reconnect_timer: None,
            health_timer: None,
            channel_error: None,
            closed: false,
        };

        let inner = Arc::new_cyclic(|weak: &Weak<SessionInner>| {
            let pump = tokio::spawn(pump(weak.clone(), rx)).abort_handle();
            SessionInner {
                config,
                backend,
                transport,
                merger: ChangeEventMerger::new(),
                state: Mutex::new(state),
                view,
                tx,
                pump,
            }
        });
        Self { inner }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.inner.config
    }

    pub fn watch(&self) -> watch::Receiver<FeedView> {
        self.inner.view.subscribe()
    }

    pub fn snapshot(&self) -> FeedView {
        self.inner.view.borrow().clone()
    }

    /// Runs a search. Resolves once the fetch for it has been committed,
    /// discarded as superseded, or failed.
    pub async fn submit_query(&self, query: SearchQuery) -> FeedResult<()> {
        let plan = {
            let mut state = self.inner.open_state().await?;
            let class = query.class();
            let plan = state.coordinator.submit(query);
            let actions = state.supervisor.ensure(&class);
            self.inner.run_actions(&mut state, actions);
            self.inner.publish(&state);
            plan
        };
        self.inner.execute(plan).await
    }

    pub async fn go_to_page(&self, page: u32) -> FeedResult<()> {
        let plan = {
            let mut state = self.inner.open_state().await?;
            let plan = state.coordinator.go_to_page(page)?;
            self.inner.publish(&state);
            plan
        };
        self.inner.execute(plan).await
    }

    pub async fn set_page_size(&self, page_size: u32) -> FeedResult<()> {
        let plan = {
            let mut state = self.inner.open_state().await?;
            let plan = state.coordinator.set_page_size(page_size)?;
            self.inner.publish(&state);
            plan
        };
        self.inner.execute(plan).await
    }

    pub async fn set_sort_mode(&self, mode: SortMode) -> FeedResult<()> {
        let mut state = self.inner.open_state().await?;
        state.sort_mode = mode;
        state.coordinator.resort(mode);
        self.inner.publish(&state);
        Ok(())
    }

    pub async fn toggle_quick_filter(&self, key: QuickFilterKey) -> FeedResult<()> {
        let mut state = self.inner.open_state().await?;
        state.filters.toggle(key);
        self.inner.publish(&state);
        Ok(())
    }

    /// Restarts the change feed with a fresh retry budget.
    pub async fn retry_connection(&self) -> FeedResult<()> {
        let mut state = self.inner.open_state().await?;
        let actions = state.supervisor.retrigger();
        self.inner.run_actions(&mut state, actions);
        self.inner.publish(&state);
        Ok(())
    }

    /// Tears down the subscription and every timer. Later calls fail with
    /// `InvalidInput`.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        let actions = state.supervisor.teardown();
        self.inner.run_actions(&mut state, actions);
        state.cancel_timers();
        self.inner.pump.abort();
        self.inner.publish(&state);
        tracing::info!("feed session shut down");
    }
}

async fn pump(inner: Weak<SessionInner>, mut rx: mpsc::UnboundedReceiver<(u64, TransportMessage)>) {
    while let Some((epoch, message)) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_transport(epoch, message).await;
    }
}

impl SessionInner {
    async fn open_state(&self) -> FeedResult<tokio::sync::MutexGuard<'_, SessionState>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(FeedError::invalid_input("feed session is shut down"));
        }
        Ok(state)
    }

    async fn execute(self: &Arc<Self>, plan: FetchPlan) -> FeedResult<()> {
        let FetchPlan::Fetch(ticket) = plan else {
            return Ok(());
        };

        let request = SearchRequest::for_page(&ticket.query, ticket.page, self.config.user_id.clone());
        let backend = Arc::clone(&self.backend);
        let result = tokio::task::spawn_blocking(move || backend.search(&request))
            .await
            .map_err(|join_error| {
                FeedError::new(
                    FeedErrorKind::Internal,
                    format!("search task join failure: {join_error}"),
                )
            })
            .and_then(|result| result);

        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        let outcome = self.settle(&mut state, &ticket, result);
        self.publish(&state);
        outcome
    }

    fn settle(
        self: &Arc<Self>,
        state: &mut SessionState,
        ticket: &FetchTicket,
        result: FeedResult<crate::backend::SearchResponse>,
    ) -> FeedResult<()> {
        let response = match result {
            Ok(response) => response,
            Err(error) => {
                return if state.coordinator.fail(ticket, error.clone()) {
                    Err(error.on_page(ticket.page))
                } else {
                    Ok(())
                };
            }
        };

        let sort_mode = state.sort_mode;
        match state
            .coordinator
            .commit(ticket, response, &self.merger, sort_mode)
        {
            CommitOutcome::Committed { replayed, .. } => {
                for effect in replayed {
                    self.note_effect(state, &effect);
                }
            }
            CommitOutcome::NoMoreResults { page } => {
                self.show_notice(state, Notice::NoMoreResults { page });
            }
            CommitOutcome::Discarded => {}
        }
        Ok(())
    }

    async fn handle_transport(self: &Arc<Self>, epoch: u64, message: TransportMessage) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }

        match message {
            TransportMessage::Signal(signal) => {
                let actions = state.supervisor.on_signal(epoch, &signal, SystemTime::now());
                self.run_actions(&mut state, actions);
            }
            TransportMessage::Change(payload) => {
                if epoch != state.supervisor.epoch() {
                    tracing::debug!(epoch, "dropping change from replaced subscription");
                    return;
                }
                let event = match ChangeEvent::from_value(payload) {
                    Ok(event) => event,
                    Err(error) => {
                        tracing::warn!(epoch, error = %error, "dropping malformed change event");
                        return;
                    }
                };
                let sort_mode = state.sort_mode;
                if let Some(effect) = state
                    .coordinator
                    .apply_change(&event, &self.merger, sort_mode)
                {
                    tracing::debug!(kind = ?event.kind(), effect = ?effect, "merged change event");
                    self.note_effect(&mut state, &effect);
                }
            }
        }
        self.publish(&state);
    }

    fn note_effect(self: &Arc<Self>, state: &mut SessionState, effect: &MergeEffect) {
        if let MergeEffect::Inserted { key, visible: true } = effect {
            self.mark_fresh(state, key.clone());
        }
    }

    fn run_actions(self: &Arc<Self>, state: &mut SessionState, actions: Vec<SupervisorAction>) {
        for action in actions {
            match action {
                SupervisorAction::Subscribe { epoch, class } => {
                    state.channel_error = None;
                    let filter = SubscriptionFilter::for_class(class);
                    let sink = ChangeSink::new(epoch, self.tx.clone());
                    if let Err(error) = self.transport.subscribe(&filter, sink) {
                        tracing::warn!(epoch, error = %error, "change feed subscribe rejected");
                        let signal = crate::models::ChannelSignal::ChannelError(error.message);
                        if self
                            .tx
                            .send((epoch, TransportMessage::Signal(signal)))
                            .is_err()
                        {
                            tracing::warn!(
                                epoch,
                                "session pump is gone; subscribe failure not retried"
                            );
                        }
                    }
                }
                SupervisorAction::Unsubscribe { epoch } => {
                    state.channel_error = None;
                    self.transport.unsubscribe(epoch);
                }
                SupervisorAction::ScheduleReconnect { epoch, delay, .. } => {
                    let weak = Arc::downgrade(self);
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(inner) = weak.upgrade() {
                            inner.reconnect_due(epoch).await;
                        }
                    });
                    if let Some(previous) = state.reconnect_timer.replace(timer.abort_handle()) {
                        previous.abort();
                    }
                }
                SupervisorAction::CancelReconnect => {
                    if let Some(timer) = state.reconnect_timer.take() {
                        timer.abort();
                    }
                }
                SupervisorAction::StartHealthCheck { epoch, interval } => {
                    let weak = Arc::downgrade(self);
                    let timer = tokio::spawn(async move {
                        let mut ticks = tokio::time::interval_at(
                            tokio::time::Instant::now() + interval,
                            interval,
                        );
                        loop {
                            ticks.tick().await;
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            inner.probe(epoch).await;
                        }
                    });
                    if let Some(previous) = state.health_timer.replace(timer.abort_handle()) {
                        previous.abort();
                    }
                }
                SupervisorAction::StopHealthCheck => {
                    if let Some(timer) = state.health_timer.take() {
                        timer.abort();
                    }
                }
                SupervisorAction::GiveUp { epoch, attempts } => {
                    tracing::error!(epoch, attempts, "change feed gave up; waiting for manual retry");
                    state.channel_error = Some(FeedError::new(
                        FeedErrorKind::ChannelDisconnect,
                        format!("live updates stopped after {attempts} failed attempts"),
                    ));
                }
            }
        }
    }

    async fn reconnect_due(self: &Arc<Self>, epoch: u64) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.reconnect_timer = None;
        let actions = state.supervisor.on_reconnect_due(epoch);
        self.run_actions(&mut state, actions);
        self.publish(&state);
    }

    async fn probe(self: &Arc<Self>, epoch: u64) {
        let healthy = self.transport.probe(epoch);
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        let actions = state.supervisor.on_probe(epoch, healthy);
        if actions.is_empty() {
            return;
        }
        self.run_actions(&mut state, actions);
        self.publish(&state);
    }

    fn mark_fresh(self: &Arc<Self>, state: &mut SessionState, key: DedupKey) {
        let weak = Arc::downgrade(self);
        let delay = self.config.fresh_flag();
        let expiring = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.clear_fresh(&expiring).await;
            }
        });
        if let Some(previous) = state.fresh.insert(key, timer.abort_handle()) {
            previous.abort();
        }
    }

    async fn clear_fresh(&self, key: &DedupKey) {
        let mut state = self.state.lock().await;
        if state.fresh.remove(key).is_some() {
            self.publish(&state);
        }
    }

    fn show_notice(self: &Arc<Self>, state: &mut SessionState, notice: Notice) {
        let weak = Arc::downgrade(self);
        let delay = self.config.notice_dismiss();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.dismiss_notice(notice).await;
            }
        });
        if let Some((_, previous)) = state.notice.replace((notice, timer.abort_handle())) {
            previous.abort();
        }
    }

    async fn dismiss_notice(&self, notice: Notice) {
        let mut state = self.state.lock().await;
        if state.notice.as_ref().is_some_and(|(shown, _)| *shown == notice) {
            state.notice = None;
            self.publish(&state);
        }
    }

    fn publish(&self, state: &SessionState) {
        let fresh: HashSet<DedupKey> = state.fresh.keys().cloned().collect();
        let current = state.coordinator.current();
        let jobs = current
            .map(|page| projection::project(&page.records, &fresh, &state.filters, state.sort_mode))
            .unwrap_or_default();

        let tiers = projection::tier_groups(&jobs);
        let error = state
            .coordinator
            .error()
            .or(state.channel_error.as_ref())
            .cloned();

        self.view.send_replace(FeedView {
            query: state.coordinator.query().cloned(),
            jobs,
            tiers,
            pagination: current.map(|page| page.pagination),
            total_found: current.map(|page| page.total_found).unwrap_or_default(),
            loading: state.coordinator.is_loading(),
            error,
            connection: state.supervisor.status(),
            notice: state.notice.as_ref().map(|(notice, _)| *notice),
            sort_mode: state.sort_mode,
            filters: state.filters.clone(),
        });
    }
}
