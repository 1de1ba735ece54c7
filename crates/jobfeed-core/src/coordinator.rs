use std::collections::HashMap;

use crate::backend::SearchResponse;
use crate::cache::ResultPageCache;
use crate::identity;
use crate::merge::{ChangeEventMerger, MergeEffect};
use crate::models::{
    ChangeEvent, DedupKey, FeedError, FeedResult, JobRecord, Pagination, ResultPage, RowIdentity,
    SearchQuery,
};
use crate::projection::SortMode;
use crate::seen::SeenIdTracker;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FetchKind {
    /// First page of a new query class.
    Initial,
    /// Same class resubmitted; the old page stays on screen meanwhile.
    Refresh,
    Navigate { from: u32 },
    Resize,
}

/// Identifies one in-flight fetch. A response is committed only if its
/// ticket still matches the newest generation and sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchTicket {
    pub generation: u64,
    pub sequence: u64,
    pub page: u32,
    pub kind: FetchKind,
    pub query: SearchQuery,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FetchPlan {
    /// Nothing to fetch: served from cache or already showing.
    Ready,
    Fetch(FetchTicket),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommitOutcome {
    Committed { page: u32, replayed: Vec<MergeEffect> },
    /// Forward page brought nothing new; the previous page stays active.
    NoMoreResults { page: u32 },
    Discarded,
}

#[derive(Debug)]
struct PendingFetch {
    ticket: FetchTicket,
    buffered: Vec<ChangeEvent>,
}

/// Drives search submission and pagination for one session. Owns the page
/// cache and the seen-key tracker; nothing else mutates them.
#[derive(Debug, Default)]
pub struct QueryCoordinator {
    query: Option<SearchQuery>,
    current: Option<ResultPage>,
    cache: ResultPageCache,
    seen: SeenIdTracker,
    generation: u64,
    sequence: u64,
    pending: Option<PendingFetch>,
    error: Option<FeedError>,
}

impl QueryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) -> Option<&SearchQuery> {
        self.query.as_ref()
    }

    pub fn current(&self) -> Option<&ResultPage> {
        self.current.as_ref()
    }

    pub fn cache(&self) -> &ResultPageCache {
        &self.cache
    }

    pub fn seen(&self) -> &SeenIdTracker {
        &self.seen
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn error(&self) -> Option<&FeedError> {
        self.error.as_ref()
    }

    pub fn submit(&mut self, query: SearchQuery) -> FetchPlan {
        self.generation = self.generation.saturating_add(1);
        self.error = None;

        let previous = self.query.as_ref();
        let same_class = previous.is_some_and(|previous| previous.is_equivalent(&query));
        let same_size = previous.is_some_and(|previous| previous.page_size() == query.page_size());

        let class = query.class();
        self.cache.clear();
        self.cache.bind(&class, query.page_size());

        if same_class && same_size {
            let page = query.page();
            tracing::debug!(generation = self.generation, page, "refreshing equivalent query");
            self.query = Some(query);
            let buffered = self.take_buffered();
            return FetchPlan::Fetch(self.begin_fetch(page, FetchKind::Refresh, buffered));
        }

        if same_class {
            let logical = self.logical_page_for(query.page_size());
            self.query = Some(query.with_page(logical));
            let buffered = self.take_buffered();
            return FetchPlan::Fetch(self.begin_fetch(logical, FetchKind::Resize, buffered));
        }

        tracing::debug!(generation = self.generation, "new query class, starting over");
        self.seen.reset();
        self.current = None;
        self.pending = None;
        self.query = Some(query.with_page(1));
        FetchPlan::Fetch(self.begin_fetch(1, FetchKind::Initial, Vec::new()))
    }

    pub fn go_to_page(&mut self, page: u32) -> FeedResult<FetchPlan> {
        let query = self
            .query
            .clone()
            .ok_or_else(|| FeedError::invalid_input("no active query to paginate"))?;
        if page == 0 {
            return Err(FeedError::invalid_input("page numbers start at 1"));
        }

        let showing = self.current.as_ref().map(ResultPage::page);
        if showing == Some(page) && self.pending.is_none() {
            return Ok(FetchPlan::Ready);
        }

        if let Some(hit) = self.cache.get(page) {
            let mut hit = hit.clone();
            if let Some(current) = &self.current {
                hit.set_total_found(current.total_found);
            }
            tracing::debug!(page, "serving page from cache");
            // A cache hit supersedes any navigation still in flight.
            self.sequence = self.sequence.saturating_add(1);
            self.pending = None;
            self.current = Some(hit);
            self.query = Some(query.with_page(page));
            self.error = None;
            return Ok(FetchPlan::Ready);
        }

        let from = showing.unwrap_or(query.page());
        let buffered = self.take_buffered();
        Ok(FetchPlan::Fetch(self.begin_fetch(
            page,
            FetchKind::Navigate { from },
            buffered,
        )))
    }

    /// Changing the page size shifts every slice boundary, so the cache is
    /// dropped and the page holding the first visible row is refetched.
    pub fn set_page_size(&mut self, page_size: u32) -> FeedResult<FetchPlan> {
        let query = self
            .query
            .clone()
            .ok_or_else(|| FeedError::invalid_input("no active query to resize"))?;
        if page_size == 0 {
            return Err(FeedError::invalid_input("page_size must be positive"));
        }

        self.generation = self.generation.saturating_add(1);
        let logical = self.logical_page_for(page_size);
        let query = query.with_page_size(page_size).with_page(logical);
        self.cache.clear();
        self.cache.bind(&query.class(), page_size);
        self.query = Some(query);

        let buffered = self.take_buffered();
        Ok(FetchPlan::Fetch(self.begin_fetch(
            logical,
            FetchKind::Resize,
            buffered,
        )))
    }

    pub fn is_current(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation
            && self
                .pending
                .as_ref()
                .is_some_and(|pending| pending.ticket.sequence == ticket.sequence)
    }

    pub fn commit(
        &mut self,
        ticket: &FetchTicket,
        response: SearchResponse,
        merger: &ChangeEventMerger,
        sort_mode: SortMode,
    ) -> CommitOutcome {
        if !self.is_current(ticket) {
            tracing::debug!(
                page = ticket.page,
                generation = ticket.generation,
                "discarding superseded search response"
            );
            return CommitOutcome::Discarded;
        }
        let buffered = self
            .pending
            .take()
            .map(|pending| pending.buffered)
            .unwrap_or_default();

        let records = dedupe(response.jobs);

        if let FetchKind::Navigate { from } = ticket.kind
            && ticket.page > from
        {
            let nothing_new = response
                .no_more_results
                .unwrap_or_else(|| self.seen.all_seen(&records));
            if nothing_new {
                tracing::info!(page = ticket.page, kept = from, "no more results past current page");
                if let Some(current) = self.current.as_mut() {
                    current.pagination.has_next = false;
                    self.cache.put(current.page(), current.clone());
                }
                return CommitOutcome::NoMoreResults { page: from };
            }
        }

        let page_size = ticket.query.page_size();
        let total_found = response.total_found.max(records.len() as u64);
        let wire = &response.pagination;
        let pagination = if wire.total_pages > 0 && wire.page == ticket.page {
            Pagination {
                page: ticket.page,
                page_size,
                total_pages: wire.total_pages,
                has_next: wire.has_next_page,
                has_previous: wire.has_previous_page,
            }
        } else {
            Pagination::for_total(ticket.page, page_size, total_found)
        };
        let page = ResultPage::new(records, pagination, total_found);

        // Paging back to page 1 keeps the keys of later pages.
        if ticket.page == 1 && !matches!(ticket.kind, FetchKind::Navigate { .. }) {
            self.seen.seed(&page.records);
        } else {
            for record in &page.records {
                self.seen.add(identity::resolve(record));
            }
        }

        self.cache.put(ticket.page, page.clone());
        self.current = Some(page);
        self.query = self.query.take().map(|query| query.with_page(ticket.page));
        self.error = None;
        tracing::debug!(
            page = ticket.page,
            generation = ticket.generation,
            replay = buffered.len(),
            "committed search page"
        );

        let replayed = buffered
            .iter()
            .filter_map(|event| self.merge(event, merger, sort_mode))
            .filter(MergeEffect::changed)
            .collect();

        CommitOutcome::Committed {
            page: ticket.page,
            replayed,
        }
    }

    /// Records a failed fetch as a recoverable error. No retry happens here.
    pub fn fail(&mut self, ticket: &FetchTicket, error: FeedError) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.pending = None;
        tracing::warn!(page = ticket.page, error = %error, "search fetch failed");
        self.error = Some(error.on_page(ticket.page));
        true
    }

    /// Applies a change event to the page on screen. While a fetch is in
    /// flight the event is also buffered and replayed onto the fetched page.
    pub fn apply_change(
        &mut self,
        event: &ChangeEvent,
        merger: &ChangeEventMerger,
        sort_mode: SortMode,
    ) -> Option<MergeEffect> {
        if let Some(pending) = self.pending.as_mut() {
            pending.buffered.push(event.clone());
        }
        self.merge(event, merger, sort_mode)
    }

    /// Re-sorts the page on screen after the sort mode changed.
    pub fn resort(&mut self, sort_mode: SortMode) {
        if let Some(current) = self.current.as_mut() {
            crate::projection::sort_records(&mut current.records, sort_mode);
        }
    }

    fn merge(
        &mut self,
        event: &ChangeEvent,
        merger: &ChangeEventMerger,
        sort_mode: SortMode,
    ) -> Option<MergeEffect> {
        let query = self.query.as_ref()?;
        let current = self.current.as_ref()?;

        let resolved = match event {
            ChangeEvent::Delete(row)
                if !current.records.iter().any(|record| row.matches(record)) =>
            {
                self.cached_key(row, current.page()).map(|key| {
                    ChangeEvent::Delete(RowIdentity {
                        key: Some(key),
                        ..row.clone()
                    })
                })
            }
            _ => None,
        };
        let event = resolved.as_ref().unwrap_or(event);

        let outcome = merger.apply(event, current, query, &mut self.seen, sort_mode);
        let showing = outcome.page.page();

        if let ChangeEvent::Update { identity, .. } | ChangeEvent::Delete(identity) = event {
            let stale: Vec<u32> = self
                .cache
                .pages()
                .filter(|(page, cached)| {
                    *page != showing && cached.records.iter().any(|record| identity.matches(record))
                })
                .map(|(page, _)| page)
                .collect();
            for page in stale {
                tracing::debug!(page, "invalidating cached page touched by change");
                self.cache.invalidate(page);
            }
        }

        if outcome.effect.changed() {
            self.cache.put(showing, outcome.page.clone());
            self.current = Some(outcome.page);
        }
        Some(outcome.effect)
    }

    /// Key of a row listed on a cached page other than `showing`. Delete
    /// envelopes often carry only the primary key, which cannot be turned
    /// into a dedup key on its own.
    fn cached_key(&self, row: &RowIdentity, showing: u32) -> Option<DedupKey> {
        self.cache
            .pages()
            .filter(|(page, _)| *page != showing)
            .flat_map(|(_, cached)| cached.records.iter())
            .find(|record| row.matches(record))
            .map(identity::resolve)
    }

    fn begin_fetch(
        &mut self,
        page: u32,
        kind: FetchKind,
        buffered: Vec<ChangeEvent>,
    ) -> FetchTicket {
        self.sequence = self.sequence.saturating_add(1);
        let query = self
            .query
            .clone()
            .unwrap_or_else(|| SearchQuery::new(Vec::<String>::new()));
        let ticket = FetchTicket {
            generation: self.generation,
            sequence: self.sequence,
            page,
            kind,
            query,
        };
        tracing::debug!(
            page,
            generation = ticket.generation,
            sequence = ticket.sequence,
            kind = ?kind,
            "issuing search fetch"
        );
        self.pending = Some(PendingFetch {
            ticket: ticket.clone(),
            buffered,
        });
        ticket
    }

    fn take_buffered(&mut self) -> Vec<ChangeEvent> {
        self.pending
            .take()
            .map(|pending| pending.buffered)
            .unwrap_or_default()
    }

    fn logical_page_for(&self, page_size: u32) -> u32 {
        let Some(current) = &self.current else {
            return 1;
        };
        let first_row = u64::from(current.page().saturating_sub(1))
            * u64::from(current.pagination.page_size);
        u32::try_from(first_row / u64::from(page_size.max(1)) + 1).unwrap_or(1)
    }
}

/// Collapses records sharing a key: first position kept, latest fields win.
fn dedupe(records: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut positions: HashMap<DedupKey, usize> = HashMap::new();
    let mut unique: Vec<JobRecord> = Vec::with_capacity(records.len());
    for record in records {
        let record = record.normalized();
        let key = identity::resolve(&record);
        match positions.get(&key) {
            Some(&index) => unique[index] = record,
            None => {
                positions.insert(key, unique.len());
                unique.push(record);
            }
        }
    }
    unique
}
