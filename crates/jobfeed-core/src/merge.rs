use serde::Serialize;

use crate::identity;
use crate::models::{
    ChangeEvent, DedupKey, JobRecord, JobRecordRaw, ResultPage, RowIdentity, SearchQuery,
};
use crate::projection::{SortMode, sort_records};
use crate::seen::SeenIdTracker;

const STEM_SUFFIXES: &[&str] = &[
    "ments", "ment", "ings", "ing", "ers", "er", "ies", "es", "ed", "s",
];

/// Client-side check that a pushed insert plausibly belongs to the active
/// query: the source allow-list, then stem containment of any keyword in
/// title and description.
#[derive(Clone, Copy, Debug)]
pub struct RelevanceGate {
    min_stem_len: usize,
}

impl Default for RelevanceGate {
    fn default() -> Self {
        Self { min_stem_len: 4 }
    }
}

impl RelevanceGate {
    pub fn admits(&self, query: &SearchQuery, record: &JobRecord) -> bool {
        if !query.allows_source(&record.source) {
            return false;
        }
        if query.keywords().is_empty() {
            return true;
        }

        let haystack = format!("{} {}", record.title, record.description).to_lowercase();
        query.keywords().iter().any(|keyword| {
            let mut words = keyword.split_whitespace().peekable();
            words.peek().is_some()
                && words.all(|word| haystack.contains(self.stem(&word.to_lowercase()).as_str()))
        })
    }

    fn stem(&self, word: &str) -> String {
        for suffix in STEM_SUFFIXES {
            if let Some(stripped) = word.strip_suffix(suffix)
                && stripped.chars().count() >= self.min_stem_len
            {
                return stripped.to_string();
            }
        }
        word.to_string()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum SkipReason {
    Duplicate,
    Irrelevant,
    NotFound,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum MergeEffect {
    /// Spliced into the first page. `visible` is false when truncation to the
    /// page size pushed it straight back out.
    Inserted { key: DedupKey, visible: bool },
    /// Counted toward `total_found` while another page is shown.
    Counted { key: DedupKey },
    Updated { key: DedupKey },
    Deleted { key: DedupKey, counted: bool },
    Skipped(SkipReason),
}

impl MergeEffect {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeOutcome {
    pub page: ResultPage,
    pub effect: MergeEffect,
}

impl MergeOutcome {
    fn skipped(page: &ResultPage, reason: SkipReason) -> Self {
        Self {
            page: page.clone(),
            effect: MergeEffect::Skipped(reason),
        }
    }
}

/// Folds change-feed events into the page on screen. Every decision goes
/// through the record's `DedupKey`, so replaying an event is harmless.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChangeEventMerger {
    gate: RelevanceGate,
}

impl ChangeEventMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(gate: RelevanceGate) -> Self {
        Self { gate }
    }

    pub fn apply(
        &self,
        event: &ChangeEvent,
        current: &ResultPage,
        query: &SearchQuery,
        seen: &mut SeenIdTracker,
        sort_mode: SortMode,
    ) -> MergeOutcome {
        match event {
            ChangeEvent::Insert(record) => self.insert(record, current, query, seen),
            ChangeEvent::Update { identity, patch } => update(identity, patch, current, sort_mode),
            ChangeEvent::Delete(identity) => delete(identity, current, seen),
        }
    }

    fn insert(
        &self,
        record: &JobRecord,
        current: &ResultPage,
        query: &SearchQuery,
        seen: &mut SeenIdTracker,
    ) -> MergeOutcome {
        let key = identity::resolve(record);
        if current
            .records
            .iter()
            .any(|existing| identity::resolve(existing) == key)
        {
            return MergeOutcome::skipped(current, SkipReason::Duplicate);
        }
        // A seen key is either listed on another page or was already
        // counted, so splicing it in would list or count it twice.
        if seen.has_seen(&key) {
            return MergeOutcome::skipped(current, SkipReason::Duplicate);
        }
        if !self.gate.admits(query, record) {
            return MergeOutcome::skipped(current, SkipReason::Irrelevant);
        }

        let mut page = current.clone();
        seen.add(key.clone());
        page.set_total_found(page.total_found.saturating_add(1));

        if !page.is_first() {
            return MergeOutcome {
                page,
                effect: MergeEffect::Counted { key },
            };
        }

        page.records.push(record.clone().normalized());
        sort_records(&mut page.records, SortMode::Overall);
        page.records
            .truncate(usize::try_from(page.pagination.page_size).unwrap_or(usize::MAX));
        let visible = page
            .records
            .iter()
            .any(|existing| identity::resolve(existing) == key);

        MergeOutcome {
            page,
            effect: MergeEffect::Inserted { key, visible },
        }
    }
}

fn update(
    identity: &RowIdentity,
    patch: &JobRecordRaw,
    current: &ResultPage,
    sort_mode: SortMode,
) -> MergeOutcome {
    let Some(index) = current
        .records
        .iter()
        .position(|record| identity.matches(record))
    else {
        return MergeOutcome::skipped(current, SkipReason::NotFound);
    };

    let mut page = current.clone();
    let record = &mut page.records[index];
    apply_patch(record, patch);
    let key = identity::resolve(record);
    sort_records(&mut page.records, sort_mode);

    MergeOutcome {
        page,
        effect: MergeEffect::Updated { key },
    }
}

/// Overwrites mutable columns present in the patch. Identity columns (id,
/// source, external id, url) never change.
fn apply_patch(record: &mut JobRecord, patch: &JobRecordRaw) {
    if let Some(title) = &patch.title {
        record.title = title.clone();
    }
    if let Some(company) = &patch.company {
        record.company = company.clone();
    }
    if let Some(location) = &patch.location {
        record.location = location.clone();
    }
    if let Some(description) = &patch.description {
        record.description = description.clone();
    }
    if let Some(score) = patch.match_score {
        record.match_score = score;
    }
    if let Some(components) = &patch.match_components {
        record.match_components = Some(components.clone());
    }
    if patch.posted_date.is_some() {
        record.posted_date = patch.posted_date.clone();
    }
    if patch.location_tier.is_some() {
        record.location_tier = patch.location_tier;
    }
    if patch.is_remote.is_some() {
        record.is_remote = patch.is_remote;
    }
    record.normalize_scores();
}

fn delete(identity: &RowIdentity, current: &ResultPage, seen: &mut SeenIdTracker) -> MergeOutcome {
    let position = current
        .records
        .iter()
        .position(|record| identity.matches(record));

    let mut page = current.clone();
    let (key, counted) = match position {
        Some(index) => {
            let removed = page.records.remove(index);
            let key = identity::resolve(&removed);
            seen.remove(&key);
            (key, true)
        }
        None => match &identity.key {
            Some(key) if seen.remove(key) => (key.clone(), true),
            _ => return MergeOutcome::skipped(current, SkipReason::NotFound),
        },
    };

    if counted {
        page.set_total_found(page.total_found.saturating_sub(1));
    }

    MergeOutcome {
        page,
        effect: MergeEffect::Deleted { key, counted },
    }
}
