use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::identity;
use crate::models::{DedupKey, JobRecord, LocationTier};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    #[default]
    Overall,
    Skills,
    Recency,
    Location,
}

impl SortMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "overall" | "match" => Some(Self::Overall),
            "skills" => Some(Self::Skills),
            "recency" | "date" => Some(Self::Recency),
            "location" => Some(Self::Location),
            _ => None,
        }
    }

    fn component(self) -> Option<&'static str> {
        match self {
            Self::Skills => Some("skills"),
            Self::Location => Some("location"),
            Self::Overall | Self::Recency => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QuickFilterKey {
    Keyword(String),
    Location(String),
    Remote,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct QuickFilters {
    pub keywords: BTreeSet<String>,
    pub location: Option<String>,
    pub remote_only: bool,
}

impl QuickFilters {
    pub fn toggle(&mut self, key: QuickFilterKey) {
        match key {
            QuickFilterKey::Keyword(keyword) => {
                let keyword = keyword.trim().to_lowercase();
                if keyword.is_empty() {
                    return;
                }
                if !self.keywords.remove(&keyword) {
                    self.keywords.insert(keyword);
                }
            }
            QuickFilterKey::Location(location) => {
                let location = location.trim().to_lowercase();
                if location.is_empty() || self.location.as_deref() == Some(location.as_str()) {
                    self.location = None;
                } else {
                    self.location = Some(location);
                }
            }
            QuickFilterKey::Remote => self.remote_only = !self.remote_only,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.location.is_none() && !self.remote_only
    }

    pub fn accepts(&self, record: &JobRecord) -> bool {
        if self.remote_only && !record.looks_remote() {
            return false;
        }

        if let Some(location) = &self.location {
            let haystack = record.location.to_lowercase();
            if !location_aliases(location)
                .iter()
                .any(|alias| haystack.contains(alias.as_str()))
            {
                return false;
            }
        }

        if !self.keywords.is_empty() {
            let haystack = format!("{} {}", record.title, record.description).to_lowercase();
            if !self
                .keywords
                .iter()
                .all(|keyword| haystack.contains(keyword.as_str()))
            {
                return false;
            }
        }

        true
    }
}

const LOCATION_ALIASES: &[&[&str]] = &[
    &["new york", "nyc", "new york city", "manhattan", "brooklyn"],
    &["san francisco", "sf", "bay area", "san jose", "oakland"],
    &["los angeles", "la"],
    &["washington dc", "washington, dc", "dc"],
    &["united states", "usa", "us"],
    &["united kingdom", "uk", "london", "england"],
    &["bangalore", "bengaluru"],
    &["mumbai", "bombay"],
    &["remote", "anywhere", "work from home", "wfh"],
];

/// Expands a location chip to every spelling the chip should match.
/// Short aliases only expand outward; "us" alone would match "austin".
pub fn location_aliases(location: &str) -> Vec<String> {
    let needle = location.trim().to_lowercase();
    let mut expanded = vec![needle.clone()];
    for group in LOCATION_ALIASES {
        if group.contains(&needle.as_str()) {
            expanded.extend(
                group
                    .iter()
                    .filter(|alias| alias.len() > 2 && **alias != needle)
                    .map(|alias| alias.to_string()),
            );
        }
    }
    expanded
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectedJob {
    pub key: DedupKey,
    pub record: JobRecord,
    pub fresh: bool,
}

/// Sorts in place by the active mode. Stable: ties keep incoming order.
pub fn sort_records(records: &mut [JobRecord], mode: SortMode) {
    records.sort_by(|left, right| compare(left, right, mode));
}

fn compare(left: &JobRecord, right: &JobRecord, mode: SortMode) -> Ordering {
    match mode {
        SortMode::Overall => descending(left.match_score, right.match_score),
        SortMode::Skills | SortMode::Location => {
            let name = mode.component().unwrap_or_default();
            descending(
                left.component(name).unwrap_or(left.match_score),
                right.component(name).unwrap_or(right.match_score),
            )
        }
        SortMode::Recency => match (left.posted_at(), right.posted_at()) {
            (Some(l), Some(r)) => r.cmp(&l),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => descending(left.match_score, right.match_score),
        },
    }
}

fn descending(left: f64, right: f64) -> Ordering {
    right.total_cmp(&left)
}

/// Filters and orders merged records for display. Pure: the same inputs
/// always produce the same sequence.
pub fn project(
    records: &[JobRecord],
    fresh: &HashSet<DedupKey>,
    filters: &QuickFilters,
    mode: SortMode,
) -> Vec<ProjectedJob> {
    let mut visible: Vec<JobRecord> = records
        .iter()
        .filter(|record| filters.accepts(record))
        .cloned()
        .collect();
    sort_records(&mut visible, mode);

    visible
        .into_iter()
        .map(|record| {
            let key = identity::resolve(&record);
            let fresh = fresh.contains(&key);
            ProjectedJob { key, record, fresh }
        })
        .collect()
}

/// Groups projected rows by location tier, keeping display order inside each
/// group. Untiered rows land under `None`.
pub fn group_by_tier(jobs: &[ProjectedJob]) -> BTreeMap<Option<LocationTier>, Vec<&ProjectedJob>> {
    let mut groups: BTreeMap<Option<LocationTier>, Vec<&ProjectedJob>> = BTreeMap::new();
    for job in jobs {
        groups.entry(job.record.location_tier).or_default().push(job);
    }
    groups
}

/// One location-tier section of the view, rows in display order.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TierGroup {
    pub tier: Option<LocationTier>,
    pub keys: Vec<DedupKey>,
}

/// Tier sections for hosts that render the feed grouped by location. The
/// closest tier leads and untiered rows come last.
pub fn tier_groups(jobs: &[ProjectedJob]) -> Vec<TierGroup> {
    let mut groups: Vec<TierGroup> = group_by_tier(jobs)
        .into_iter()
        .map(|(tier, rows)| TierGroup {
            tier,
            keys: rows.into_iter().map(|job| job.key.clone()).collect(),
        })
        .collect();
    groups.sort_by_key(|group| group.tier.is_none());
    groups
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use super::{
        QuickFilterKey, QuickFilters, SortMode, group_by_tier, location_aliases, project, tier_groups,
    };
    use crate::models::{JobRecord, LocationTier};

    fn job(id: &str, score: f64) -> JobRecord {
        JobRecord::new(id, "A", format!("Engineer {id}"), score)
    }

    fn ids(jobs: &[super::ProjectedJob]) -> Vec<&str> {
        jobs.iter().map(|job| job.record.id.as_str()).collect()
    }

    #[test]
    fn overall_sort_is_stable_for_ties() {
        let records = vec![job("a", 0.5), job("b", 0.9), job("c", 0.5), job("d", 0.5)];
        let first = project(&records, &HashSet::new(), &QuickFilters::default(), SortMode::Overall);
        let second = project(&records, &HashSet::new(), &QuickFilters::default(), SortMode::Overall);
        assert_eq!(ids(&first), ["b", "a", "c", "d"]);
        assert_eq!(first, second);
    }

    #[test]
    fn component_sort_falls_back_to_overall() {
        let mut strong_skills = job("a", 0.2);
        strong_skills.match_components = Some(BTreeMap::from([("skills".to_string(), 0.95)]));
        let no_components = job("b", 0.6);

        let projected = project(
            &[no_components, strong_skills],
            &HashSet::new(),
            &QuickFilters::default(),
            SortMode::Skills,
        );
        assert_eq!(ids(&projected), ["a", "b"]);
    }

    #[test]
    fn recency_puts_undated_rows_last() {
        let mut old = job("old", 0.9);
        old.posted_date = Some("2024-01-01".to_string());
        let mut new = job("new", 0.1);
        new.posted_date = Some("2024-06-01T00:00:00Z".to_string());
        let undated = job("undated", 1.0);

        let projected = project(
            &[undated, old, new],
            &HashSet::new(),
            &QuickFilters::default(),
            SortMode::Recency,
        );
        assert_eq!(ids(&projected), ["new", "old", "undated"]);
    }

    #[test]
    fn location_chip_expands_aliases() {
        let mut nyc = job("nyc", 0.5);
        nyc.location = "Brooklyn, NY".to_string();
        let mut berlin = job("berlin", 0.5);
        berlin.location = "Berlin".to_string();

        let mut filters = QuickFilters::default();
        filters.toggle(QuickFilterKey::Location("NYC".to_string()));
        let projected = project(&[nyc, berlin], &HashSet::new(), &filters, SortMode::Overall);
        assert_eq!(ids(&projected), ["nyc"]);

        assert!(location_aliases("nyc").contains(&"new york".to_string()));
        assert!(!location_aliases("austin").contains(&"us".to_string()));
    }

    #[test]
    fn toggling_twice_removes_the_chip() {
        let mut filters = QuickFilters::default();
        filters.toggle(QuickFilterKey::Keyword("Rust".to_string()));
        filters.toggle(QuickFilterKey::Remote);
        assert!(filters.keywords.contains("rust"));
        assert!(filters.remote_only);

        filters.toggle(QuickFilterKey::Keyword("rust".to_string()));
        filters.toggle(QuickFilterKey::Remote);
        assert!(filters.is_empty());
    }

    #[test]
    fn remote_and_keyword_chips_combine() {
        let mut remote_rust = job("1", 0.5);
        remote_rust.location = "Remote (EU)".to_string();
        remote_rust.description = "Rust services".to_string();
        let mut onsite_rust = job("2", 0.5);
        onsite_rust.description = "Rust services".to_string();
        onsite_rust.is_remote = Some(false);

        let mut filters = QuickFilters::default();
        filters.toggle(QuickFilterKey::Remote);
        filters.toggle(QuickFilterKey::Keyword("rust".to_string()));
        let projected = project(&[remote_rust, onsite_rust], &HashSet::new(), &filters, SortMode::Overall);
        assert_eq!(ids(&projected), ["1"]);
    }

    #[test]
    fn groups_rows_by_tier() {
        let mut exact = job("1", 0.5);
        exact.location_tier = Some(LocationTier::Exact);
        let other = job("2", 0.4);

        let projected = project(&[exact, other], &HashSet::new(), &QuickFilters::default(), SortMode::Overall);
        let groups = group_by_tier(&projected);
        assert_eq!(groups[&Some(LocationTier::Exact)].len(), 1);
        assert_eq!(groups[&None].len(), 1);
    }

    #[test]
    fn tier_sections_put_untiered_rows_last() {
        let untiered = job("1", 0.9);
        let mut country = job("2", 0.8);
        country.location_tier = Some(LocationTier::Country);
        let mut exact = job("3", 0.7);
        exact.location_tier = Some(LocationTier::Exact);
        let mut also_exact = job("4", 0.6);
        also_exact.location_tier = Some(LocationTier::Exact);

        let projected = project(
            &[untiered, country, exact, also_exact],
            &HashSet::new(),
            &QuickFilters::default(),
            SortMode::Overall,
        );
        let sections = tier_groups(&projected);

        let tiers: Vec<_> = sections.iter().map(|section| section.tier).collect();
        assert_eq!(
            tiers,
            [Some(LocationTier::Exact), Some(LocationTier::Country), None]
        );
        let exact_keys: Vec<&str> = sections[0].keys.iter().map(|key| key.as_str()).collect();
        assert_eq!(exact_keys, ["A:3", "A:4"]);
    }
}
