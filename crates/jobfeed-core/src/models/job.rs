use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{FeedError, FeedResult};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationTier {
    Exact,
    City,
    Country,
    Other,
}

/// Stable identity of a posting across the search API and the change feed.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DedupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    #[serde(default)]
    pub external_id: Option<String>,
    pub source: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub match_score: f64,
    #[serde(default)]
    pub match_components: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub location_tier: Option<LocationTier>,
    #[serde(default)]
    pub is_remote: Option<bool>,
}

impl JobRecord {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        title: impl Into<String>,
        match_score: f64,
    ) -> Self {
        Self {
            id: id.into(),
            external_id: None,
            source: source.into(),
            title: title.into(),
            company: String::new(),
            location: String::new(),
            description: String::new(),
            url: String::new(),
            posted_date: None,
            match_score: clamp_score(match_score),
            match_components: None,
            location_tier: None,
            is_remote: None,
        }
    }

    /// Clamps scores into `[0, 1]`; backends occasionally send percentages
    /// or NaN for unscored rows.
    pub fn normalized(mut self) -> Self {
        self.normalize_scores();
        self
    }

    pub fn normalize_scores(&mut self) {
        self.match_score = clamp_score(self.match_score);
        if let Some(components) = self.match_components.as_mut() {
            for value in components.values_mut() {
                *value = clamp_score(*value);
            }
        }
    }

    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.posted_date.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn component(&self, name: &str) -> Option<f64> {
        self.match_components
            .as_ref()
            .and_then(|components| components.get(name).copied())
    }

    pub fn looks_remote(&self) -> bool {
        if let Some(remote) = self.is_remote {
            return remote;
        }
        self.location.to_lowercase().contains("remote")
            || self.title.to_lowercase().contains("remote")
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    if score > 1.0 && score <= 100.0 {
        return score / 100.0;
    }
    score.clamp(0.0, 1.0)
}

/// A row as delivered by the change feed. Every column may be missing;
/// deletes usually carry only the primary key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRecordRaw {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
    #[serde(default)]
    pub match_score: Option<f64>,
    #[serde(default)]
    pub match_components: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub location_tier: Option<LocationTier>,
    #[serde(default)]
    pub is_remote: Option<bool>,
}

impl JobRecordRaw {
    pub fn id(&self) -> Option<&str> {
        non_blank(self.id.as_deref())
    }

    pub fn source(&self) -> Option<&str> {
        non_blank(self.source.as_deref())
    }

    pub fn into_record(self) -> FeedResult<JobRecord> {
        let id = self
            .id()
            .map(str::to_owned)
            .ok_or_else(|| FeedError::malformed_event("change row is missing 'id'"))?;
        let source = self
            .source()
            .map(str::to_owned)
            .ok_or_else(|| FeedError::malformed_event(format!("change row '{id}' has no source")))?;

        Ok(JobRecord {
            id,
            external_id: self.external_id,
            source,
            title: self.title.unwrap_or_default(),
            company: self.company.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            url: self.url.unwrap_or_default(),
            posted_date: self.posted_date,
            match_score: self.match_score.unwrap_or(0.0),
            match_components: self.match_components,
            location_tier: self.location_tier,
            is_remote: self.is_remote,
        }
        .normalized())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
