use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::FeedError;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Internship,
    Entry,
    Mid,
    Senior,
    Lead,
    Executive,
}

impl ExperienceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internship => "internship",
            Self::Entry => "entry",
            Self::Mid => "mid",
            Self::Senior => "senior",
            Self::Lead => "lead",
            Self::Executive => "executive",
        }
    }
}

/// Where the candidate wants to work: anywhere, remote only, or at the
/// query's explicit location.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkSetting {
    #[default]
    Any,
    Remote,
    Explicit,
}

impl WorkSetting {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Remote => "remote",
            Self::Explicit => "explicit",
        }
    }
}

/// The fields of a query that decide whether a live subscription and the
/// page cache can be reused. Comparison is case-insensitive and ignores
/// keyword order.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct QueryClass {
    pub keywords: BTreeSet<String>,
    pub location: String,
    pub sources: BTreeSet<String>,
}

impl QueryClass {
    pub fn is_subscribable(&self) -> bool {
        !self.keywords.is_empty() || !self.sources.is_empty()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SearchQueryDraft")]
pub struct SearchQuery {
    keywords: Vec<String>,
    location: String,
    skills: BTreeSet<String>,
    experience_level: Option<ExperienceLevel>,
    #[serde(rename = "where")]
    work_setting: WorkSetting,
    sources: BTreeSet<String>,
    page: u32,
    page_size: u32,
}

impl SearchQuery {
    pub fn new(keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keywords: normalize_keywords(keywords),
            location: String::new(),
            skills: BTreeSet::new(),
            experience_level: None,
            work_setting: WorkSetting::Any,
            sources: BTreeSet::new(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into().trim().to_string();
        self
    }

    pub fn with_skills(mut self, skills: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.skills = normalize_set(skills);
        self
    }

    pub fn with_experience_level(mut self, level: Option<ExperienceLevel>) -> Self {
        self.experience_level = level;
        self
    }

    pub fn with_work_setting(mut self, setting: WorkSetting) -> Self {
        self.work_setting = setting;
        self
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.sources = normalize_set(sources);
        self
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn skills(&self) -> &BTreeSet<String> {
        &self.skills
    }

    pub fn experience_level(&self) -> Option<ExperienceLevel> {
        self.experience_level
    }

    pub fn work_setting(&self) -> WorkSetting {
        self.work_setting
    }

    pub fn sources(&self) -> &BTreeSet<String> {
        &self.sources
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn class(&self) -> QueryClass {
        QueryClass {
            keywords: self
                .keywords
                .iter()
                .map(|keyword| keyword.to_lowercase())
                .collect(),
            location: self.location.to_lowercase(),
            sources: self
                .sources
                .iter()
                .map(|source| source.to_lowercase())
                .collect(),
        }
    }

    pub fn is_equivalent(&self, other: &SearchQuery) -> bool {
        self.class() == other.class()
    }

    pub fn allows_source(&self, source: &str) -> bool {
        self.sources.is_empty()
            || self
                .sources
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(source.trim()))
    }
}

#[derive(Deserialize)]
struct SearchQueryDraft {
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    experience_level: Option<ExperienceLevel>,
    #[serde(default, rename = "where")]
    work_setting: WorkSetting,
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl TryFrom<SearchQueryDraft> for SearchQuery {
    type Error = FeedError;

    fn try_from(draft: SearchQueryDraft) -> Result<Self, Self::Error> {
        if draft.page == 0 {
            return Err(FeedError::invalid_input("page numbers start at 1"));
        }
        if draft.page_size == 0 {
            return Err(FeedError::invalid_input("page_size must be positive"));
        }

        Ok(SearchQuery::new(draft.keywords)
            .with_location(draft.location)
            .with_skills(draft.skills)
            .with_experience_level(draft.experience_level)
            .with_work_setting(draft.work_setting)
            .with_sources(draft.sources)
            .with_page(draft.page)
            .with_page_size(draft.page_size))
    }
}

fn normalize_keywords(keywords: impl IntoIterator<Item = impl Into<String>>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut ordered = Vec::new();
    for keyword in keywords {
        let keyword = keyword.into().trim().to_string();
        if keyword.is_empty() {
            continue;
        }
        if seen.insert(keyword.to_lowercase()) {
            ordered.push(keyword);
        }
    }
    ordered
}

fn normalize_set(values: impl IntoIterator<Item = impl Into<String>>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|value| value.into().trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
