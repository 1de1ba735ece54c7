use serde::{Deserialize, Serialize};

use crate::identity;
use crate::models::{DedupKey, FeedError, FeedResult, JobRecord, JobRecordRaw};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Envelope as delivered by the postings change feed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub new: Option<JobRecordRaw>,
    #[serde(default)]
    pub old: Option<JobRecordRaw>,
}

/// Identity of a changed row. `key` is present only when the row carried a
/// source; otherwise the row is matched by its primary key.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RowIdentity {
    pub id: String,
    pub source: Option<String>,
    pub key: Option<DedupKey>,
}

impl RowIdentity {
    fn from_raw(raw: &JobRecordRaw) -> FeedResult<Self> {
        let id = raw
            .id()
            .ok_or_else(|| FeedError::malformed_event("change row is missing 'id'"))?
            .to_string();
        let source = raw.source().map(str::to_owned);
        let key = source.as_deref().map(|source| {
            identity::resolve_parts(
                source,
                raw.external_id.as_deref(),
                raw.url.as_deref(),
                &id,
            )
        });
        Ok(Self { id, source, key })
    }

    pub fn matches(&self, record: &JobRecord) -> bool {
        if let Some(key) = &self.key
            && identity::resolve(record) == *key
        {
            return true;
        }
        record.id == self.id
            && self
                .source
                .as_deref()
                .is_none_or(|source| source.eq_ignore_ascii_case(&record.source))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChangeEvent {
    Insert(JobRecord),
    Update {
        identity: RowIdentity,
        patch: JobRecordRaw,
    },
    Delete(RowIdentity),
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Insert(_) => ChangeKind::Insert,
            Self::Update { .. } => ChangeKind::Update,
            Self::Delete(_) => ChangeKind::Delete,
        }
    }

    pub fn from_json(payload: &str) -> FeedResult<Self> {
        let envelope: ChangeEnvelope = serde_json::from_str(payload).map_err(|error| {
            FeedError::malformed_event(format!("unparseable change envelope: {error}"))
        })?;
        Self::from_envelope(envelope)
    }

    pub fn from_value(payload: serde_json::Value) -> FeedResult<Self> {
        let envelope: ChangeEnvelope = serde_json::from_value(payload).map_err(|error| {
            FeedError::malformed_event(format!("unparseable change envelope: {error}"))
        })?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: ChangeEnvelope) -> FeedResult<Self> {
        let kind = ChangeKind::parse(&envelope.event_type).ok_or_else(|| {
            FeedError::malformed_event(format!(
                "unknown change event type '{}'",
                envelope.event_type
            ))
        })?;

        match kind {
            ChangeKind::Insert => {
                let row = envelope
                    .new
                    .ok_or_else(|| FeedError::malformed_event("insert without 'new' row"))?;
                Ok(Self::Insert(row.into_record()?))
            }
            ChangeKind::Update => {
                let mut patch = envelope
                    .new
                    .ok_or_else(|| FeedError::malformed_event("update without 'new' row"))?;
                if let Some(old) = envelope.old.as_ref() {
                    if patch.id().is_none() {
                        patch.id = old.id.clone();
                    }
                    if patch.source().is_none() {
                        patch.source = old.source.clone();
                    }
                }
                let identity = RowIdentity::from_raw(&patch)?;
                Ok(Self::Update { identity, patch })
            }
            ChangeKind::Delete => {
                let row = envelope
                    .old
                    .ok_or_else(|| FeedError::malformed_event("delete without 'old' row"))?;
                Ok(Self::Delete(RowIdentity::from_raw(&row)?))
            }
        }
    }
}
