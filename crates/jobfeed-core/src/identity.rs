use crate::models::{DedupKey, JobRecord};

/// Derives `source:identity`, where identity is the external id, else the
/// trailing URL path segment, else the raw id.
pub fn resolve(record: &JobRecord) -> DedupKey {
    resolve_parts(
        &record.source,
        record.external_id.as_deref(),
        Some(record.url.as_str()),
        &record.id,
    )
}

pub fn resolve_parts(source: &str, external_id: Option<&str>, url: Option<&str>, id: &str) -> DedupKey {
    let identity = external_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| url.and_then(trailing_url_segment))
        .unwrap_or_else(|| id.trim());
    DedupKey::new(format!("{}:{identity}", source.trim()))
}

fn trailing_url_segment(url: &str) -> Option<&str> {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let path = without_fragment.split('?').next().unwrap_or_default();
    let path = path.trim().trim_end_matches('/');
    let path = path
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(path);
    let (_, segment) = path.rsplit_once('/')?;
    let segment = segment.trim();
    if segment.is_empty() { None } else { Some(segment) }
}
