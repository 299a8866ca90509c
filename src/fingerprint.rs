// ABOUTME: Deterministic identity for property records
// ABOUTME: URL hash first, then a title/location/price/size fingerprint, then the full record

use crate::record::PropertyRecord;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Minimum number of identity attributes needed for the attribute fingerprint.
const MIN_IDENTITY_ATTRIBUTES: usize = 3;

/// Which rule produced an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Url,
    Attributes,
    FullRecord,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentitySource::Url => "url",
            IdentitySource::Attributes => "attributes",
            IdentitySource::FullRecord => "full_record",
        }
    }
}

/// Compute the registry key for a record.
///
/// Pure: the result depends only on the record contents.
pub fn generate_id(record: &PropertyRecord) -> String {
    generate_id_with_source(record).0
}

/// Like [`generate_id`], also reporting which rule was applied.
pub fn generate_id_with_source(record: &PropertyRecord) -> (String, IdentitySource) {
    if let Some(url) = record.url.as_ref().and_then(url_key) {
        return (hash(&url), IdentitySource::Url);
    }

    let attributes = identity_attributes(record);
    if attributes.len() >= MIN_IDENTITY_ATTRIBUTES {
        return (hash(&attributes.join("|")), IdentitySource::Attributes);
    }

    (
        hash(&canonical_serialization(record)),
        IdentitySource::FullRecord,
    )
}

/// Canonical URL for a string value; any other non-null value is used as is.
fn url_key(url: &Value) -> Option<String> {
    match url {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(canonical_url(s)),
        other => canonical_scalar(other),
    }
}

/// Present values of title, location, price and size, in that order.
fn identity_attributes(record: &PropertyRecord) -> Vec<String> {
    [&record.title, &record.location, &record.price, &record.size]
        .into_iter()
        .filter_map(|field| field.as_ref().and_then(canonical_scalar))
        .collect()
}

fn canonical_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(normalize_whitespace(s)).filter(|s| !s.is_empty()),
        other => Some(canonical_value(other).to_string()),
    }
}

/// Scheme and host are case-insensitive and default ports are implied; anything that does
/// not parse as an absolute URL is only trimmed.
fn canonical_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => trimmed.to_string(),
    }
}

/// Key-sorted JSON with whitespace normalized in every string.
fn canonical_serialization(record: &PropertyRecord) -> String {
    canonical_value(&Value::Object(record.fields())).to_string()
}

// serde_json maps are key-ordered, so rebuilding the tree is enough to fix the order.
fn canonical_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_whitespace(s)),
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
