// ABOUTME: Registry document types - entries, bounded update history, metadata
// ABOUTME: Holds the in-memory registration logic shared by the store and queries

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::detector;
use crate::fingerprint;
use crate::record::PropertyRecord;

/// Maximum number of history items kept per entry.
pub const HISTORY_LIMIT: usize = 10;

/// Version written to `metadata.version`.
pub const REGISTRY_VERSION: &str = "1.0";

/// One logged update: when it happened and which fields differed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub changes: PropertyRecord,
}

/// Durable state for a single identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(with = "timestamp")]
    pub first_seen: DateTime<Utc>,
    /// Set on every logged update, absent until the first one.
    #[serde(
        default,
        with = "optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_history: Vec<HistoryItem>,
    /// Latest full snapshot. Empty only between creation and the first registration.
    #[serde(default)]
    pub data: PropertyRecord,
}

impl RegistryEntry {
    /// Create an entry with an empty baseline snapshot.
    pub fn new(first_seen: DateTime<Utc>) -> Self {
        Self {
            first_seen,
            last_updated: None,
            update_history: Vec::new(),
            data: PropertyRecord::default(),
        }
    }

    /// Log the diff against the current snapshot and replace it with `record`.
    fn apply_change(&mut self, record: &PropertyRecord, now: DateTime<Utc>) {
        let changes = record.diff_from(&self.data);
        self.update_history.push(HistoryItem {
            timestamp: now,
            changes,
        });
        if self.update_history.len() > HISTORY_LIMIT {
            let excess = self.update_history.len() - HISTORY_LIMIT;
            self.update_history.drain(..excess);
        }
        self.data = record.clone();
        self.last_updated = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryMetadata {
    pub version: String,
    /// Incremented once per save.
    pub total_updates: u64,
}

impl Default for RegistryMetadata {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            total_updates: 0,
        }
    }
}

/// How a single registration was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// Identity was unseen before this call.
    New,
    /// Identity existed and a significant field changed.
    Updated,
    /// Identity existed and nothing significant changed. The entry was not touched.
    Unchanged,
}

/// Result of [`Registry::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: String,
    pub outcome: RegistrationOutcome,
}

/// The full registry document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub properties: BTreeMap<String, RegistryEntry>,
    #[serde(with = "timestamp")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata: RegistryMetadata,
}

impl Registry {
    /// Create an empty registry.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            properties: BTreeMap::new(),
            last_updated: now,
            metadata: RegistryMetadata::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.properties.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.properties.get(id)
    }

    /// Classify `record` against the current state without mutating anything.
    pub fn classify(&self, id: &str, record: &PropertyRecord) -> RegistrationOutcome {
        match self.properties.get(id) {
            None => RegistrationOutcome::New,
            Some(entry) if detector::is_changed(Some(entry), record) => {
                RegistrationOutcome::Updated
            }
            Some(_) => RegistrationOutcome::Unchanged,
        }
    }

    /// Register `record` under `id`, or under its generated identity when `id` is None.
    ///
    /// First sight of an identity always logs one history item holding the initial field
    /// values (the diff against an empty snapshot), even when the record carries none of
    /// the significant fields.
    pub fn register(
        &mut self,
        record: &PropertyRecord,
        id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Registration {
        let id = match id {
            Some(id) => id.to_string(),
            None => fingerprint::generate_id(record),
        };
        let outcome = self.classify(&id, record);

        let entry = self
            .properties
            .entry(id.clone())
            .or_insert_with(|| RegistryEntry::new(now));

        if outcome != RegistrationOutcome::Unchanged {
            entry.apply_change(record, now);
        }

        tracing::debug!(id = %id, outcome = ?outcome, "registered property");
        Registration { id, outcome }
    }
}

/// RFC 3339 on write. On read, offset-less ISO 8601 timestamps are accepted as UTC.
mod timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
    }
}

mod optional_timestamp {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => timestamp::parse(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
