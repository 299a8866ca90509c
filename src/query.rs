// ABOUTME: Read-only queries over a loaded registry for downstream reporting
// ABOUTME: Recently changed listings, per-identity lookup, and registry statistics

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::record::PropertyRecord;
use crate::registry::{Registry, RegistryEntry};

/// Answers questions about a registry without mutating it.
pub struct QueryEngine<'a> {
    registry: &'a Registry,
}

/// Aggregate numbers for `stats` reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_properties: usize,
    /// Entries with at least one logged update.
    pub tracked_properties: usize,
    pub history_items: usize,
    pub total_updates: u64,
    pub version: String,
    pub last_updated: DateTime<Utc>,
    pub oldest_first_seen: Option<DateTime<Utc>>,
    pub newest_change: Option<DateTime<Utc>>,
}

impl<'a> QueryEngine<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Snapshots of entries whose `last_updated` lies in `[now - window_days, now]`.
    pub fn recently_changed(&self, window_days: u32) -> Vec<PropertyRecord> {
        self.recently_changed_at(window_days, Utc::now())
    }

    /// Same as [`recently_changed`](Self::recently_changed) with an explicit `now`.
    ///
    /// Entries that were never updated are skipped regardless of `first_seen`.
    pub fn recently_changed_at(
        &self,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Vec<PropertyRecord> {
        // Windows reaching past the representable range cover the whole registry.
        let cutoff = now
            .checked_sub_signed(Duration::days(i64::from(window_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent: Vec<PropertyRecord> = self
            .registry
            .properties
            .values()
            .filter(|entry| {
                entry
                    .last_updated
                    .is_some_and(|ts| ts >= cutoff && ts <= now)
            })
            .map(|entry| entry.data.clone())
            .collect();

        tracing::info!(
            "Found {} properties changed in the last {} days",
            recent.len(),
            window_days
        );
        recent
    }

    pub fn lookup(&self, id: &str) -> Option<&'a RegistryEntry> {
        self.registry.get(id)
    }

    pub fn stats(&self) -> RegistryStats {
        let entries = || self.registry.properties.values();
        RegistryStats {
            total_properties: self.registry.len(),
            tracked_properties: entries().filter(|e| e.last_updated.is_some()).count(),
            history_items: entries().map(|e| e.update_history.len()).sum(),
            total_updates: self.registry.metadata.total_updates,
            version: self.registry.metadata.version.clone(),
            last_updated: self.registry.last_updated,
            oldest_first_seen: entries().map(|e| e.first_seen).min(),
            newest_change: entries().filter_map(|e| e.last_updated).max(),
        }
    }
}
