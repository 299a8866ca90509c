// ABOUTME: ChangeDetector - decides whether an incoming record is a material change
// ABOUTME: Only price, size, description and title are compared

use crate::record::PropertyRecord;
use crate::registry::RegistryEntry;

/// Fields compared when deciding whether a listing changed.
///
/// location, url and unmodeled attributes are left out: their formatting drifts between
/// scrapes and would flood the history with noise.
pub const SIGNIFICANT_FIELDS: [&str; 4] = ["price", "size", "description", "title"];

/// Returns true when `incoming` is new or differs from the stored snapshot.
pub fn is_changed(stored: Option<&RegistryEntry>, incoming: &PropertyRecord) -> bool {
    match stored {
        None => true,
        Some(entry) => !changed_fields(&entry.data, incoming).is_empty(),
    }
}

/// Significant fields whose value or presence differs between the two records.
pub fn changed_fields(stored: &PropertyRecord, incoming: &PropertyRecord) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if stored.price != incoming.price {
        changed.push("price");
    }
    if stored.size != incoming.size {
        changed.push("size");
    }
    if stored.description != incoming.description {
        changed.push("description");
    }
    if stored.title != incoming.title {
        changed.push("title");
    }
    changed
}
