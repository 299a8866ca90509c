// ABOUTME: Library root for property-registry
// ABOUTME: Identity resolution and incremental change tracking for scraped listings

pub mod config;
pub mod detector;
pub mod error;
pub mod fingerprint;
pub mod processor;
pub mod query;
pub mod record;
pub mod registry;

pub use error::RegistryError;
pub use fingerprint::generate_id;
pub use processor::{IncrementalProcessor, ProcessOutcome, ProcessSummary};
pub use query::QueryEngine;
pub use record::PropertyRecord;
pub use registry::{BatchStats, Registry, RegistryEntry, RegistryStore};
