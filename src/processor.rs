// ABOUTME: IncrementalProcessor - runs one input artifact through the registry
// ABOUTME: Splits records into new/updated/unchanged, registers them, emits subset artifacts

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RegistryError, Result};
use crate::fingerprint;
use crate::record::PropertyRecord;
use crate::registry::store::write_json_unique;
use crate::registry::{Registry, RegistrationOutcome, RegistryStore};

/// Result of a successful [`IncrementalProcessor::process`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessSummary {
    pub input_file: PathBuf,
    /// `YYYYMMDD_HHMMSS`, shared by the artifacts of this run.
    pub timestamp: String,
    pub total_properties: usize,
    pub new_properties: usize,
    pub updated_properties: usize,
    pub unchanged_properties: usize,
    pub new_file: Option<PathBuf>,
    pub updated_file: Option<PathBuf>,
    pub registry_saved: bool,
    pub processing_time: f64,
    /// Mirrors `registry_saved`.
    pub success: bool,
}

/// Returned when the input could not be read; the registry was not touched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub input_file: PathBuf,
    pub error: String,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProcessOutcome {
    Completed(ProcessSummary),
    Failed(ErrorSummary),
}

impl ProcessOutcome {
    /// True when the batch was read, registered and the registry was saved.
    pub fn is_success(&self) -> bool {
        match self {
            ProcessOutcome::Completed(summary) => summary.registry_saved,
            ProcessOutcome::Failed(_) => false,
        }
    }
}

/// Classification of a batch against the registry before it is mutated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Split {
    pub new: Vec<PropertyRecord>,
    pub updated: Vec<PropertyRecord>,
    pub unchanged: usize,
}

/// Classify every record without touching the registry.
///
/// Duplicates inside one batch are each classified against the pre-batch state.
pub fn split(registry: &Registry, records: &[PropertyRecord]) -> Split {
    let mut split = Split::default();
    for record in records {
        let id = fingerprint::generate_id(record);
        match registry.classify(&id, record) {
            RegistrationOutcome::New => split.new.push(record.clone()),
            RegistrationOutcome::Updated => split.updated.push(record.clone()),
            RegistrationOutcome::Unchanged => split.unchanged += 1,
        }
    }
    split
}

/// Read an input artifact and normalize it to a list of records.
pub fn read_input(path: &Path) -> Result<Vec<PropertyRecord>> {
    let contents = fs::read_to_string(path).map_err(|e| RegistryError::parse(path, e))?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|e| RegistryError::parse(path, e))?;
    normalize_input(value).map_err(|reason| RegistryError::parse(path, reason))
}

/// Accepts a bare list, an object with a `properties` list, or a single record object.
pub fn normalize_input(value: Value) -> std::result::Result<Vec<PropertyRecord>, String> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("properties") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("`properties` must be a list of records".to_string()),
            None => vec![Value::Object(map)],
        },
        other => {
            return Err(format!(
                "expected a list of records, an object with `properties`, or a single record, found {}",
                json_kind(&other)
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                return Err(format!(
                    "record {} is {}, not an object",
                    index,
                    json_kind(&item)
                ));
            }
            serde_json::from_value(item).map_err(|e| format!("record {}: {}", index, e))
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Drives one batch against a borrowed store.
pub struct IncrementalProcessor<'a> {
    store: &'a mut RegistryStore,
    output_dir: PathBuf,
}

impl<'a> IncrementalProcessor<'a> {
    pub fn new(store: &'a mut RegistryStore, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Process one input artifact. Never fails outright: input problems come back as
    /// [`ProcessOutcome::Failed`], write problems as flags and missing paths.
    pub fn process(&mut self, input_file: &Path) -> ProcessOutcome {
        let records = match read_input(input_file) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!("Error processing incremental update: {}", e);
                return ProcessOutcome::Failed(ErrorSummary {
                    input_file: input_file.to_path_buf(),
                    error: e.to_string(),
                    success: false,
                });
            }
        };

        let split = split(self.store.registry(), &records);
        let stats = self.store.register_batch(&records);
        if stats.registered_properties != split.new.len()
            || stats.updated_properties != split.updated.len()
        {
            // Only duplicate identities inside one batch make these disagree.
            tracing::debug!(
                "Batch tallies differ from pre-split: registered {} vs new {}, updated {} vs {}",
                stats.registered_properties,
                split.new.len(),
                stats.updated_properties,
                split.updated.len()
            );
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let new_file = self.write_artifact("new_properties", &timestamp, &split.new);
        let updated_file = self.write_artifact("updated_properties", &timestamp, &split.updated);

        tracing::info!(
            "Processed incremental update from {}: {} new, {} updated",
            input_file.display(),
            split.new.len(),
            split.updated.len()
        );

        ProcessOutcome::Completed(ProcessSummary {
            input_file: input_file.to_path_buf(),
            timestamp,
            total_properties: records.len(),
            new_properties: split.new.len(),
            updated_properties: split.updated.len(),
            unchanged_properties: split.unchanged,
            new_file,
            updated_file,
            registry_saved: stats.saved,
            processing_time: stats.processing_time,
            success: stats.saved,
        })
    }

    /// Write `records` to `<prefix>_<timestamp>.json`; nothing is written for an empty list.
    /// An existing artifact with the same name is kept and a numbered suffix is added.
    fn write_artifact(
        &self,
        prefix: &str,
        timestamp: &str,
        records: &[PropertyRecord],
    ) -> Option<PathBuf> {
        if records.is_empty() {
            return None;
        }
        let stem = format!("{}_{}", prefix, timestamp);
        match write_json_unique(&self.output_dir, &stem, &records) {
            Ok(path) => {
                tracing::info!("Wrote {} records to {}", records.len(), path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Failed to write artifact: {}", e);
                None
            }
        }
    }
}
