// ABOUTME: RegistryStore - durable JSON registry with a locked load-mutate-save lifecycle
// ABOUTME: Missing or corrupt files degrade to an empty registry; saves are atomic renames

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tempfile::NamedTempFile;

use super::lock::RegistryLock;
use super::model::{Registration, RegistrationOutcome, Registry, RegistryEntry};
use crate::error::{RegistryError, Result};
use crate::record::PropertyRecord;

/// Tallies returned by [`RegistryStore::register_batch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub total_properties: usize,
    /// Identities seen for the first time.
    pub registered_properties: usize,
    pub updated_properties: usize,
    pub unchanged_properties: usize,
    /// Wall-clock seconds spent registering and saving.
    pub processing_time: f64,
    /// False when the registry could not be written; in-memory changes are kept.
    pub saved: bool,
}

/// Owns one registry file for its whole lifetime.
///
/// The exclusive lock is taken in [`load`](Self::load) and released on drop, so a
/// load, any number of registrations and the final save cannot interleave with another
/// process working on the same file.
#[derive(Debug)]
pub struct RegistryStore {
    path: PathBuf,
    registry: Registry,
    _lock: RegistryLock,
}

impl RegistryStore {
    /// Lock and load the registry at `path`.
    ///
    /// A missing file is replaced by an empty registry which is written immediately.
    /// A corrupt file is moved aside to `<path>.corrupt-<timestamp>` first. Neither case
    /// is an error; only lock contention or a lock I/O failure is.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = RegistryLock::acquire(&path)?;

        let registry = match read_registry(&path) {
            Ok(Some(registry)) => {
                tracing::info!(
                    "Loaded property registry {} with {} properties",
                    path.display(),
                    registry.len()
                );
                registry
            }
            Ok(None) => {
                tracing::info!("No registry at {}, creating a new one", path.display());
                fresh_registry(&path)
            }
            Err(e) => {
                tracing::warn!("{}; starting from an empty registry", e);
                quarantine(&path);
                fresh_registry(&path)
            }
        };

        Ok(Self {
            path,
            registry,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.registry.get(id)
    }

    /// Stamp, count and atomically write the registry.
    ///
    /// `total_updates` is incremented even if the write fails.
    pub fn save(&mut self) -> Result<()> {
        self.registry.last_updated = Utc::now();
        self.registry.metadata.total_updates += 1;

        write_json_atomic(&self.path, &self.registry)?;
        tracing::info!(
            "Saved property registry with {} properties",
            self.registry.len()
        );
        Ok(())
    }

    /// Register one record. `id` defaults to the record's fingerprint.
    pub fn register(&mut self, record: &PropertyRecord, id: Option<&str>) -> Registration {
        self.register_at(record, id, Utc::now())
    }

    pub(crate) fn register_at(
        &mut self,
        record: &PropertyRecord,
        id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Registration {
        self.registry.register(record, id, now)
    }

    /// Register every record, then save exactly once.
    pub fn register_batch(&mut self, records: &[PropertyRecord]) -> BatchStats {
        let start = Instant::now();
        let mut stats = BatchStats {
            total_properties: records.len(),
            ..Default::default()
        };

        for record in records {
            match self.register(record, None).outcome {
                RegistrationOutcome::New => stats.registered_properties += 1,
                RegistrationOutcome::Updated => stats.updated_properties += 1,
                RegistrationOutcome::Unchanged => stats.unchanged_properties += 1,
            }
        }

        stats.saved = match self.save() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Error saving property registry: {}", e);
                false
            }
        };
        stats.processing_time = start.elapsed().as_secs_f64();

        tracing::info!(
            "Registered {} new properties, updated {}, unchanged: {}",
            stats.registered_properties,
            stats.updated_properties,
            stats.unchanged_properties
        );
        stats
    }
}

fn read_registry(path: &Path) -> Result<Option<Registry>> {
    let load_error = |reason: String| RegistryError::Load {
        path: path.to_path_buf(),
        reason,
    };

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(load_error(e.to_string())),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| load_error(e.to_string()))
}

fn fresh_registry(path: &Path) -> Registry {
    let registry = Registry::new(Utc::now());
    if let Err(e) = write_json_atomic(path, &registry) {
        tracing::warn!("Could not persist new empty registry: {}", e);
    }
    registry
}

/// Move an unreadable registry out of the way so its contents survive for inspection.
fn quarantine(path: &Path) {
    if !path.exists() {
        return;
    }
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d_%H%M%S")));
    let target = PathBuf::from(name);
    match fs::rename(path, &target) {
        Ok(()) => tracing::warn!("Moved unreadable registry to {}", target.display()),
        Err(e) => tracing::warn!(
            "Failed to move unreadable registry {} aside: {}",
            path.display(),
            e
        ),
    }
}

/// Serialize `value` as pretty JSON into a temp file beside `path`, then rename it over
/// `path`. Readers never observe a half-written file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let tmp = write_temp_json(dir, path, value)?;
    tmp.persist(path)
        .map_err(|e| RegistryError::persist(path, e.error))?;
    Ok(())
}

/// Like [`write_json_atomic`] but never replaces an existing file. `<stem>.json` is tried
/// first, then `<stem>_1.json`, `<stem>_2.json` and so on. Returns the path written.
pub(crate) fn write_json_unique<T: Serialize>(
    dir: &Path,
    stem: &str,
    value: &T,
) -> Result<PathBuf> {
    let mut tmp = write_temp_json(dir, &dir.join(format!("{stem}.json")), value)?;
    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("{stem}.json"),
            n => format!("{stem}_{n}.json"),
        };
        let path = dir.join(name);
        match tmp.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                tmp = e.file;
                attempt += 1;
            }
            Err(e) => return Err(RegistryError::persist(&path, e.error)),
        }
    }
}

/// Fully written and synced temp file in `dir`; `target` only names errors.
fn write_temp_json<T: Serialize>(
    dir: &Path,
    target: &Path,
    value: &T,
) -> Result<NamedTempFile> {
    fs::create_dir_all(dir).map_err(|e| RegistryError::persist(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| RegistryError::persist(dir, e))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .map_err(|e| RegistryError::persist(target, e.into()))?;
    tmp.write_all(b"\n")
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| RegistryError::persist(target, e))?;
    Ok(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(value: serde_json::Value) -> PropertyRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_load_creates_and_persists_empty_registry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("registry.json");

        let store = RegistryStore::load(&path).unwrap();
        assert!(store.registry().is_empty());
        assert_eq!(store.registry().metadata.total_updates, 0);
        assert_eq!(store.registry().metadata.version, "1.0");

        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["properties"], json!({}));
        assert_eq!(on_disk["metadata"]["total_updates"], json!(0));
    }

    #[test]
    fn test_corrupt_registry_is_moved_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{ not json").unwrap();

        let store = RegistryStore::load(&path).unwrap();
        assert!(store.registry().is_empty());

        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with("registry.json.corrupt-"))
            .collect();
        assert_eq!(quarantined.len(), 1);
        let kept = fs::read_to_string(dir.path().join(&quarantined[0])).unwrap();
        assert_eq!(kept, "{ not json");
    }

    #[test]
    fn test_save_increments_total_updates_once_per_call() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut store = RegistryStore::load(&path).unwrap();

        store.save().unwrap();
        store.save().unwrap();
        assert_eq!(store.registry().metadata.total_updates, 2);

        let stats = store.register_batch(&[
            record(json!({"url": "a"})),
            record(json!({"url": "b"})),
            record(json!({"url": "c"})),
        ]);
        assert!(stats.saved);
        assert_eq!(store.registry().metadata.total_updates, 3);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let before = {
            let mut store = RegistryStore::load(&path).unwrap();
            store.register_batch(&[
                record(json!({"url": "a", "price": 100, "rooms": 2})),
                record(json!({"title": "T3", "location": "Braga", "size": 120})),
            ]);
            store.register_batch(&[record(json!({"url": "a", "price": 90, "rooms": 2}))]);
            store.registry().clone()
        };

        let after = RegistryStore::load(&path).unwrap();
        let after = after.registry();
        assert_eq!(after.len(), before.len());
        assert_eq!(after.metadata, before.metadata);
        for (id, entry) in &before.properties {
            let loaded = after.get(id).unwrap();
            assert_eq!(loaded.data, entry.data);
            assert_eq!(loaded.update_history.len(), entry.update_history.len());
        }
    }

    #[test]
    fn test_batch_split_example() {
        let dir = tempdir().unwrap();
        let mut store = RegistryStore::load(dir.path().join("registry.json")).unwrap();

        let batch = [
            record(json!({"url": "a", "price": 100})),
            record(json!({"url": "b", "price": 200})),
        ];
        let stats = store.register_batch(&batch);
        assert_eq!(
            (
                stats.registered_properties,
                stats.updated_properties,
                stats.unchanged_properties
            ),
            (2, 0, 0)
        );

        let stats = store.register_batch(&batch);
        assert_eq!(
            (
                stats.registered_properties,
                stats.updated_properties,
                stats.unchanged_properties
            ),
            (0, 0, 2)
        );

        let stats = store.register_batch(&[record(json!({"url": "a", "price": 150}))]);
        assert_eq!(
            (
                stats.registered_properties,
                stats.updated_properties,
                stats.unchanged_properties
            ),
            (0, 1, 0)
        );
        assert_eq!(stats.total_properties, 1);

        let id = crate::fingerprint::generate_id(&record(json!({"url": "a"})));
        let history = &store.get(&id).unwrap().update_history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].changes.price, Some(json!(100)));
        assert_eq!(
            serde_json::to_value(&history[1].changes).unwrap(),
            json!({"price": 150})
        );
    }

    #[test]
    fn test_register_unchanged_keeps_last_updated() {
        let dir = tempdir().unwrap();
        let mut store = RegistryStore::load(dir.path().join("registry.json")).unwrap();
        let rec = record(json!({"url": "a", "price": 100}));

        let t0 = Utc::now() - Duration::days(3);
        let id = store.register_at(&rec, None, t0).id;
        let second = store.register(&rec, None);

        assert_eq!(second.outcome, RegistrationOutcome::Unchanged);
        let entry = store.get(&id).unwrap();
        assert_eq!(entry.last_updated, Some(t0));
        assert_eq!(entry.update_history.len(), 1);
    }

    #[test]
    fn test_second_store_on_same_file_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let _first = RegistryStore::load(&path).unwrap();
        assert!(matches!(
            RegistryStore::load(&path),
            Err(RegistryError::Locked { .. })
        ));
    }

    #[test]
    fn test_non_string_fields_in_stored_registry_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(
            &path,
            json!({
                "properties": {
                    "abc": {
                        "first_seen": "2024-05-01T10:00:00",
                        "last_updated": "2024-05-01T10:00:00",
                        "update_history": [
                            {
                                "timestamp": "2024-05-01T10:00:00",
                                "changes": {"title": 1234, "description": 12}
                            }
                        ],
                        "data": {"url": "a", "title": 1234, "description": 12}
                    }
                },
                "last_updated": "2024-05-01T10:00:00",
                "metadata": {"version": "1.0", "total_updates": 3}
            })
            .to_string(),
        )
        .unwrap();

        let store = RegistryStore::load(&path).unwrap();
        assert_eq!(store.registry().len(), 1);
        assert_eq!(store.registry().metadata.total_updates, 3);
        let entry = store.get("abc").unwrap();
        assert_eq!(entry.data.description, Some(json!(12)));
        assert_eq!(entry.update_history[0].changes.title, Some(json!(1234)));
    }

    #[test]
    fn test_failed_save_is_reported_not_raised() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let mut store = RegistryStore::load(&path).unwrap();

        // A directory where the registry file should be makes the final rename fail.
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(matches!(store.save(), Err(RegistryError::Persist { .. })));
        let stats = store.register_batch(&[record(json!({"url": "a", "price": 1}))]);
        assert!(!stats.saved);
        assert_eq!(stats.registered_properties, 1);
        // In-memory progress survives the failed write.
        assert_eq!(store.registry().len(), 1);
        assert!(path.is_dir());
    }

    #[test]
    fn test_write_json_unique_never_overwrites() {
        let dir = tempdir().unwrap();
        let stem = "new_properties_20240615_120000";
        let first = write_json_unique(dir.path(), stem, &json!([1])).unwrap();
        let second = write_json_unique(dir.path(), stem, &json!([2])).unwrap();
        let third = write_json_unique(dir.path(), stem, &json!([3])).unwrap();

        assert_eq!(first, dir.path().join("new_properties_20240615_120000.json"));
        assert_eq!(second, dir.path().join("new_properties_20240615_120000_1.json"));
        assert_eq!(third, dir.path().join("new_properties_20240615_120000_2.json"));
        let kept: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&first).unwrap()).unwrap();
        assert_eq!(kept, json!([1]));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn test_write_json_atomic_replaces_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &json!([1, 2])).unwrap();
        write_json_atomic(&path, &json!([3])).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value, json!([3]));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
