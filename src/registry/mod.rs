// ABOUTME: Property registry - identity to entry mapping with bounded history
// ABOUTME: Document model, locked durable store, and registration logic

pub mod lock;
pub mod model;
pub mod store;

pub use lock::RegistryLock;
pub use model::{
    HistoryItem, Registration, RegistrationOutcome, Registry, RegistryEntry, RegistryMetadata,
    HISTORY_LIMIT, REGISTRY_VERSION,
};
pub use store::{BatchStats, RegistryStore};
