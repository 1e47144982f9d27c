//! Persistent storage for sync state and downloaded photo content.
//!
//! The controller only depends on the two traits below:
//! - [`LastSyncStore`] holds the single "last sync began at" timestamp
//! - [`ContentStore`] holds raw and compressed photo bytes keyed by string
//!
//! [`SqliteStore`] implements both on top of one SQLite file.

pub mod db;
pub mod error;
pub mod schema;

pub use db::{SqliteStore, StoreSummary};
pub use error::StoreError;

/// Key under which the controller records when the last cycle started.
pub const PREVIOUS_SYNC_TIME_KEY: &str = "previousSyncTime";

/// Namespace prefix for compressed photo variants in the [`ContentStore`].
pub const COMPRESSED_KEY_PREFIX: &str = "compressed/";

/// Content store key for the compressed variant of a photo.
pub fn compressed_key(uid: &str) -> String {
    format!("{COMPRESSED_KEY_PREFIX}{uid}")
}

/// Floating-point values keyed by name.
pub trait LastSyncStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<f64>, StoreError>;
    fn set(&self, key: &str, value: f64) -> Result<(), StoreError>;
}

/// Opaque binary blobs keyed by name.
pub trait ContentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn set(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;
}
