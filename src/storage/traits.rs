//! Abstract storage trait for region callback mappings.
//!
//! The store is the only state that survives a process restart: it tells a
//! relaunched process which entry point boots the execution environment and
//! which callback belongs to each region the OS is still monitoring.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::geofence::CallbackHandle;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Persisted data failed validation.
    #[error("Corrupted storage: {0}")]
    Corrupted(String),

    /// Another process owns the store directory.
    #[error("Region store lock {} is held by another process{}", .path.display(), holder_suffix(.holder))]
    Locked {
        /// The lock file.
        path: PathBuf,
        /// Process id recorded by the current owner, when readable.
        holder: Option<u32>,
    },
}

fn holder_suffix(holder: &Option<u32>) -> String {
    holder.map(|pid| format!(" (pid {pid})")).unwrap_or_default()
}

/// Durable mapping from region id to callback handle, plus the process-wide
/// dispatcher entry handle.
///
/// # Safety Considerations
/// - Every mutation must be atomic with respect to concurrent reads
/// - `get` must distinguish "not found" from a stored handle of 0
pub trait RegionStore: Send + Sync {
    /// Insert or overwrite the mapping for `region_id`.
    fn put(&self, region_id: &str, handle: CallbackHandle) -> Result<(), StorageError>;

    /// Look up the callback handle for `region_id`.
    fn get(&self, region_id: &str) -> Result<Option<CallbackHandle>, StorageError>;

    /// Remove a mapping. Returns true if one existed.
    fn remove(&self, region_id: &str) -> Result<bool, StorageError>;

    /// All stored mappings, ordered by region id.
    fn mappings(&self) -> Result<BTreeMap<String, CallbackHandle>, StorageError>;

    /// Handle used to boot the headless execution environment.
    fn dispatcher_entry_handle(&self) -> Result<Option<CallbackHandle>, StorageError>;

    /// Persist the handle used to boot the headless execution environment.
    fn set_dispatcher_entry_handle(&self, handle: CallbackHandle) -> Result<(), StorageError>;
}
