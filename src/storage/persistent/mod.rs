//! Persistent region store.
//!
//! This module provides a durable, crash-safe `RegionStore` with:
//! - Write-Ahead Logging (WAL) for crash recovery
//! - File locking for single-process access
//! - CRC32 checksums for corruption detection
//! - Snapshot compaction once the log grows past a threshold
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │          PersistentRegionStore           │
//! ├──────────────────────────────────────────┤
//! │  RwLock<MappingState>  (reads)           │
//! │           │                              │
//! │           ↓                              │
//! │  WriteAheadLog  (append / snapshot)      │
//! │           │                              │
//! │           ↓                              │
//! │  StoreLock (regions.lock, owner pid)     │
//! └──────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod stores;
mod wal;

pub use file_lock::StoreLock;
pub use stores::{CompactionResult, PersistentRegionStore};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::error::{GeofenceError, ValidationError};

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Log size (bytes) that triggers snapshot compaction.
    pub max_wal_size: u64,
    /// Whether to fsync after every write (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 1024 * 1024, // 1 MiB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // 4 KiB minimum to avoid degenerate compaction loops

    /// Check the tunables.
    ///
    /// # Errors
    /// `ValidationError::InvalidConfig` if `max_wal_size` is below 4 KiB.
    pub fn validate(self) -> Result<Self, GeofenceError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                field: "max_wal_size".to_string(),
                reason: format!(
                    "must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            }
            .into());
        }

        Ok(self)
    }
}

/// Open or create a persistent region store at the given path.
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another process holds the lock
/// - If the log is corrupted before its tail
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use geofencing::storage::open_region_store;
///
/// let store = Arc::new(open_region_store("./geofences", None)?);
/// let manager = GeofenceManager::new(config, store, platform);
/// ```
pub fn open_region_store(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentRegionStore, GeofenceError> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentRegionStore::open(path.as_ref(), cfg)?)
}
