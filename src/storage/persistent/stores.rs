//! WAL-backed region store.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use tracing::{debug, info, warn};

use crate::geofence::CallbackHandle;
use crate::storage::memory::{lock_err, MappingState};
use crate::storage::traits::{RegionStore, StorageError};

use super::file_lock::StoreLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "regions.wal";

fn io_err(context: &str, e: &std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::InvalidData {
        StorageError::Corrupted(format!("{context}: {e}"))
    } else {
        StorageError::BackendError(format!("{context}: {e}"))
    }
}

fn apply(state: &mut MappingState, kind: WalEntryKind) {
    match kind {
        WalEntryKind::Put { region_id, handle } => {
            state.regions.insert(region_id, handle);
        }
        WalEntryKind::Remove { region_id } => {
            state.regions.remove(&region_id);
        }
        WalEntryKind::SetDispatcherHandle { handle } => {
            state.dispatcher_handle = Some(handle);
        }
        WalEntryKind::Snapshot {
            regions,
            dispatcher_handle,
        } => {
            state.regions = regions.into_iter().collect();
            state.dispatcher_handle = dispatcher_handle;
        }
    }
}

/// Result of a compaction.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    /// Mappings written into the snapshot.
    pub regions_retained: usize,
    /// Log size before compaction.
    pub wal_size_before: u64,
    /// Log size after compaction.
    pub wal_size_after: u64,
}

/// Durable region store: in-memory state mirrored by an append-only log.
///
/// Writes go to the log first while holding the state lock, so readers never
/// observe a mapping that is not yet durable.
pub struct PersistentRegionStore {
    _lock: StoreLock,
    wal: WriteAheadLog,
    state: RwLock<MappingState>,
    config: PersistentConfig,
}

impl std::fmt::Debug for PersistentRegionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentRegionStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PersistentRegionStore {
    /// Open or create the store in `dir`, replaying its log.
    ///
    /// # Errors
    /// `StorageError::Locked` if another process has the store open, or a
    /// backend error if the directory or log cannot be read.
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| io_err("failed to create store directory", &e))?;

        let lock = StoreLock::acquire(dir)?;

        let (wal, entries) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| io_err("failed to open region log", &e))?;

        let replayed = entries.len();
        let mut state = MappingState::default();
        for entry in entries {
            apply(&mut state, entry.kind);
        }

        info!(
            dir = %dir.display(),
            replayed,
            regions = state.regions.len(),
            has_dispatcher_handle = state.dispatcher_handle.is_some(),
            "opened region store"
        );

        Ok(Self {
            _lock: lock,
            wal,
            state: RwLock::new(state),
            config,
        })
    }

    /// Rewrite the log as a single snapshot of the current state.
    ///
    /// # Errors
    /// A backend error if the snapshot cannot be written; the old log stays
    /// live and writable.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        // Hold the write lock so no mutation lands between snapshot and rewrite.
        let state = self.state.write().map_err(|_| lock_err("region.compact"))?;

        let wal_size_before = self.wal.size_bytes().unwrap_or(0);
        let mut regions: Vec<(String, CallbackHandle)> =
            state.regions.iter().map(|(k, v)| (k.clone(), *v)).collect();
        regions.sort_by(|a, b| a.0.cmp(&b.0));
        let regions_retained = regions.len();

        self.wal
            .rewrite(WalEntryKind::Snapshot {
                regions,
                dispatcher_handle: state.dispatcher_handle,
            })
            .map_err(|e| io_err("failed to compact region log", &e))?;

        let wal_size_after = self.wal.size_bytes().unwrap_or(0);
        debug!(wal_size_before, wal_size_after, "compacted region log");

        Ok(CompactionResult {
            regions_retained,
            wal_size_before,
            wal_size_after,
        })
    }

    /// Current log size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }

    fn write(&self, context: &'static str, kind: WalEntryKind) -> Result<(), StorageError> {
        {
            let mut state = self.state.write().map_err(|_| lock_err(context))?;
            self.append_locked(&mut state, kind)?;
        }
        self.maybe_compact();
        Ok(())
    }

    fn append_locked(&self, state: &mut MappingState, kind: WalEntryKind) -> Result<(), StorageError> {
        self.wal
            .append(kind.clone())
            .map_err(|e| io_err("failed to append to region log", &e))?;
        apply(state, kind);
        Ok(())
    }

    fn maybe_compact(&self) {
        if self.wal_size() > self.config.max_wal_size {
            if let Err(e) = self.compact() {
                // The append already succeeded; compaction is retried on the next write.
                warn!(error = %e, "region log compaction failed");
            }
        }
    }
}

impl RegionStore for PersistentRegionStore {
    fn put(&self, region_id: &str, handle: CallbackHandle) -> Result<(), StorageError> {
        self.write(
            "region.put",
            WalEntryKind::Put {
                region_id: region_id.to_string(),
                handle,
            },
        )
    }

    fn get(&self, region_id: &str) -> Result<Option<CallbackHandle>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("region.get"))?;
        Ok(state.regions.get(region_id).copied())
    }

    fn remove(&self, region_id: &str) -> Result<bool, StorageError> {
        {
            let mut state = self.state.write().map_err(|_| lock_err("region.remove"))?;
            if !state.regions.contains_key(region_id) {
                return Ok(false);
            }
            self.append_locked(
                &mut state,
                WalEntryKind::Remove {
                    region_id: region_id.to_string(),
                },
            )?;
        }
        self.maybe_compact();
        Ok(true)
    }

    fn mappings(&self) -> Result<BTreeMap<String, CallbackHandle>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("region.mappings"))?;
        Ok(state.regions.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    fn dispatcher_entry_handle(&self) -> Result<Option<CallbackHandle>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("dispatcher.get"))?;
        Ok(state.dispatcher_handle)
    }

    fn set_dispatcher_entry_handle(&self, handle: CallbackHandle) -> Result<(), StorageError> {
        self.write("dispatcher.set", WalEntryKind::SetDispatcherHandle { handle })
    }
}
