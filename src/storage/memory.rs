//! In-memory storage backend.
//!
//! Thread-safe implementation of `RegionStore` that does not survive restarts.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::geofence::CallbackHandle;
use crate::storage::traits::{RegionStore, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Region mapping state shared by the in-memory and persistent backends.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct MappingState {
    pub(crate) regions: HashMap<String, CallbackHandle>,
    pub(crate) dispatcher_handle: Option<CallbackHandle>,
}

/// Thread-safe in-memory region store.
#[derive(Debug, Default)]
pub struct InMemoryRegionStore {
    state: RwLock<MappingState>,
}

impl InMemoryRegionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegionStore for InMemoryRegionStore {
    fn put(&self, region_id: &str, handle: CallbackHandle) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("region.put"))?;
        state.regions.insert(region_id.to_string(), handle);
        Ok(())
    }

    fn get(&self, region_id: &str) -> Result<Option<CallbackHandle>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("region.get"))?;
        Ok(state.regions.get(region_id).copied())
    }

    fn remove(&self, region_id: &str) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("region.remove"))?;
        Ok(state.regions.remove(region_id).is_some())
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
        let mut state = self.state.write().map_err(|_| lock_err("dispatcher.set"))?;
        state.dispatcher_handle = Some(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_unknown_is_none() {
        let store = InMemoryRegionStore::new();
        assert_eq!(store.get("nowhere").unwrap(), None);
    }

    #[test]
    fn test_zero_handle_is_found() {
        let store = InMemoryRegionStore::new();
        store.put("origin", CallbackHandle::new(0)).unwrap();
        assert_eq!(store.get("origin").unwrap(), Some(CallbackHandle::new(0)));
    }

    #[test]
    fn test_put_overwrites_and_is_idempotent() {
        let store = InMemoryRegionStore::new();
        store.put("home", CallbackHandle::new(1)).unwrap();
        store.put("home", CallbackHandle::new(2)).unwrap();
        store.put("home", CallbackHandle::new(2)).unwrap();
        assert_eq!(store.get("home").unwrap(), Some(CallbackHandle::new(2)));
        assert_eq!(store.mappings().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_reports_existence() {
        let store = InMemoryRegionStore::new();
        assert!(!store.remove("home").unwrap());
        store.put("home", CallbackHandle::new(1)).unwrap();
        assert!(store.remove("home").unwrap());
        assert!(!store.remove("home").unwrap());
        assert_eq!(store.get("home").unwrap(), None);
    }

    #[test]
    fn test_register_remove_sequence_tracks_latest() {
        let store = InMemoryRegionStore::new();
        let ops: [(&str, Option<i64>); 7] = [
            ("a", Some(1)),
            ("b", Some(2)),
            ("a", Some(3)),
            ("b", None),
            ("c", Some(4)),
            ("b", Some(5)),
            ("c", None),
        ];
        let mut expected: HashMap<&str, i64> = HashMap::new();
        for (id, op) in ops {
            match op {
                Some(h) => {
                    store.put(id, CallbackHandle::new(h)).unwrap();
                    expected.insert(id, h);
                }
                None => {
                    assert_eq!(store.remove(id).unwrap(), expected.remove(id).is_some());
                }
            }
        }
        for id in ["a", "b", "c"] {
            assert_eq!(
                store.get(id).unwrap(),
                expected.get(id).copied().map(CallbackHandle::new)
            );
        }
    }

    #[test]
    fn test_dispatcher_handle_roundtrip() {
        let store = InMemoryRegionStore::new();
        assert_eq!(store.dispatcher_entry_handle().unwrap(), None);
        store.set_dispatcher_entry_handle(CallbackHandle::new(99)).unwrap();
        assert_eq!(store.dispatcher_entry_handle().unwrap(), Some(CallbackHandle::new(99)));
    }
}
