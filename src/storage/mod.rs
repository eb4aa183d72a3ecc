//! Region mapping storage.
//!
//! `RegionStore` is the durable key-value seam: the in-memory backend serves
//! tests and embedded use, the persistent backend survives process restarts.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryRegionStore;
pub use traits::{RegionStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_region_store, PersistentConfig, PersistentRegionStore};
