//! # geofencing
//!
//! Geofence lifecycle and event dispatch manager. It sits between an OS
//! location-monitoring service and a background execution environment that
//! runs user callbacks.
//!
//! Region transitions may arrive before the environment is ready, including
//! right after the OS relaunches the process for a location event. The
//! manager buffers them (one per region, last write wins) and flushes them in
//! one pass when the environment reports it is initialized. After that,
//! transitions are dispatched immediately.
//!
//! ## Core Concepts
//!
//! - **Geofence**: a circular region plus the callback handle to invoke for it
//! - **Capacity selection**: at most 20 regions are monitored, closest first
//! - **Dispatch state**: `Uninitialized`, `Initializing`, `Ready`; only `Ready` dispatches
//! - **Region store**: durable region id to callback handle mapping plus the
//!   dispatcher entry handle
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use geofencing::{
//!     CallbackHandle, Coordinate, GeofenceConfig, GeofenceManager, InMemoryRegionStore,
//!     Platform, Region,
//! };
//!
//! let manager = GeofenceManager::new(GeofenceConfig::default(), Arc::new(InMemoryRegionStore::new()), platform)?;
//! manager.register_geofence(CallbackHandle::new(7), "home", 37.42, -122.08)?;
//! manager.initialize_service(CallbackHandle::new(1))?;
//!
//! // Buffered: the environment has not reported ready yet.
//! manager.on_enter(Region::new("home", Coordinate::new(37.42, -122.08)));
//!
//! // Flushes the buffered enter to the notification sink.
//! manager.service_initialized()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod buffer;
pub mod capacity;
pub mod error;
pub mod geofence;

// Dispatch, platform seams, and storage
pub mod dispatch;
pub mod platform;
pub mod storage;

// Manager and host surfaces
pub mod channel;
pub mod config;
pub mod manager;

pub use buffer::{EventBuffer, PendingEvent};
pub use capacity::{CapacityManager, Selection, MAX_MONITORED_REGIONS};
pub use error::{ChannelError, ExecutionError, GeofenceError, GeofenceResult, ValidationError};
pub use geofence::{CallbackHandle, Coordinate, Geofence, Region, TransitionKind, DEFAULT_RADIUS_METERS};

pub use dispatch::{DispatchOutcome, DispatchState, DispatchStateMachine, Dispatcher, TransitionNotification};
pub use platform::{ExecutionEnvironment, LocationSource, NotificationSink, PlatformError};
pub use storage::{InMemoryRegionStore, RegionStore, StorageError};

#[cfg(feature = "persistent")]
pub use storage::{open_region_store, PersistentConfig, PersistentRegionStore};

pub use channel::{handle_method_call, Command, MethodCall};
pub use config::GeofenceConfig;
pub use manager::{DispatchStats, GeofenceManager, Platform, RegistrationOutcome, TransitionSender};
