//! Method-call channel codec.
//!
//! Host-side calls arrive as a method name plus a positional JSON argument
//! list. `Command::decode` turns one into a typed command and
//! [`handle_method_call`] runs it against a [`GeofenceManager`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{ChannelError, GeofenceResult};
use crate::geofence::CallbackHandle;
use crate::manager::GeofenceManager;

/// `[entryHandle]`
pub const INITIALIZE_SERVICE: &str = "GeofencingPlugin.initializeService";
/// `[callbackHandle, id, lat, long]`
pub const REGISTER_GEOFENCE: &str = "GeofencingPlugin.registerGeofence";
/// `[id]`
pub const REMOVE_GEOFENCE: &str = "GeofencingPlugin.removeGeofence";
/// No arguments.
pub const SERVICE_INITIALIZED: &str = "GeofencingService.initialized";

/// A raw call from the host side of the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Fully qualified method name.
    pub method: String,
    /// Positional argument list.
    #[serde(default)]
    pub arguments: JsonValue,
}

impl MethodCall {
    /// A call with the given method name and positional arguments.
    #[must_use]
    pub fn new(method: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// A decoded channel command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    InitializeService {
        entry: CallbackHandle,
    },
    RegisterGeofence {
        callback: CallbackHandle,
        id: String,
        latitude: f64,
        longitude: f64,
    },
    RemoveGeofence {
        id: String,
    },
    ServiceInitialized,
}

fn positional<T: DeserializeOwned>(method: &str, arguments: &JsonValue) -> Result<T, ChannelError> {
    serde_json::from_value(arguments.clone()).map_err(|e| ChannelError::MalformedArguments {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

impl Command {
    /// Decode a method call.
    ///
    /// # Errors
    /// `ChannelError::UnknownMethod` for an unrecognized name,
    /// `ChannelError::MalformedArguments` when the argument list has the wrong
    /// shape or types.
    pub fn decode(call: &MethodCall) -> Result<Self, ChannelError> {
        let method = call.method.as_str();
        match method {
            INITIALIZE_SERVICE => {
                let (entry,): (i64,) = positional(method, &call.arguments)?;
                Ok(Self::InitializeService {
                    entry: CallbackHandle::new(entry),
                })
            }
            REGISTER_GEOFENCE => {
                let (callback, id, latitude, longitude): (i64, String, f64, f64) =
                    positional(method, &call.arguments)?;
                Ok(Self::RegisterGeofence {
                    callback: CallbackHandle::new(callback),
                    id,
                    latitude,
                    longitude,
                })
            }
            REMOVE_GEOFENCE => {
                let (id,): (String,) = positional(method, &call.arguments)?;
                Ok(Self::RemoveGeofence { id })
            }
            SERVICE_INITIALIZED => Ok(Self::ServiceInitialized),
            other => Err(ChannelError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// Decode and run one method call, returning the channel reply.
///
/// Replies are `true` for initialize and register, the removal result for
/// remove, and `null` for the initialized acknowledgement.
///
/// # Errors
/// A channel error for an unknown method or malformed arguments, otherwise
/// whatever the manager operation returns.
pub fn handle_method_call(manager: &GeofenceManager, call: &MethodCall) -> GeofenceResult<JsonValue> {
    let command = Command::decode(call)?;
    debug!(method = %call.method, ?command, "method call");

    match command {
        Command::InitializeService { entry } => {
            manager.initialize_service(entry)?;
            Ok(JsonValue::Bool(true))
        }
        Command::RegisterGeofence {
            callback,
            id,
            latitude,
            longitude,
        } => {
            manager.register_geofence(callback, id, latitude, longitude)?;
            Ok(JsonValue::Bool(true))
        }
        Command::RemoveGeofence { id } => Ok(JsonValue::Bool(manager.remove_geofence(&id)?)),
        Command::ServiceInitialized => {
            manager.service_initialized()?;
            Ok(JsonValue::Null)
        }
    }
}
