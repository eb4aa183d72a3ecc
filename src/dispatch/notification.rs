//! Outbound transition notification.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geofence::{CallbackHandle, Coordinate, TransitionKind};

/// Message sent to the execution environment for one region transition.
///
/// On the wire it is the positional array
/// `[callbackHandle, [regionId], [latitude, longitude], transitionCode]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireNotification", try_from = "WireNotification")]
pub struct TransitionNotification {
    /// Callback handle stored for the region.
    pub handle: CallbackHandle,
    /// Region that fired.
    pub region_id: String,
    /// Region center as reported by the location service.
    pub center: Coordinate,
    /// Enter or exit.
    pub kind: TransitionKind,
}

impl TransitionNotification {
    /// Arguments as a JSON value, ready for a method-call channel.
    #[must_use]
    pub fn to_arguments(&self) -> serde_json::Value {
        serde_json::json!([
            self.handle.raw(),
            [self.region_id],
            [self.center.latitude, self.center.longitude],
            self.kind.code()
        ])
    }
}

#[derive(Serialize, Deserialize)]
struct WireNotification(i64, (String,), (f64, f64), i64);

impl From<TransitionNotification> for WireNotification {
    fn from(n: TransitionNotification) -> Self {
        Self(
            n.handle.raw(),
            (n.region_id,),
            (n.center.latitude, n.center.longitude),
            n.kind.code(),
        )
    }
}

/// A transition code other than 1 (enter) or 0 (exit).
#[derive(Debug)]
pub struct InvalidTransitionCode(i64);

impl fmt::Display for InvalidTransitionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transition code {} (expected 1=enter or 0=exit)", self.0)
    }
}

impl TryFrom<WireNotification> for TransitionNotification {
    type Error = InvalidTransitionCode;

    fn try_from(w: WireNotification) -> Result<Self, Self::Error> {
        let kind = match w.3 {
            1 => TransitionKind::Enter,
            0 => TransitionKind::Exit,
            other => return Err(InvalidTransitionCode(other)),
        };
        Ok(Self {
            handle: CallbackHandle::new(w.0),
            region_id: w.1 .0,
            center: Coordinate::new(w.2 .0, w.2 .1),
            kind,
        })
    }
}
