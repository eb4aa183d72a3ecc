//! Geofence data model.
//!
//! A `Geofence` is what callers register: a circular region plus the callback
//! handle that the execution environment resolves to an entry point. A
//! `Region` is the subset the platform location service monitors and reports
//! back in transition callbacks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{GeofenceResult, ValidationError};

/// Radius applied to every registered geofence, in meters.
pub const DEFAULT_RADIUS_METERS: f64 = 1500.0;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Opaque token resolved by the execution environment to an entry point.
///
/// Zero is a valid handle; absence is always expressed with `Option`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackHandle(i64);

impl CallbackHandle {
    /// Wrap a raw handle value.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    #[must_use]
    pub const fn raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for CallbackHandle {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Degrees north, in `[-90, 90]`.
    pub latitude: f64,
    /// Degrees east, in `[-180, 180]`.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate without validation.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Create a coordinate, rejecting out-of-range or non-finite values.
    ///
    /// # Errors
    /// `LatitudeOutOfRange` or `LongitudeOutOfRange`.
    pub fn checked(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ValidationError::LatitudeOutOfRange { value: latitude });
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ValidationError::LongitudeOutOfRange { value: longitude });
        }
        Ok(Self { latitude, longitude })
    }

    /// Great-circle distance to `other` in meters (haversine).
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlng = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (dlng / 2.0).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_METERS * c
    }
}

/// Region transition reported by the location service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Enter,
    Exit,
}

impl TransitionKind {
    /// Wire code sent to the execution environment: Enter=1, Exit=0.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Enter => 1,
            Self::Exit => 0,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter => f.write_str("enter"),
            Self::Exit => f.write_str("exit"),
        }
    }
}

/// A circular region as monitored by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Caller-chosen identifier, unique within the monitored set.
    pub id: String,
    /// Center of the circle.
    pub center: Coordinate,
    /// Radius in meters.
    pub radius: f64,
}

impl Region {
    /// Region with the default radius.
    #[must_use]
    pub fn new(id: impl Into<String>, center: Coordinate) -> Self {
        Self {
            id: id.into(),
            center,
            radius: DEFAULT_RADIUS_METERS,
        }
    }
}

fn check_radius(radius: f64) -> GeofenceResult<()> {
    if !radius.is_finite() || radius <= 0.0 {
        return Err(ValidationError::InvalidRadius { value: radius }.into());
    }
    Ok(())
}

/// A caller-registered circular region with its notification callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
///
/// Fields are public for struct-literal construction; the manager validates
/// every geofence it is given, however it was built.
pub struct Geofence {
    /// Region identifier, non-empty.
    pub id: String,
    /// Center of the circle.
    pub center: Coordinate,
    /// Radius in meters, positive and finite.
    pub radius: f64,
    /// Handle passed back in every notification for this region.
    pub callback: CallbackHandle,
}

impl Geofence {
    /// Build a validated geofence with the default radius.
    ///
    /// # Errors
    /// `EmptyRegionId` for a blank id, or a range error for the coordinates.
    pub fn new(
        callback: CallbackHandle,
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> GeofenceResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyRegionId.into());
        }
        let center = Coordinate::checked(latitude, longitude)?;
        Ok(Self {
            id,
            center,
            radius: DEFAULT_RADIUS_METERS,
            callback,
        })
    }

    /// Override the radius (meters).
    ///
    /// # Errors
    /// `InvalidRadius` unless `radius` is positive and finite.
    pub fn with_radius(mut self, radius: f64) -> GeofenceResult<Self> {
        check_radius(radius)?;
        self.radius = radius;
        Ok(self)
    }

    /// Re-check every field, for geofences built as struct literals.
    ///
    /// # Errors
    /// The same validation errors as [`Self::new`] and [`Self::with_radius`].
    pub fn validate(&self) -> GeofenceResult<()> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::EmptyRegionId.into());
        }
        Coordinate::checked(self.center.latitude, self.center.longitude)?;
        check_radius(self.radius)
    }

    /// The region handed to the location service.
    #[must_use]
    pub fn region(&self) -> Region {
        Region {
            id: self.id.clone(),
            center: self.center,
            radius: self.radius,
        }
    }
}
