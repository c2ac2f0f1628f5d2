//! Geographic coordinates and circular-region geometry.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ValidationError;

/// Radius applied when a coordinate does not carry one (meters).
pub const DEFAULT_RADIUS_M: u32 = 400;

/// Mean Earth radius used for great-circle distances (meters).
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Center of a circular geofence, with an optional radius in meters.
///
/// # Examples
///
/// ```
/// use geofence_bridge::Coordinate;
///
/// let a = Coordinate::new(40.7415, -74.0034).with_radius(200);
/// let b = Coordinate::new(40.7415, -74.0034).with_radius(300);
///
/// assert!(a.matches(&b, true));
/// assert!(!a.matches(&b, false));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default, deserialize_with = "de_radius")]
    pub radius: Option<u32>,
}

// Bridges deliver numbers as doubles; negative radii mean "unset".
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn de_radius<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let raw = Option::<f64>::deserialize(deserializer)?;
    Ok(raw.filter(|r| r.is_finite() && *r >= 0.0).map(|r| r.min(f64::from(u32::MAX)) as u32))
}

impl Coordinate {
    /// Creates a coordinate without an explicit radius.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            longitude,
            latitude,
            radius: None,
        }
    }

    /// Returns a copy with the given radius in meters.
    #[must_use]
    pub const fn with_radius(mut self, radius: u32) -> Self {
        self.radius = Some(radius);
        self
    }

    /// Radius in meters, falling back to `default_radius` when unset.
    #[must_use]
    pub fn radius_or(&self, default_radius: u32) -> u32 {
        self.radius.unwrap_or(default_radius)
    }

    /// Position equality used for deduplication and lookups.
    ///
    /// Latitude and longitude must match exactly. With `ignore_radius` unset the
    /// radii must match as well, except that a query without a radius matches
    /// any stored radius.
    #[must_use]
    pub fn matches(&self, query: &Self, ignore_radius: bool) -> bool {
        #[allow(clippy::float_cmp)]
        let same_point = self.latitude == query.latitude && self.longitude == query.longitude;
        if !same_point {
            return false;
        }
        if ignore_radius {
            return true;
        }
        match query.radius {
            None => true,
            Some(r) => self.radius == Some(r),
        }
    }

    /// Great-circle distance to a point, in meters (haversine).
    #[must_use]
    pub fn distance_to(&self, latitude: f64, longitude: f64) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = latitude.to_radians();
        let d_lat = (latitude - self.latitude).to_radians();
        let d_lng = (longitude - self.longitude).to_radians();

        let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
    }

    /// Whether a point lies inside (or on the edge of) this circle.
    #[must_use]
    pub fn contains(&self, latitude: f64, longitude: f64, default_radius: u32) -> bool {
        self.distance_to(latitude, longitude) <= f64::from(self.radius_or(default_radius))
    }

    /// Checks ranges and finiteness.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let lat_ok = self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude);
        let lng_ok = self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude);
        if !lat_ok || !lng_ok {
            return Err(ValidationError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        if self.radius == Some(0) {
            return Err(ValidationError::InvalidRadius { radius: 0 });
        }
        Ok(())
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.radius {
            Some(r) => write!(f, "({}, {}, r={r}m)", self.latitude, self.longitude),
            None => write!(f, "({}, {})", self.latitude, self.longitude),
        }
    }
}
