//! Geofence evaluation
//!
//! This module measures the great-circle distance from a location fix to the
//! safe-zone center and classifies containment. The zone is always passed in
//! by the caller; nothing here caches it.

use crate::error::ComputeError;
use crate::types::{GeoFix, ZoneEvaluation, ZoneStatus};
use serde::{Deserialize, Serialize};

/// Mean Earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

pub const DEFAULT_ZONE_LATITUDE: f64 = 12.753682;
pub const DEFAULT_ZONE_LONGITUDE: f64 = 80.197107;
pub const DEFAULT_ZONE_RADIUS_M: f64 = 10.0;

/// Circular safe zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SafeZoneFields")]
pub struct SafeZone {
    latitude: f64,
    longitude: f64,
    radius_m: f64,
}

/// Unchecked wire form of [`SafeZone`]
#[derive(Deserialize)]
struct SafeZoneFields {
    latitude: f64,
    longitude: f64,
    radius_m: f64,
}

impl TryFrom<SafeZoneFields> for SafeZone {
    type Error = ComputeError;

    fn try_from(fields: SafeZoneFields) -> Result<Self, Self::Error> {
        SafeZone::new(fields.latitude, fields.longitude, fields.radius_m)
    }
}

impl Default for SafeZone {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_ZONE_LATITUDE,
            longitude: DEFAULT_ZONE_LONGITUDE,
            radius_m: DEFAULT_ZONE_RADIUS_M,
        }
    }
}

impl SafeZone {
    /// Create a zone; the center must be a valid coordinate and the radius
    /// strictly positive
    pub fn new(latitude: f64, longitude: f64, radius_m: f64) -> Result<Self, ComputeError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ComputeError::InvalidConfig(format!(
                "zone latitude {latitude} outside [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ComputeError::InvalidConfig(format!(
                "zone longitude {longitude} outside [-180, 180]"
            )));
        }
        if !(radius_m.is_finite() && radius_m > 0.0) {
            return Err(ComputeError::InvalidConfig(format!(
                "zone radius must be positive, got {radius_m}"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
            radius_m,
        })
    }

    pub fn center(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }
}

/// Evaluate one fix against a zone.
///
/// Inside iff `distance_m <= radius_m`; a fix exactly on the boundary is inside.
pub fn evaluate(fix: &GeoFix, zone: &SafeZone) -> ZoneEvaluation {
    let distance_m = haversine_distance(fix.latitude, fix.longitude, zone.latitude, zone.longitude);
    let status = if distance_m <= zone.radius_m {
        ZoneStatus::Inside
    } else {
        ZoneStatus::Outside
    };

    ZoneEvaluation {
        fix: *fix,
        distance_m,
        status,
    }
}

pub fn evaluate_all(fixes: &[GeoFix], zone: &SafeZone) -> Vec<ZoneEvaluation> {
    fixes.iter().map(|fix| evaluate(fix, zone)).collect()
}

/// Great-circle distance between two coordinates in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();

    let sin_dlat_half = (dlat / 2.0).sin();
    let sin_dlon_half = (dlon / 2.0).sin();
    let a = sin_dlat_half.mul_add(
        sin_dlat_half,
        lat1_rad.cos() * lat2_rad.cos() * sin_dlon_half * sin_dlon_half,
    );
    // Rounding can push `a` a hair past 1 for antipodal points
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn fix(latitude: f64, longitude: f64) -> GeoFix {
        GeoFix {
            timestamp: Utc::now(),
            latitude,
            longitude,
        }
    }

    #[test]
    fn test_fix_at_center_is_inside() {
        let zone = SafeZone::default();
        let eval = evaluate(&fix(12.753682, 80.197107), &zone);

        assert!(eval.distance_m.abs() < 1e-6);
        assert_eq!(eval.status, ZoneStatus::Inside);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = (12.753682, 80.197107);
        let b = (13.0827, 80.2707);

        let ab = haversine_distance(a.0, a.1, b.0, b.1);
        let ba = haversine_distance(b.0, b.1, a.0, a.1);

        assert!((ab - ba).abs() < 1e-6);
        assert!(ab > 0.0);
    }

    #[test]
    fn test_known_distance() {
        // One degree of latitude on the mean sphere
        let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_194.93).abs() < 1.0);
    }

    #[test]
    fn test_boundary_is_inside() {
        let edge = fix(12.7537, 80.1972);
        let exact = haversine_distance(
            edge.latitude,
            edge.longitude,
            DEFAULT_ZONE_LATITUDE,
            DEFAULT_ZONE_LONGITUDE,
        );
        let zone = SafeZone::new(DEFAULT_ZONE_LATITUDE, DEFAULT_ZONE_LONGITUDE, exact).unwrap();

        let eval = evaluate(&edge, &zone);
        assert_eq!(eval.distance_m, zone.radius_m());
        assert_eq!(eval.status, ZoneStatus::Inside);
    }

    #[test]
    fn test_outside_default_zone() {
        // About 100 m north of the default center
        let eval = evaluate(&fix(12.754582, 80.197107), &SafeZone::default());
        assert!(eval.distance_m > 90.0 && eval.distance_m < 110.0);
        assert_eq!(eval.status, ZoneStatus::Outside);
    }

    #[test]
    fn test_zone_validation() {
        assert!(SafeZone::new(12.0, 80.0, 0.0).is_err());
        assert!(SafeZone::new(12.0, 80.0, -5.0).is_err());
        assert!(SafeZone::new(91.0, 80.0, 10.0).is_err());
        assert!(SafeZone::new(12.0, 181.0, 10.0).is_err());
        assert!(SafeZone::new(12.0, 80.0, f64::NAN).is_err());
    }

    #[test]
    fn test_zone_deserialization_validates() {
        let ok: SafeZone =
            serde_json::from_str(r#"{"latitude": 12.75, "longitude": 80.19, "radius_m": 25.0}"#)
                .unwrap();
        assert_eq!(ok.radius_m(), 25.0);

        let bad = serde_json::from_str::<SafeZone>(
            r#"{"latitude": 12.75, "longitude": 80.19, "radius_m": 0.0}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_antipodal_points_do_not_nan() {
        let d = haversine_distance(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_M).abs() < 1.0);
    }
}
