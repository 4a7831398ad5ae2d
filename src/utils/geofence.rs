use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Mean Earth radius in meters used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

pub const DEFAULT_OFFICE_LAT: f64 = 28.6139;
pub const DEFAULT_OFFICE_LNG: f64 = 77.2090;
pub const DEFAULT_RADIUS_METERS: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "latitude": 28.6139,
    "longitude": 77.2090,
    "accuracy": 12.5,
    "timestamp": 1767259800000i64
}))]
pub struct Coordinate {
    /// Degrees, -90..=90
    pub latitude: f64,
    /// Degrees, -180..=180
    pub longitude: f64,
    /// Reported horizontal accuracy in meters
    pub accuracy: Option<f64>,
    /// Epoch milliseconds of the reading
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum CoordinateError {
    #[display(fmt = "latitude must be within [-90, 90]")]
    LatitudeOutOfRange,
    #[display(fmt = "longitude must be within [-180, 180]")]
    LongitudeOutOfRange,
}

impl std::error::Error for CoordinateError {}

impl Coordinate {
    pub fn new(
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
        timestamp: i64,
    ) -> Result<Self, CoordinateError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinateError::LatitudeOutOfRange);
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinateError::LongitudeOutOfRange);
        }

        Ok(Self {
            latitude,
            longitude,
            accuracy,
            timestamp,
        })
    }

    /// Zeroed or non-finite fields mean the reading was never really taken.
    pub fn is_unset(&self) -> bool {
        let blank = |v: f64| v == 0.0 || !v.is_finite();
        blank(self.latitude) || blank(self.longitude)
    }
}

/// Fixed office point plus the radius that counts as "at the office".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OfficeAnchor {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
}

impl Default for OfficeAnchor {
    fn default() -> Self {
        Self {
            latitude: DEFAULT_OFFICE_LAT,
            longitude: DEFAULT_OFFICE_LNG,
            radius_meters: DEFAULT_RADIUS_METERS,
        }
    }
}

impl OfficeAnchor {
    /// The anchor as a coordinate stamped at `timestamp`.
    pub fn as_coordinate(&self, accuracy: Option<f64>, timestamp: i64) -> Coordinate {
        Coordinate {
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy,
            timestamp,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GeofenceStatus {
    Inside,
    Outside,
    Unknown,
}

/// Great-circle distance between two points, in meters.
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    haversine(a.latitude, a.longitude, b.latitude, b.longitude)
}

fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

pub fn distance_from_anchor(point: &Coordinate, anchor: &OfficeAnchor) -> f64 {
    distance_meters(point, &anchor.as_coordinate(None, point.timestamp))
}

/// Classify a reading against the office geofence. The boundary is inclusive.
pub fn classify(point: Option<&Coordinate>, anchor: &OfficeAnchor) -> GeofenceStatus {
    let Some(point) = point else {
        return GeofenceStatus::Unknown;
    };
    if point.is_unset() {
        return GeofenceStatus::Unknown;
    }

    if distance_from_anchor(point, anchor) <= anchor.radius_meters {
        GeofenceStatus::Inside
    } else {
        GeofenceStatus::Outside
    }
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{}m", meters.round())
    } else {
        format!("{:.2}km", meters / 1000.0)
    }
}

pub fn accuracy_description(accuracy: Option<f64>) -> &'static str {
    match accuracy {
        None => "Unknown",
        Some(a) if a == 0.0 || !a.is_finite() => "Unknown",
        Some(a) if a < 10.0 => "Very High",
        Some(a) if a < 30.0 => "High",
        Some(a) if a < 100.0 => "Medium",
        Some(_) => "Low",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
            accuracy: Some(10.0),
            timestamp: 0,
        }
    }

    /// Point `meters` due north of the default office.
    fn north_of_office(meters: f64) -> Coordinate {
        let d_lat = (meters / EARTH_RADIUS_METERS).to_degrees();
        at(DEFAULT_OFFICE_LAT + d_lat, DEFAULT_OFFICE_LNG)
    }

    #[test]
    fn test_same_point_is_zero_distance() {
        let p = at(28.6139, 77.2090);
        assert_eq!(distance_meters(&p, &p), 0.0);
    }

    #[test]
    fn test_known_distance_delhi_to_mumbai() {
        let delhi = at(28.6139, 77.2090);
        let mumbai = at(19.0760, 72.8777);
        let km = distance_meters(&delhi, &mumbai) / 1000.0;
        assert!((km - 1148.1).abs() < 1.0, "got {km}");
    }

    #[test]
    fn test_office_point_is_inside() {
        let anchor = OfficeAnchor::default();
        assert_eq!(
            classify(Some(&at(28.6139, 77.2090)), &anchor),
            GeofenceStatus::Inside
        );
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let point = north_of_office(500.0);
        let exact = distance_from_anchor(&point, &OfficeAnchor::default());
        assert!((exact - 500.0).abs() < 1e-6);

        let anchor = OfficeAnchor {
            radius_meters: exact,
            ..OfficeAnchor::default()
        };
        assert_eq!(classify(Some(&point), &anchor), GeofenceStatus::Inside);

        // Building the point from degrees lands ~7e-11 m past 500, so step in by a micrometre.
        let edge = north_of_office(500.0 - 1e-6);
        assert!(distance_from_anchor(&edge, &OfficeAnchor::default()) <= 500.0);
        assert_eq!(
            classify(Some(&edge), &OfficeAnchor::default()),
            GeofenceStatus::Inside
        );
    }

    #[test]
    fn test_just_past_radius_is_outside() {
        let anchor = OfficeAnchor::default();
        assert_eq!(
            classify(Some(&north_of_office(501.0)), &anchor),
            GeofenceStatus::Outside
        );
        assert_eq!(
            classify(Some(&north_of_office(499.0)), &anchor),
            GeofenceStatus::Inside
        );
    }

    #[test]
    fn test_absent_or_zeroed_reading_is_unknown() {
        let anchor = OfficeAnchor::default();
        assert_eq!(classify(None, &anchor), GeofenceStatus::Unknown);
        assert_eq!(classify(Some(&at(0.0, 0.0)), &anchor), GeofenceStatus::Unknown);
        assert_eq!(classify(Some(&at(0.0, 77.2)), &anchor), GeofenceStatus::Unknown);
        assert_eq!(
            classify(Some(&at(f64::NAN, 77.2)), &anchor),
            GeofenceStatus::Unknown
        );
    }

    #[test]
    fn test_coordinate_range_validation() {
        assert_eq!(
            Coordinate::new(91.0, 0.0, None, 0),
            Err(CoordinateError::LatitudeOutOfRange)
        );
        assert_eq!(
            Coordinate::new(10.0, -180.5, None, 0),
            Err(CoordinateError::LongitudeOutOfRange)
        );
        assert!(Coordinate::new(-90.0, 180.0, None, 0).is_ok());
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(42.4), "42m");
        assert_eq!(format_distance(999.4), "999m");
        assert_eq!(format_distance(1534.0), "1.53km");
    }

    #[test]
    fn test_accuracy_description() {
        assert_eq!(accuracy_description(None), "Unknown");
        assert_eq!(accuracy_description(Some(5.0)), "Very High");
        assert_eq!(accuracy_description(Some(20.0)), "High");
        assert_eq!(accuracy_description(Some(50.0)), "Medium");
        assert_eq!(accuracy_description(Some(150.0)), "Low");
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(GeofenceStatus::Inside.to_string(), "inside");
        assert_eq!(GeofenceStatus::Unknown.as_ref(), "unknown");
    }

    proptest! {
        #[test]
        fn prop_distance_to_self_is_zero(lat in -90.0f64..=90.0, lon in -180.0f64..=180.0) {
            let p = at(lat, lon);
            prop_assert_eq!(distance_meters(&p, &p), 0.0);
        }

        #[test]
        fn prop_distance_is_symmetric(
            lat1 in -90.0f64..=90.0,
            lon1 in -180.0f64..=180.0,
            lat2 in -90.0f64..=90.0,
            lon2 in -180.0f64..=180.0,
        ) {
            let a = at(lat1, lon1);
            let b = at(lat2, lon2);
            let ab = distance_meters(&a, &b);
            let ba = distance_meters(&b, &a);
            prop_assert!((ab - ba).abs() <= 1e-6 * ab.max(1.0));
        }
    }
}
