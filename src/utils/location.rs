use std::time::Duration;

use actix_web::rt::time::timeout;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::utils::geofence::{Coordinate, OfficeAnchor};

pub const DEFAULT_LOCATION_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_ACCURACY_THRESHOLD: f64 = 50.0;
/// Accuracy stamped on the synthetic office reading.
pub const FALLBACK_ACCURACY: f64 = 20.0;

#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum LocationError {
    #[display(fmt = "Location permission denied")]
    PermissionDenied,
    #[display(fmt = "Location unavailable: {}", _0)]
    Unavailable(String),
    #[display(fmt = "Timed out waiting for a location fix after {}ms", _0)]
    Timeout(u64),
}

impl std::error::Error for LocationError {}

/// Where a reading came from. `Fallback` readings are synthetic and must be disclosed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReadingSource {
    Device,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocationReading {
    pub coordinate: Coordinate,
    pub source: ReadingSource,
}

impl LocationReading {
    pub fn device(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            source: ReadingSource::Device,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == ReadingSource::Fallback
    }
}

/// Anything able to produce a single best-effort position on demand.
pub trait LocationProvider {
    fn current_location(&self) -> BoxFuture<'_, Result<Coordinate, LocationError>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationPolicy {
    pub timeout: Duration,
    /// Substitute the office anchor when no real reading can be had. Demo use only.
    pub fallback_to_anchor: bool,
}

impl Default for LocationPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_LOCATION_TIMEOUT_MS),
            fallback_to_anchor: false,
        }
    }
}

/// Request one reading from `provider`, never waiting longer than the policy timeout.
///
/// On failure the reading is either the anchor itself, marked as
/// [`ReadingSource::Fallback`], or the error when fallback is disabled.
pub async fn acquire<P>(
    provider: &P,
    policy: &LocationPolicy,
    anchor: &OfficeAnchor,
    now_ms: i64,
) -> Result<LocationReading, LocationError>
where
    P: LocationProvider + ?Sized,
{
    let outcome = match timeout(policy.timeout, provider.current_location()).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::Timeout(policy.timeout.as_millis() as u64)),
    };

    match outcome {
        Ok(coordinate) => {
            debug!(
                latitude = coordinate.latitude,
                longitude = coordinate.longitude,
                accuracy = ?coordinate.accuracy,
                "Location acquired"
            );
            Ok(LocationReading::device(coordinate))
        }
        Err(e) if policy.fallback_to_anchor => {
            warn!(error = %e, "Location unavailable, substituting office location (demo mode)");
            Ok(LocationReading {
                coordinate: anchor.as_coordinate(Some(FALLBACK_ACCURACY), now_ms),
                source: ReadingSource::Fallback,
            })
        }
        Err(e) => Err(e),
    }
}

/// Position reported by the mobile client alongside its request.
#[derive(Debug, Clone, Default)]
pub struct ReportedLocation {
    pub coordinate: Option<Coordinate>,
    pub permission_denied: bool,
}

impl LocationProvider for ReportedLocation {
    fn current_location(&self) -> BoxFuture<'_, Result<Coordinate, LocationError>> {
        let result = if self.permission_denied {
            Err(LocationError::PermissionDenied)
        } else {
            self.coordinate
                .ok_or_else(|| LocationError::Unavailable("no position reported".into()))
        };
        futures::future::ready(result).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    impl LocationProvider for Stalled {
        fn current_location(&self) -> BoxFuture<'_, Result<Coordinate, LocationError>> {
            futures::future::pending().boxed()
        }
    }

    fn short_policy(fallback_to_anchor: bool) -> LocationPolicy {
        LocationPolicy {
            timeout: Duration::from_millis(20),
            fallback_to_anchor,
        }
    }

    fn reading(latitude: f64, longitude: f64) -> Coordinate {
        Coordinate {
            latitude,
            longitude,
            accuracy: Some(8.0),
            timestamp: 1_000,
        }
    }

    #[actix_web::test]
    async fn test_device_reading_passes_through() {
        let provider = ReportedLocation {
            coordinate: Some(reading(28.61, 77.20)),
            permission_denied: false,
        };
        let got = acquire(&provider, &LocationPolicy::default(), &OfficeAnchor::default(), 0)
            .await
            .unwrap();
        assert_eq!(got.source, ReadingSource::Device);
        assert_eq!(got.coordinate.latitude, 28.61);
        assert!(!got.is_synthetic());
    }

    #[actix_web::test]
    async fn test_permission_denied_without_fallback_is_error() {
        let provider = ReportedLocation {
            coordinate: Some(reading(28.61, 77.20)),
            permission_denied: true,
        };
        let err = acquire(&provider, &short_policy(false), &OfficeAnchor::default(), 0)
            .await
            .unwrap_err();
        assert_eq!(err, LocationError::PermissionDenied);
    }

    #[actix_web::test]
    async fn test_missing_reading_falls_back_to_anchor_in_demo_mode() {
        let anchor = OfficeAnchor::default();
        let got = acquire(&ReportedLocation::default(), &short_policy(true), &anchor, 42)
            .await
            .unwrap();
        assert!(got.is_synthetic());
        assert_eq!(got.coordinate.latitude, anchor.latitude);
        assert_eq!(got.coordinate.longitude, anchor.longitude);
        assert_eq!(got.coordinate.accuracy, Some(FALLBACK_ACCURACY));
        assert_eq!(got.coordinate.timestamp, 42);
    }

    #[actix_web::test]
    async fn test_stalled_provider_times_out() {
        let err = acquire(&Stalled, &short_policy(false), &OfficeAnchor::default(), 0)
            .await
            .unwrap_err();
        assert_eq!(err, LocationError::Timeout(20));
    }

    #[actix_web::test]
    async fn test_stalled_provider_falls_back_in_demo_mode() {
        let got = acquire(&Stalled, &short_policy(true), &OfficeAnchor::default(), 0)
            .await
            .unwrap();
        assert_eq!(got.source, ReadingSource::Fallback);
    }
}
