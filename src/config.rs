use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveTime;
use dotenvy::dotenv;

use crate::attendance::session::AttendancePolicy;
use crate::utils::geofence::{
    DEFAULT_OFFICE_LAT, DEFAULT_OFFICE_LNG, DEFAULT_RADIUS_METERS, OfficeAnchor,
};
use crate::utils::location::{
    DEFAULT_ACCURACY_THRESHOLD, DEFAULT_LOCATION_TIMEOUT_MS, LocationPolicy,
};

#[derive(Clone, Debug)]
pub struct Config {
    /// Absent means the in-memory mock store is used
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub server_addr: String,
    pub api_prefix: String,

    // Rate limiting
    pub rate_protected_per_min: u32,

    // Geofence
    pub office_lat: f64,
    pub office_lng: f64,
    pub geofence_radius: f64,
    pub location_timeout_ms: u64,
    pub accuracy_threshold: f64,
    pub enforce_accuracy: bool,
    /// Substitute the office position when the device has none. Never enable in production.
    pub demo_mode: bool,

    // Attendance policy
    pub late_cutoff: Option<NaiveTime>,
    pub half_day_below_minutes: Option<i64>,

    pub session_cache_capacity: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            jwt_secret: String::new(),
            server_addr: "127.0.0.1:8080".to_string(),
            api_prefix: "/api".to_string(),
            rate_protected_per_min: 1000,
            office_lat: DEFAULT_OFFICE_LAT,
            office_lng: DEFAULT_OFFICE_LNG,
            geofence_radius: DEFAULT_RADIUS_METERS,
            location_timeout_ms: DEFAULT_LOCATION_TIMEOUT_MS,
            accuracy_threshold: DEFAULT_ACCURACY_THRESHOLD,
            enforce_accuracy: false,
            demo_mode: false,
            late_cutoff: None,
            half_day_below_minutes: None,
            session_cache_capacity: 100_000,
        }
    }
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("{key} has invalid value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}

fn optional<T>(key: &str, parse: impl Fn(&str) -> Result<T>) -> Result<Option<T>> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse(raw.trim())
            .with_context(|| format!("{key} has invalid value '{raw}'"))
            .map(Some),
        _ => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            server_addr: env::var("SERVER_ADDR").unwrap_or(defaults.server_addr),
            database_url: optional("DATABASE_URL", |s| Ok(s.to_string()))?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            api_prefix: env::var("API_PREFIX").unwrap_or(defaults.api_prefix),

            rate_protected_per_min: parsed("RATE_PROTECTED_PER_MIN", defaults.rate_protected_per_min)?,

            office_lat: parsed("OFFICE_LAT", defaults.office_lat)?,
            office_lng: parsed("OFFICE_LNG", defaults.office_lng)?,
            geofence_radius: parsed("GEOFENCE_RADIUS", defaults.geofence_radius)?,
            location_timeout_ms: parsed("LOCATION_TIMEOUT_MS", defaults.location_timeout_ms)?,
            accuracy_threshold: parsed("ACCURACY_THRESHOLD", defaults.accuracy_threshold)?,
            enforce_accuracy: parsed("ENFORCE_ACCURACY", defaults.enforce_accuracy)?,
            demo_mode: parsed("DEMO_MODE", defaults.demo_mode)?,

            late_cutoff: optional("LATE_CUTOFF", |s| {
                NaiveTime::parse_from_str(s, "%H:%M").map_err(Into::into)
            })?,
            half_day_below_minutes: optional("HALF_DAY_BELOW_MINUTES", |s| {
                s.parse::<i64>().map_err(Into::into)
            })?,

            session_cache_capacity: parsed("SESSION_CACHE_CAPACITY", defaults.session_cache_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.office_lat) {
            return Err(anyhow!("OFFICE_LAT must be within [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&self.office_lng) {
            return Err(anyhow!("OFFICE_LNG must be within [-180, 180]"));
        }
        if !(self.geofence_radius.is_finite() && self.geofence_radius > 0.0) {
            return Err(anyhow!("GEOFENCE_RADIUS must be a positive number of meters"));
        }
        if self.location_timeout_ms == 0 {
            return Err(anyhow!("LOCATION_TIMEOUT_MS must be greater than zero"));
        }
        Ok(())
    }

    pub fn anchor(&self) -> OfficeAnchor {
        OfficeAnchor {
            latitude: self.office_lat,
            longitude: self.office_lng,
            radius_meters: self.geofence_radius,
        }
    }

    pub fn attendance_policy(&self) -> AttendancePolicy {
        AttendancePolicy {
            late_after: self.late_cutoff,
            half_day_below_minutes: self.half_day_below_minutes,
            accuracy_threshold: self.accuracy_threshold,
            enforce_accuracy: self.enforce_accuracy,
        }
    }

    pub fn location_policy(&self) -> LocationPolicy {
        LocationPolicy {
            timeout: Duration::from_millis(self.location_timeout_ms),
            fallback_to_anchor: self.demo_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_office_geofence() {
        let config = Config::default();
        let anchor = config.anchor();
        assert_eq!(anchor.latitude, 28.6139);
        assert_eq!(anchor.longitude, 77.2090);
        assert_eq!(anchor.radius_meters, 500.0);
        assert_eq!(config.location_policy().timeout, Duration::from_millis(15_000));
        assert!(!config.location_policy().fallback_to_anchor);
        assert!(!config.attendance_policy().enforce_accuracy);
    }

    #[test]
    fn test_validation_rejects_bad_geofence() {
        let config = Config {
            geofence_radius: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            office_lat: 123.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_demo_mode_enables_fallback() {
        let config = Config {
            demo_mode: true,
            ..Config::default()
        };
        assert!(config.location_policy().fallback_to_anchor);
    }
}
