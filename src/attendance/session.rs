use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::warn;

use crate::model::attendance::{AttendanceDay, AttendanceStatus, SessionState};
use crate::utils::geofence::{self, GeofenceStatus, OfficeAnchor};
use crate::utils::location::{DEFAULT_ACCURACY_THRESHOLD, LocationReading};

/// Why a check-in or check-out was refused. Nothing is mutated when one is returned.
#[derive(Debug, Clone, PartialEq, derive_more::Display)]
pub enum GateError {
    #[display(fmt = "Location unavailable. Enable location services and try again")]
    LocationUnavailable,
    #[display(
        fmt = "You are {:.0}m from the office; check-in is allowed within {:.0}m",
        distance_meters,
        radius_meters
    )]
    OutsideGeofence {
        distance_meters: f64,
        radius_meters: f64,
    },
    #[display(
        fmt = "Location accuracy {:.0}m is worse than the required {:.0}m",
        accuracy,
        threshold
    )]
    InaccurateReading { accuracy: f64, threshold: f64 },
    #[display(fmt = "Already checked in today")]
    AlreadyCheckedIn,
    #[display(fmt = "No active check-in found for today")]
    NotCheckedIn,
    #[display(fmt = "Session is for {} but the current day is {}", session, today)]
    DayMismatch { session: NaiveDate, today: NaiveDate },
}

impl std::error::Error for GateError {}

impl GateError {
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::LocationUnavailable => "location_unavailable",
            GateError::OutsideGeofence { .. } => "outside_geofence",
            GateError::InaccurateReading { .. } => "inaccurate_reading",
            GateError::AlreadyCheckedIn => "already_checked_in",
            GateError::NotCheckedIn => "not_checked_in",
            GateError::DayMismatch { .. } => "day_mismatch",
        }
    }

    /// Location failures clear up once the user moves or gets a better fix.
    /// Ordering failures point at a caller bug and are not worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GateError::LocationUnavailable
                | GateError::OutsideGeofence { .. }
                | GateError::InaccurateReading { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendancePolicy {
    /// Check-ins strictly after this time of day are marked late.
    pub late_after: Option<NaiveTime>,
    /// Days shorter than this at check-out are marked half-day.
    pub half_day_below_minutes: Option<i64>,
    pub accuracy_threshold: f64,
    /// Reject readings less accurate than `accuracy_threshold`.
    pub enforce_accuracy: bool,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            late_after: None,
            half_day_below_minutes: None,
            accuracy_threshold: DEFAULT_ACCURACY_THRESHOLD,
            enforce_accuracy: false,
        }
    }
}

/// Today's attendance for one employee, moving NotStarted -> CheckedIn -> CheckedOut.
#[derive(Debug, Clone)]
pub struct AttendanceSession {
    day: AttendanceDay,
}

impl AttendanceSession {
    pub fn new(employee_id: u64, date: NaiveDate) -> Self {
        Self {
            day: AttendanceDay::new(employee_id, date),
        }
    }

    /// Pick up a day that was already (partially) recorded.
    pub fn resume(day: AttendanceDay) -> Self {
        Self { day }
    }

    pub fn day(&self) -> &AttendanceDay {
        &self.day
    }

    pub fn state(&self) -> SessionState {
        self.day.state()
    }

    pub fn attempt_check_in(
        &mut self,
        reading: Option<&LocationReading>,
        anchor: &OfficeAnchor,
        policy: &AttendancePolicy,
        now: NaiveDateTime,
    ) -> Result<AttendanceDay, GateError> {
        let reading = gate(reading, anchor, policy)?;

        if self.state() != SessionState::NotStarted {
            return Err(GateError::AlreadyCheckedIn);
        }
        if now.date() != self.day.date {
            return Err(GateError::DayMismatch {
                session: self.day.date,
                today: now.date(),
            });
        }

        let late = policy.late_after.is_some_and(|cutoff| now.time() > cutoff);

        self.day.check_in_time = Some(now);
        self.day.check_in_location = Some(reading.coordinate);
        self.day.status = if late {
            AttendanceStatus::Late
        } else {
            AttendanceStatus::Present
        };
        self.day.synthetic_location |= reading.is_synthetic();

        Ok(self.day.clone())
    }

    pub fn attempt_check_out(
        &mut self,
        reading: Option<&LocationReading>,
        anchor: &OfficeAnchor,
        policy: &AttendancePolicy,
        now: NaiveDateTime,
    ) -> Result<AttendanceDay, GateError> {
        let reading = gate(reading, anchor, policy)?;

        let checked_in_at = match (self.state(), self.day.check_in_time) {
            (SessionState::CheckedIn, Some(t)) => t,
            _ => return Err(GateError::NotCheckedIn),
        };

        let elapsed = (now - checked_in_at).num_minutes();
        let clock_skew = elapsed < 0;
        if clock_skew {
            warn!(
                employee_id = self.day.employee_id,
                date = %self.day.date,
                elapsed,
                "Check-out precedes check-in, clamping working time to zero"
            );
        }
        let working_minutes = elapsed.max(0);

        self.day.check_out_time = Some(now);
        self.day.check_out_location = Some(reading.coordinate);
        self.day.working_minutes = Some(working_minutes);
        self.day.clock_skew = clock_skew;
        self.day.synthetic_location |= reading.is_synthetic();
        if policy
            .half_day_below_minutes
            .is_some_and(|min| working_minutes < min)
        {
            self.day.status = AttendanceStatus::HalfDay;
        }

        Ok(self.day.clone())
    }
}

fn gate<'a>(
    reading: Option<&'a LocationReading>,
    anchor: &OfficeAnchor,
    policy: &AttendancePolicy,
) -> Result<&'a LocationReading, GateError> {
    let reading = reading.ok_or(GateError::LocationUnavailable)?;

    match geofence::classify(Some(&reading.coordinate), anchor) {
        GeofenceStatus::Unknown => Err(GateError::LocationUnavailable),
        status => {
            if policy.enforce_accuracy {
                if let Some(accuracy) = reading.coordinate.accuracy {
                    if accuracy > policy.accuracy_threshold {
                        return Err(GateError::InaccurateReading {
                            accuracy,
                            threshold: policy.accuracy_threshold,
                        });
                    }
                }
            }

            if status == GeofenceStatus::Outside {
                return Err(GateError::OutsideGeofence {
                    distance_meters: geofence::distance_from_anchor(&reading.coordinate, anchor),
                    radius_meters: anchor.radius_meters,
                });
            }
            Ok(reading)
        }
    }
}
