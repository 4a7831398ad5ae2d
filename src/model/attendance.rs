use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::utils::geofence::Coordinate;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    HalfDay,
}

/// Variants are declared in lifecycle order, so `Ord` compares progress through the day.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    CheckedIn,
    CheckedOut,
}

/// One employee's attendance for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "att-8f14e45f-ceea-467a-9b65-4a1f3e7c0b2d",
    "employee_id": 1000,
    "date": "2026-01-05",
    "check_in_time": "2026-01-05T09:00:00",
    "check_out_time": "2026-01-05T17:30:00",
    "check_in_location": {"latitude": 28.6139, "longitude": 77.209, "accuracy": 12.0, "timestamp": 1767603600000i64},
    "check_out_location": {"latitude": 28.614, "longitude": 77.2091, "accuracy": 9.0, "timestamp": 1767634200000i64},
    "status": "present",
    "working_minutes": 510,
    "synthetic_location": false,
    "clock_skew": false
}))]
pub struct AttendanceDay {
    pub id: String,
    pub employee_id: u64,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_in_time: Option<NaiveDateTime>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_out_time: Option<NaiveDateTime>,
    pub check_in_location: Option<Coordinate>,
    pub check_out_location: Option<Coordinate>,
    pub status: AttendanceStatus,
    pub working_minutes: Option<i64>,
    /// A demo-mode substitute position was used for check-in or check-out
    pub synthetic_location: bool,
    /// Check-out preceded check-in on the wall clock; working time was clamped to 0
    pub clock_skew: bool,
}

impl AttendanceDay {
    pub fn new(employee_id: u64, date: NaiveDate) -> Self {
        Self {
            id: format!("att-{}", uuid::Uuid::new_v4()),
            employee_id,
            date,
            check_in_time: None,
            check_out_time: None,
            check_in_location: None,
            check_out_location: None,
            status: AttendanceStatus::Absent,
            working_minutes: None,
            synthetic_location: false,
            clock_skew: false,
        }
    }

    pub fn state(&self) -> SessionState {
        match (self.check_in_time, self.check_out_time) {
            (None, _) => SessionState::NotStarted,
            (Some(_), None) => SessionState::CheckedIn,
            (Some(_), Some(_)) => SessionState::CheckedOut,
        }
    }
}
