use crate::api::attendance::{
    AttendanceHistoryResponse, AttendanceResponse, CheckInOutRequest, GeofenceQuery,
    GeofenceResponse, HistoryQuery,
};
use crate::model::attendance::{AttendanceDay, AttendanceStatus, SessionState};
use crate::utils::geofence::{Coordinate, GeofenceStatus};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Geo Attendance API",
        version = "1.0.0",
        description = r#"
## Geofenced Attendance

Daily check-in and check-out for employees, gated on the device being inside
the office geofence.

### Rules
- One attendance record per employee per calendar day
- Check-in, then check-out; a checked-out day is final
- Both actions need a location within the configured radius of the office
- Readings substituted in demo mode are flagged as `synthetic_location`

### Security
All endpoints require a **JWT Bearer** access token carrying an `employee_id`.
"#,
    ),
    paths(
        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::today,
        crate::api::attendance::history,
        crate::api::attendance::get_record,
        crate::api::attendance::geofence_status,
    ),
    components(
        schemas(
            AttendanceDay,
            AttendanceStatus,
            SessionState,
            Coordinate,
            GeofenceStatus,
            CheckInOutRequest,
            AttendanceResponse,
            AttendanceHistoryResponse,
            HistoryQuery,
            GeofenceQuery,
            GeofenceResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Attendance", description = "Geofenced attendance APIs"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
