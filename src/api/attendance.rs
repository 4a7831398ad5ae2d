use crate::attendance::service::{AttendanceError, AttendanceService, Outcome};
use crate::auth::auth::AuthUser;
use crate::model::attendance::AttendanceDay;
use crate::utils::geofence::{self, Coordinate, GeofenceStatus};
use crate::utils::location::ReportedLocation;
use actix_web::{HttpResponse, Responder, ResponseError, http::StatusCode, web};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};

/// Location reported by the device. Missing coordinates mean no fix could be taken.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CheckInOutRequest {
    #[schema(example = 28.6139)]
    pub latitude: Option<f64>,
    #[schema(example = 77.2090)]
    pub longitude: Option<f64>,
    #[schema(example = 12.5)]
    pub accuracy: Option<f64>,
    #[schema(example = 1767603600000i64)]
    pub timestamp: Option<i64>,
    /// The user declined the location permission prompt
    #[schema(example = false)]
    pub permission_denied: Option<bool>,
}

impl CheckInOutRequest {
    fn into_provider(self, now_ms: i64) -> Result<ReportedLocation, geofence::CoordinateError> {
        let coordinate = match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(
                lat,
                lng,
                self.accuracy,
                self.timestamp.unwrap_or(now_ms),
            )?),
            _ => None,
        };

        Ok(ReportedLocation {
            coordinate,
            permission_denied: self.permission_denied.unwrap_or(false),
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct AttendanceResponse {
    #[schema(example = true)]
    pub success: bool,
    pub data: AttendanceDay,
    /// The record reached the attendance store
    #[schema(example = true)]
    pub persisted: bool,
    /// Check-in/out used a substitute office position (demo mode)
    #[schema(example = false)]
    pub synthetic_location: bool,
    #[schema(nullable = true)]
    pub warning: Option<String>,
}

impl From<Outcome> for AttendanceResponse {
    fn from(outcome: Outcome) -> Self {
        Self {
            success: true,
            persisted: outcome.persist_error.is_none(),
            synthetic_location: outcome.synthetic_location,
            warning: outcome
                .persist_error
                .map(|_| "Attendance recorded but not yet saved; it will be retried".to_string()),
            data: outcome.record,
        }
    }
}

#[derive(Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    #[schema(example = 1)]
    /// Pagination page number (start with 1)
    pub page: Option<u32>,
    #[schema(example = 20)]
    /// Pagination per page number
    pub per_page: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct AttendanceHistoryResponse {
    pub data: Vec<AttendanceDay>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 3)]
    pub total: i64,
}

#[derive(Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct GeofenceQuery {
    #[schema(example = 28.6139)]
    pub latitude: Option<f64>,
    #[schema(example = 77.2090)]
    pub longitude: Option<f64>,
    #[schema(example = 12.5)]
    pub accuracy: Option<f64>,
}

#[derive(Serialize, ToSchema)]
pub struct GeofenceResponse {
    pub status: GeofenceStatus,
    #[schema(example = 14.2, nullable = true)]
    pub distance_meters: Option<f64>,
    #[schema(example = "14m", nullable = true)]
    pub distance_display: Option<String>,
    #[schema(example = 500.0)]
    pub radius_meters: f64,
    #[schema(example = "High")]
    pub accuracy: String,
}

impl ResponseError for AttendanceError {
    fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::Gate(e) if e.is_retryable() => StatusCode::UNPROCESSABLE_ENTITY,
            AttendanceError::Gate(_) => StatusCode::CONFLICT,
            AttendanceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AttendanceError::Gate(e) => json!({
                "success": false,
                "error": e.kind(),
                "message": e.to_string(),
                "retryable": e.is_retryable(),
            }),
            AttendanceError::Internal(e) => {
                tracing::error!(error = %e, "Attendance request failed");
                json!({
                    "success": false,
                    "error": "internal",
                    "message": "Internal Server Error",
                })
            }
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

fn require_employee(auth: &AuthUser) -> actix_web::Result<u64> {
    auth.employee_id.ok_or_else(|| {
        tracing::info!(user_id = auth.user_id, username = %auth.username, "No employee profile");
        actix_web::error::ErrorForbidden("No employee profile")
    })
}

fn bad_location(e: geofence::CoordinateError) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({
        "success": false,
        "error": "invalid_location",
        "message": e.to_string(),
    }))
}

/// Check-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-in",
    request_body(
        content = CheckInOutRequest,
        description = "Current device location",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Checked in successfully", body = AttendanceResponse),
        (status = 400, description = "Malformed coordinates", body = Object, example = json!({
            "success": false, "error": "invalid_location", "message": "latitude must be within [-90, 90]"
        })),
        (status = 409, description = "Already checked in today", body = Object, example = json!({
            "success": false, "error": "already_checked_in", "message": "Already checked in today", "retryable": false
        })),
        (status = 422, description = "Outside the office geofence or no location", body = Object, example = json!({
            "success": false, "error": "outside_geofence", "message": "You are 1200m from the office; check-in is allowed within 500m", "retryable": true
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<CheckInOutRequest>,
) -> actix_web::Result<impl Responder> {
    let employee_id = require_employee(&auth)?;
    let now = Local::now();

    let provider = match payload.into_inner().into_provider(now.timestamp_millis()) {
        Ok(p) => p,
        Err(e) => return Ok(bad_location(e)),
    };

    let outcome = service
        .check_in(employee_id, &provider, now.naive_local(), now.timestamp_millis())
        .await?;

    Ok(HttpResponse::Ok().json(AttendanceResponse::from(outcome)))
}

/// Check-out endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-out",
    request_body(
        content = CheckInOutRequest,
        description = "Current device location",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Checked out successfully", body = AttendanceResponse),
        (status = 400, description = "Malformed coordinates"),
        (status = 409, description = "No active check-in found for today", body = Object, example = json!({
            "success": false, "error": "not_checked_in", "message": "No active check-in found for today", "retryable": false
        })),
        (status = 422, description = "Outside the office geofence or no location"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Internal server error")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn check_out(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    payload: web::Json<CheckInOutRequest>,
) -> actix_web::Result<impl Responder> {
    let employee_id = require_employee(&auth)?;
    let now = Local::now();

    let provider = match payload.into_inner().into_provider(now.timestamp_millis()) {
        Ok(p) => p,
        Err(e) => return Ok(bad_location(e)),
    };

    let outcome = service
        .check_out(employee_id, &provider, now.naive_local(), now.timestamp_millis())
        .await?;

    Ok(HttpResponse::Ok().json(AttendanceResponse::from(outcome)))
}

/// Today's attendance for the caller
#[utoipa::path(
    get,
    path = "/api/attendance/today",
    responses(
        (status = 200, description = "Today's attendance", body = AttendanceDay),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn today(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
) -> actix_web::Result<impl Responder> {
    let employee_id = require_employee(&auth)?;
    let day = service.today(employee_id, Local::now().naive_local()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "data": day,
        "state": day.state(),
    })))
}

/// Attendance history, newest first
#[utoipa::path(
    get,
    path = "/api/attendance/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Paginated attendance history", body = AttendanceHistoryResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn history(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    query: web::Query<HistoryQuery>,
) -> actix_web::Result<impl Responder> {
    let employee_id = require_employee(&auth)?;

    let page = query.page.unwrap_or(1).max(1);
    let per_page = query.per_page.unwrap_or(20).clamp(1, 100);

    let (data, total) = service
        .store()
        .history(employee_id, page, per_page)
        .await
        .map_err(AttendanceError::Internal)?;

    Ok(HttpResponse::Ok().json(AttendanceHistoryResponse {
        data,
        page,
        per_page,
        total,
    }))
}

/// Single attendance record
#[utoipa::path(
    get,
    path = "/api/attendance/{id}",
    params(
        ("id" = String, Path, description = "Attendance record id")
    ),
    responses(
        (status = 200, description = "Attendance record", body = AttendanceDay),
        (status = 404, description = "Not found", body = Object, example = json!({
            "success": false, "error": "not_found"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn get_record(
    auth: AuthUser,
    service: web::Data<AttendanceService>,
    path: web::Path<String>,
) -> actix_web::Result<impl Responder> {
    let employee_id = require_employee(&auth)?;
    let id = path.into_inner();

    let record = service
        .store()
        .find_by_id(employee_id, &id)
        .await
        .map_err(AttendanceError::Internal)?;

    match record {
        Some(r) => Ok(HttpResponse::Ok().json(json!({ "success": true, "data": r }))),
        None => Ok(HttpResponse::NotFound().json(json!({
            "success": false,
            "error": "not_found"
        }))),
    }
}

/// Where a position sits relative to the office geofence
#[utoipa::path(
    get,
    path = "/api/attendance/geofence",
    params(GeofenceQuery),
    responses(
        (status = 200, description = "Geofence classification", body = GeofenceResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn geofence_status(
    service: web::Data<AttendanceService>,
    query: web::Query<GeofenceQuery>,
) -> impl Responder {
    let anchor = &service.anchor;
    let point = match (query.latitude, query.longitude) {
        (Some(latitude), Some(longitude)) => Some(Coordinate {
            latitude,
            longitude,
            accuracy: query.accuracy,
            timestamp: 0,
        }),
        _ => None,
    };

    let status = geofence::classify(point.as_ref(), anchor);
    let distance = match status {
        GeofenceStatus::Unknown => None,
        _ => point.map(|p| geofence::distance_from_anchor(&p, anchor)),
    };

    HttpResponse::Ok().json(GeofenceResponse {
        status,
        distance_meters: distance,
        distance_display: distance.map(geofence::format_distance),
        radius_meters: anchor.radius_meters,
        accuracy: geofence::accuracy_description(query.accuracy).to_string(),
    })
}
