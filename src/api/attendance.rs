use actix_web::{HttpResponse, Responder, web};

use crate::api::actor::Actor;
use crate::api::{EmployeeMonthQuery, Service};
use crate::model::attendance::AttendanceSummary;

/// Stored summary, or a freshly computed one if the month has none yet
#[utoipa::path(
    get,
    path = "/api/attendance/summaries",
    params(EmployeeMonthQuery),
    responses(
        (status = 200, description = "Monthly attendance summary", body = AttendanceSummary),
        (status = 404, description = "Employee not found"),
        (status = 422, description = "No active contract or invalid month")
    ),
    tag = "Attendance"
)]
pub async fn get_summary(
    service: Service,
    query: web::Query<EmployeeMonthQuery>,
) -> actix_web::Result<impl Responder> {
    let summary = service
        .get_attendance_summary(query.employee_id, query.month()?)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[utoipa::path(
    post,
    path = "/api/attendance/summaries/{id}/approve",
    params(("id", description = "Attendance summary ID")),
    responses(
        (status = 200, description = "Summary approved and frozen", body = AttendanceSummary),
        (status = 404, description = "Summary not found")
    ),
    tag = "Attendance"
)]
pub async fn approve_summary(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let summary = service
        .approve_attendance_summary(path.into_inner(), actor.id)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[utoipa::path(
    post,
    path = "/api/attendance/summaries/{id}/recalculate",
    params(("id", description = "Attendance summary ID")),
    responses(
        (status = 200, description = "Summary recomputed", body = AttendanceSummary),
        (status = 404, description = "Summary not found"),
        (status = 409, description = "Summary is approved")
    ),
    tag = "Attendance"
)]
pub async fn recalculate_summary(
    _actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let summary = service
        .recalculate_attendance_summary(path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

#[utoipa::path(
    post,
    path = "/api/attendance/summaries/{id}/reset",
    params(("id", description = "Attendance summary ID")),
    responses(
        (status = 200, description = "Approval cleared", body = AttendanceSummary),
        (status = 404, description = "Summary not found")
    ),
    tag = "Attendance"
)]
pub async fn reset_approval(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let summary = service
        .reset_attendance_approval(path.into_inner(), actor.id)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}
