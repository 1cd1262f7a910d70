use actix_web::{HttpResponse, Responder, web};

use crate::api::actor::Actor;
use crate::api::{EmployeeMonthQuery, Service};
use crate::model::leave::{LeaveRequest, LeaveSummary};

#[utoipa::path(
    get,
    path = "/api/leave/summaries",
    params(EmployeeMonthQuery),
    responses(
        (status = 200, description = "Paid and unpaid leave days of the month", body = LeaveSummary),
        (status = 422, description = "No active contract or invalid month")
    ),
    tag = "Leave"
)]
pub async fn get_summary(
    service: Service,
    query: web::Query<EmployeeMonthQuery>,
) -> actix_web::Result<impl Responder> {
    let summary = service
        .get_leave_summary(query.employee_id, query.month()?)
        .await?;
    Ok(HttpResponse::Ok().json(summary))
}

/// Approve a pending leave request; paid leave is taken from the balance
#[utoipa::path(
    put,
    path = "/api/leave/{id}/approve",
    params(("id", description = "Leave request ID")),
    responses(
        (status = 200, description = "Leave approved", body = LeaveRequest),
        (status = 404, description = "Leave request not found"),
        (status = 409, description = "Leave request is not pending"),
        (status = 422, description = "Insufficient balance")
    ),
    tag = "Leave"
)]
pub async fn approve_leave(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let request = service.approve_leave_request(path.into_inner(), actor.id).await?;
    Ok(HttpResponse::Ok().json(request))
}

#[utoipa::path(
    put,
    path = "/api/leave/{id}/reject",
    params(("id", description = "Leave request ID")),
    responses(
        (status = 200, description = "Leave rejected", body = LeaveRequest),
        (status = 404, description = "Leave request not found"),
        (status = 409, description = "Leave request is not pending")
    ),
    tag = "Leave"
)]
pub async fn reject_leave(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let request = service.reject_leave_request(path.into_inner(), actor.id).await?;
    Ok(HttpResponse::Ok().json(request))
}
