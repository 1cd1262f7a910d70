use actix_web::{HttpResponse, Responder, web};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::actor::Actor;
use crate::api::{EmployeeMonthQuery, Service};
use crate::model::payslip::{Payslip, PayslipPage, PayslipWithLines};
use crate::payroll::annual_increase::IncreaseReport;
use crate::payroll::batch::BatchReport;
use crate::payroll::resolver::ResolvedComponents;
use crate::store::{EmployeeFilter, PayslipQuery};
use crate::utils::calendar::parse_month;

#[derive(Deserialize, ToSchema)]
pub struct CalculatePayslip {
    #[schema(example = 1001)]
    pub employee_id: u64,

    #[schema(example = "2025-03")]
    pub month: String,
}

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct ListPayslipsQuery {
    #[schema(example = "2025-03")]
    pub month: String,

    #[schema(example = "calculated")]
    pub status: Option<String>,

    pub employee_id: Option<u64>,

    pub department_id: Option<u64>,

    #[schema(example = 1)]
    pub page: Option<u32>,

    #[schema(example = 20)]
    pub per_page: Option<u32>,
}

impl ListPayslipsQuery {
    fn filters(&self) -> PayslipQuery {
        PayslipQuery {
            status: self.status.clone(),
            employee_id: self.employee_id,
            department_id: self.department_id,
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ReversePayslip {
    #[schema(example = "Wrong overtime hours")]
    pub reason: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RunBatch {
    #[schema(example = "2025-03")]
    pub month: String,

    #[serde(default)]
    pub employee_ids: Option<Vec<u64>>,

    #[serde(default)]
    pub department_id: Option<u64>,
}

#[derive(Deserialize, ToSchema)]
pub struct ApplyIncreases {
    /// Defaults to the current date.
    #[schema(value_type = Option<String>, format = "date")]
    pub today: Option<NaiveDate>,

    #[serde(default)]
    pub dry_run: bool,
}

#[utoipa::path(
    post,
    path = "/api/payroll/payslips",
    request_body = CalculatePayslip,
    responses(
        (status = 201, description = "Payslip calculated", body = PayslipWithLines),
        (status = 409, description = "A live payslip already exists"),
        (status = 422, description = "No active contract or invalid input"),
        (status = 423, description = "Payroll for this employee/month is in progress"),
        (status = 504, description = "Assembly timed out")
    ),
    tag = "Payroll"
)]
pub async fn calculate_payslip(
    actor: Actor,
    service: Service,
    payload: web::Json<CalculatePayslip>,
) -> actix_web::Result<impl Responder> {
    let month = parse_month(&payload.month)?;
    let payslip = service
        .calculate_payslip(payload.employee_id, month, actor.id)
        .await?;
    Ok(HttpResponse::Created().json(payslip))
}

#[utoipa::path(
    get,
    path = "/api/payroll/payslips",
    params(ListPayslipsQuery),
    responses(
        (status = 200, description = "Payslips of the month", body = PayslipPage),
        (status = 422, description = "Invalid month or status")
    ),
    tag = "Payroll"
)]
pub async fn list_payslips(
    service: Service,
    query: web::Query<ListPayslipsQuery>,
) -> actix_web::Result<impl Responder> {
    let month = parse_month(&query.month)?;
    let page = service.list_payslips(month, &query.filters()).await?;
    Ok(HttpResponse::Ok().json(page))
}

#[utoipa::path(
    get,
    path = "/api/payroll/payslips/{id}",
    params(("id", description = "Payslip ID")),
    responses(
        (status = 200, description = "Payslip with its lines", body = PayslipWithLines),
        (status = 404, description = "Payslip not found")
    ),
    tag = "Payroll"
)]
pub async fn get_payslip(service: Service, path: web::Path<u64>) -> actix_web::Result<impl Responder> {
    let payslip = service.get_payslip(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(payslip))
}

#[utoipa::path(
    post,
    path = "/api/payroll/payslips/{id}/recalculate",
    params(("id", description = "Payslip ID")),
    responses(
        (status = 200, description = "Payslip rebuilt", body = PayslipWithLines),
        (status = 404, description = "Payslip not found"),
        (status = 409, description = "Payslip is no longer calculated")
    ),
    tag = "Payroll"
)]
pub async fn recalculate_payslip(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let payslip = service.recalculate_payslip(path.into_inner(), actor.id).await?;
    Ok(HttpResponse::Ok().json(payslip))
}

#[utoipa::path(
    post,
    path = "/api/payroll/payslips/{id}/approve",
    params(("id", description = "Payslip ID")),
    responses(
        (status = 200, description = "Payslip approved", body = Payslip),
        (status = 409, description = "Transition not allowed")
    ),
    tag = "Payroll"
)]
pub async fn approve_payslip(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let payslip = service.approve_payslip(path.into_inner(), actor.id).await?;
    Ok(HttpResponse::Ok().json(payslip))
}

#[utoipa::path(
    post,
    path = "/api/payroll/payslips/{id}/pay",
    params(("id", description = "Payslip ID")),
    responses(
        (status = 200, description = "Payslip marked paid", body = Payslip),
        (status = 409, description = "Transition not allowed")
    ),
    tag = "Payroll"
)]
pub async fn mark_payslip_paid(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let payslip = service.mark_payslip_paid(path.into_inner(), actor.id).await?;
    Ok(HttpResponse::Ok().json(payslip))
}

#[utoipa::path(
    post,
    path = "/api/payroll/payslips/{id}/reverse",
    params(("id", description = "Payslip ID")),
    request_body = ReversePayslip,
    responses(
        (status = 200, description = "Payslip reversed", body = Payslip),
        (status = 409, description = "Transition not allowed"),
        (status = 422, description = "Missing reason")
    ),
    tag = "Payroll"
)]
pub async fn reverse_payslip(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
    payload: web::Json<ReversePayslip>,
) -> actix_web::Result<impl Responder> {
    let payslip = service
        .reverse_payslip(path.into_inner(), actor.id, &payload.reason)
        .await?;
    Ok(HttpResponse::Ok().json(payslip))
}

#[utoipa::path(
    post,
    path = "/api/payroll/batches",
    request_body = RunBatch,
    responses(
        (status = 200, description = "Per-employee outcome of the run", body = BatchReport),
        (status = 422, description = "Invalid month")
    ),
    tag = "Payroll"
)]
pub async fn run_batch(
    actor: Actor,
    service: Service,
    payload: web::Json<RunBatch>,
) -> actix_web::Result<impl Responder> {
    let month = parse_month(&payload.month)?;
    let payload = payload.into_inner();
    let filter = EmployeeFilter {
        employee_ids: payload.employee_ids,
        department_id: payload.department_id,
    };
    let report = service.run_monthly_batch(month, actor.id, &filter).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    post,
    path = "/api/payroll/batches/{run_id}/cancel",
    params(("run_id", description = "Batch run ID")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "No such running batch")
    ),
    tag = "Payroll"
)]
pub async fn cancel_batch(service: Service, path: web::Path<Uuid>) -> actix_web::Result<impl Responder> {
    let run_id = path.into_inner();
    service.cancel_batch(&run_id)?;
    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "message": "Batch cancellation requested",
        "run_id": run_id.to_string()
    })))
}

#[utoipa::path(
    post,
    path = "/api/payroll/increases",
    request_body = ApplyIncreases,
    responses(
        (status = 200, description = "Increases applied or previewed", body = IncreaseReport)
    ),
    tag = "Payroll"
)]
pub async fn apply_increases(
    service: Service,
    payload: web::Json<ApplyIncreases>,
) -> actix_web::Result<impl Responder> {
    let today = payload.today.unwrap_or_else(|| Utc::now().date_naive());
    let report = service.apply_annual_increases(today, payload.dry_run).await?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    get,
    path = "/api/payroll/components",
    params(EmployeeMonthQuery),
    responses(
        (status = 200, description = "Components effective in the month", body = ResolvedComponents),
        (status = 422, description = "No active contract")
    ),
    tag = "Payroll"
)]
pub async fn active_components(
    service: Service,
    query: web::Query<EmployeeMonthQuery>,
) -> actix_web::Result<impl Responder> {
    let resolved = service
        .get_active_components(query.employee_id, query.month()?)
        .await?;
    Ok(HttpResponse::Ok().json(resolved))
}
