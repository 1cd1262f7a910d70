use actix_web::{HttpResponse, Responder, web};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;

use crate::api::Service;
use crate::api::actor::Actor;
use crate::model::advance::Advance;
use crate::payroll::allocator::NewAdvance;
use crate::utils::calendar::parse_month;

#[derive(Deserialize, ToSchema)]
pub struct CreateAdvance {
    #[schema(example = 1001)]
    pub employee_id: u64,

    #[schema(value_type = String, example = "1200.00")]
    pub principal: Decimal,

    #[schema(example = 3)]
    pub installments_count: u32,

    #[schema(example = "2025-04")]
    pub deduction_start_month: String,
}

#[utoipa::path(
    post,
    path = "/api/advances",
    request_body = CreateAdvance,
    responses(
        (status = 201, description = "Advance created as pending", body = Advance),
        (status = 422, description = "Advance rejected by validation")
    ),
    tag = "Advances"
)]
pub async fn create_advance(
    actor: Actor,
    service: Service,
    payload: web::Json<CreateAdvance>,
) -> actix_web::Result<impl Responder> {
    let request = NewAdvance {
        employee_id: payload.employee_id,
        principal: payload.principal,
        installments_count: payload.installments_count,
        deduction_start_month: parse_month(&payload.deduction_start_month)?,
    };
    let advance = service.create_advance(request, actor.id).await?;
    Ok(HttpResponse::Created().json(advance))
}

#[utoipa::path(
    post,
    path = "/api/advances/{id}/approve",
    params(("id", description = "Advance ID")),
    responses(
        (status = 200, description = "Advance approved", body = Advance),
        (status = 409, description = "Advance is not pending")
    ),
    tag = "Advances"
)]
pub async fn approve_advance(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let advance = service.approve_advance(path.into_inner(), actor.id).await?;
    Ok(HttpResponse::Ok().json(advance))
}

#[utoipa::path(
    post,
    path = "/api/advances/{id}/cancel",
    params(("id", description = "Advance ID")),
    responses(
        (status = 200, description = "Advance cancelled", body = Advance),
        (status = 409, description = "Advance already has deductions or is closed")
    ),
    tag = "Advances"
)]
pub async fn cancel_advance(
    actor: Actor,
    service: Service,
    path: web::Path<u64>,
) -> actix_web::Result<impl Responder> {
    let advance = service.cancel_advance(path.into_inner(), actor.id).await?;
    Ok(HttpResponse::Ok().json(advance))
}
