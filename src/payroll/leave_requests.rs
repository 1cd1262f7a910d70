//! Approver decisions on leave requests.

use chrono::Datelike;
use rust_decimal::Decimal;
use tracing::info;

use crate::error::{PayrollError, Result};
use crate::model::leave::{LeaveRequest, LeaveStatus};
use crate::store::PayrollTx;

async fn pending<T: PayrollTx>(tx: &mut T, id: u64, to: LeaveStatus) -> Result<LeaveRequest> {
    let request = tx
        .leave_request(id)
        .await?
        .ok_or_else(|| PayrollError::not_found("leave_request", id))?;
    if request.status != LeaveStatus::Pending {
        return Err(PayrollError::forbidden("leave_request", id, request.status, to));
    }
    Ok(request)
}

/// Approves a pending request. Paid leave is taken from the balance of the
/// year the leave starts in.
pub async fn approve<T: PayrollTx>(tx: &mut T, id: u64, actor: u64) -> Result<LeaveRequest> {
    let mut request = pending(tx, id, LeaveStatus::Approved).await?;
    if request.end_date < request.start_date {
        return Err(PayrollError::Validation(format!(
            "leave request {id} ends before it starts"
        )));
    }

    if request.is_paid() {
        let year = request.start_date.year();
        let mut balance = tx
            .leave_balance(request.employee_id, request.leave_type_id, year)
            .await?
            .ok_or_else(|| {
                PayrollError::Validation(format!(
                    "employee {} has no {} balance for {year}",
                    request.employee_id, request.leave_type_code
                ))
            })?;
        balance
            .consume(Decimal::from(request.days_count))
            .map_err(PayrollError::Validation)?;
        tx.save_leave_balance(&balance).await?;
    }

    tx.set_leave_status(id, LeaveStatus::Approved, actor).await?;
    request.status = LeaveStatus::Approved;
    info!(leave_request_id = id, actor, paid = request.is_paid(), "Leave approved");
    Ok(request)
}

pub async fn reject<T: PayrollTx>(tx: &mut T, id: u64, actor: u64) -> Result<LeaveRequest> {
    let mut request = pending(tx, id, LeaveStatus::Rejected).await?;
    tx.set_leave_status(id, LeaveStatus::Rejected, actor).await?;
    request.status = LeaveStatus::Rejected;
    info!(leave_request_id = id, actor, "Leave rejected");
    Ok(request)
}
