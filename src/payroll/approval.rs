//! Payslip state machine:
//!
//! ```text
//! calculated --approve--> approved --mark_paid--> paid
//!      \                     /
//!       +----- reverse -----+----> reversed
//! ```

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{PayrollError, Result};
use crate::model::payslip::{Payslip, PayslipStatus};
use crate::payroll::{allocator, assembler};
use crate::store::PayrollTx;

/// Whether `from -> to` is one of the allowed edges.
pub fn can_transition(from: PayslipStatus, to: PayslipStatus) -> bool {
    use PayslipStatus::*;
    matches!(
        (from, to),
        (Calculated, Approved) | (Approved, Paid) | (Calculated, Reversed) | (Approved, Reversed)
    )
}

async fn load<T: PayrollTx>(tx: &mut T, payslip_id: u64, to: PayslipStatus) -> Result<Payslip> {
    let payslip = tx
        .payslip(payslip_id)
        .await?
        .ok_or_else(|| PayrollError::not_found("payslip", payslip_id))?;
    if !can_transition(payslip.status, to) {
        return Err(PayrollError::forbidden("payslip", payslip_id, payslip.status, to));
    }
    Ok(payslip)
}

pub async fn approve<T: PayrollTx>(
    tx: &mut T,
    payslip_id: u64,
    actor: u64,
    now: DateTime<Utc>,
) -> Result<Payslip> {
    let mut payslip = load(tx, payslip_id, PayslipStatus::Approved).await?;
    payslip.status = PayslipStatus::Approved;
    payslip.approved_by = Some(actor);
    payslip.approved_at = Some(now);
    tx.update_payslip(&payslip).await?;
    info!(payslip_id, actor, "Payslip approved");
    Ok(payslip)
}

pub async fn mark_paid<T: PayrollTx>(
    tx: &mut T,
    payslip_id: u64,
    actor: u64,
    now: DateTime<Utc>,
) -> Result<Payslip> {
    let mut payslip = load(tx, payslip_id, PayslipStatus::Paid).await?;
    payslip.status = PayslipStatus::Paid;
    payslip.paid_at = Some(now);
    tx.update_payslip(&payslip).await?;
    info!(payslip_id, actor, "Payslip marked paid");
    Ok(payslip)
}

/// Reverses the payslip and gives back every advance installment it took.
/// Lines and installment rows stay as history; the month is free again.
/// Holds the (employee, month) slot so it cannot interleave with a
/// recalculation of the same payslip.
pub async fn reverse<T: PayrollTx>(
    tx: &mut T,
    payslip_id: u64,
    actor: u64,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Payslip> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(PayrollError::Validation("a reversal reason is required".to_string()));
    }

    let mut payslip = load(tx, payslip_id, PayslipStatus::Reversed).await?;
    assembler::take_slot(tx, payslip.employee_id, payslip.month).await?;
    let released = allocator::release(tx, payslip_id, false).await?;

    payslip.status = PayslipStatus::Reversed;
    payslip.reversed_by = Some(actor);
    payslip.reversed_at = Some(now);
    payslip.reversal_reason = Some(reason.to_string());
    tx.update_payslip(&payslip).await?;

    info!(payslip_id, actor, released_installments = released, "Payslip reversed");
    Ok(payslip)
}
