//! Advance installments: which advances pay this month, how much, and the
//! bookkeeping on the advance row when an installment is taken or undone.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::PayrollSettings;
use crate::error::{PayrollError, Result};
use crate::model::advance::{Advance, AdvanceInstallment, AdvanceStatus};
use crate::store::PayrollTx;
use crate::utils::calendar::month_start;
use crate::utils::money::ceil_cents;

/// Scheduled installment: the principal split evenly, rounded up to the cent,
/// never more than what is still owed.
pub fn installment_amount(advance: &Advance) -> Decimal {
    if advance.installments_count == 0 {
        return advance.remaining_amount;
    }
    ceil_cents(advance.principal / Decimal::from(advance.installments_count)).min(advance.remaining_amount)
}

/// Advances that deduct in `month`, oldest start month first.
pub fn eligible(advances: &[Advance], month: NaiveDate) -> Vec<&Advance> {
    let month = month_start(month);
    let mut picked: Vec<&Advance> = advances
        .iter()
        .filter(|a| a.status.is_deductible())
        .filter(|a| month_start(a.deduction_start_month) <= month)
        .filter(|a| a.remaining_amount > Decimal::ZERO)
        .collect();
    picked.sort_by_key(|a| (a.deduction_start_month, a.created_at, a.id));
    picked
}

/// `remaining` must equal `principal` minus what live payslips already took.
pub fn check_balance(advance: &Advance, live_total: Decimal) -> Result<()> {
    if advance.remaining_amount < Decimal::ZERO {
        return Err(PayrollError::integrity(format!(
            "advance {} has negative remaining amount {}",
            advance.id, advance.remaining_amount
        )));
    }
    let expected = advance.principal - live_total;
    if advance.remaining_amount != expected {
        return Err(PayrollError::integrity(format!(
            "advance {} remaining {} does not match principal {} less installments {}",
            advance.id, advance.remaining_amount, advance.principal, live_total
        )));
    }
    Ok(())
}

/// Books one installment against the advance.
pub fn take_installment(advance: &mut Advance, amount: Decimal) {
    advance.remaining_amount -= amount;
    advance.paid_installments += 1;
    advance.status = if advance.remaining_amount.is_zero() {
        AdvanceStatus::Completed
    } else {
        AdvanceStatus::InProgress
    };
}

/// Undoes one installment, reopening the advance.
pub fn restore_installment(advance: &mut Advance, amount: Decimal) -> Result<()> {
    let remaining = advance.remaining_amount + amount;
    if remaining > advance.principal || advance.paid_installments == 0 {
        return Err(PayrollError::integrity(format!(
            "restoring {} on advance {} would exceed its principal {}",
            amount, advance.id, advance.principal
        )));
    }
    advance.remaining_amount = remaining;
    advance.paid_installments -= 1;
    advance.status = if advance.paid_installments == 0 {
        AdvanceStatus::Approved
    } else {
        AdvanceStatus::InProgress
    };
    Ok(())
}

/// Allocates this month's installments for the payslip under construction.
/// Returns each installment with the advance state after it was taken.
pub async fn allocate<T: PayrollTx>(
    tx: &mut T,
    employee_id: u64,
    month: NaiveDate,
    payslip_id: u64,
) -> Result<Vec<(Advance, AdvanceInstallment)>> {
    let advances = tx.advances_for_employee(employee_id).await?;
    let mut taken = Vec::new();

    for advance in eligible(&advances, month) {
        let live_total = tx.live_installments_total(advance.id).await?;
        check_balance(advance, live_total)?;

        let amount = installment_amount(advance);
        let mut advance = advance.clone();
        take_installment(&mut advance, amount);

        let mut installment = AdvanceInstallment {
            id: 0,
            advance_id: advance.id,
            payslip_id,
            month: month_start(month),
            amount,
        };
        installment.id = tx.insert_installment(&installment).await?;
        tx.update_advance(&advance).await?;

        debug!(
            advance_id = advance.id,
            %amount,
            remaining = %advance.remaining_amount,
            status = %advance.status,
            "Advance installment taken"
        );
        taken.push((advance, installment));
    }

    Ok(taken)
}

/// Gives back every installment a payslip took. Rows are deleted when the
/// payslip is being rebuilt and kept (as history) when it is reversed.
pub async fn release<T: PayrollTx>(tx: &mut T, payslip_id: u64, delete_rows: bool) -> Result<u32> {
    let installments = tx.installments_for_payslip(payslip_id).await?;
    let mut released = 0;

    for installment in &installments {
        let mut advance = tx.advance(installment.advance_id).await?.ok_or_else(|| {
            PayrollError::integrity(format!(
                "installment {} references missing advance {}",
                installment.id, installment.advance_id
            ))
        })?;
        restore_installment(&mut advance, installment.amount)?;
        tx.update_advance(&advance).await?;
        released += 1;
    }

    if delete_rows {
        tx.delete_installments(payslip_id).await?;
    }
    Ok(released)
}

#[derive(Debug, Clone)]
pub struct NewAdvance {
    pub employee_id: u64,
    pub principal: Decimal,
    pub installments_count: u32,
    pub deduction_start_month: NaiveDate,
}

/// Creation-time limits. Payroll itself never re-checks the salary cap.
pub fn validate_new(
    request: &NewAdvance,
    monthly_salary: Decimal,
    open: &[Advance],
    settings: &PayrollSettings,
) -> Result<()> {
    let fail = |msg: String| Err(PayrollError::AdvanceValidationFailed(msg));

    if request.principal <= Decimal::ZERO {
        return fail("principal must be positive".to_string());
    }
    if request.principal > settings.advance_max_principal {
        return fail(format!(
            "principal {} exceeds the maximum of {}",
            request.principal, settings.advance_max_principal
        ));
    }
    if request.installments_count < 1 || request.installments_count > settings.advance_max_installments {
        return fail(format!(
            "installments must be between 1 and {}",
            settings.advance_max_installments
        ));
    }

    let installment = ceil_cents(request.principal / Decimal::from(request.installments_count));
    let cap = monthly_salary * settings.advance_installment_salary_cap_ratio;
    if installment > cap {
        return fail(format!(
            "monthly installment {installment} exceeds {cap} allowed for a salary of {monthly_salary}"
        ));
    }

    let outstanding: Decimal = open
        .iter()
        .filter(|a| a.status.is_open())
        .map(|a| a.remaining_amount)
        .sum();
    let ceiling = monthly_salary * settings.advance_outstanding_salary_multiple;
    if outstanding + request.principal > ceiling {
        return fail(format!(
            "outstanding advances {outstanding} plus {} exceed {ceiling}",
            request.principal
        ));
    }

    Ok(())
}

pub async fn create<T: PayrollTx>(
    tx: &mut T,
    request: &NewAdvance,
    monthly_salary: Decimal,
    settings: &PayrollSettings,
    actor: u64,
    now: DateTime<Utc>,
) -> Result<Advance> {
    let open = tx.advances_for_employee(request.employee_id).await?;
    validate_new(request, monthly_salary, &open, settings)?;

    let mut advance = Advance {
        id: 0,
        employee_id: request.employee_id,
        principal: request.principal,
        installments_count: request.installments_count,
        remaining_amount: request.principal,
        deduction_start_month: month_start(request.deduction_start_month),
        status: AdvanceStatus::Pending,
        paid_installments: 0,
        created_by: Some(actor),
        approved_by: None,
        created_at: now,
    };
    advance.id = tx.insert_advance(&advance).await?;
    info!(advance_id = advance.id, employee_id = advance.employee_id, "Advance created");
    Ok(advance)
}

pub async fn approve<T: PayrollTx>(tx: &mut T, advance_id: u64, actor: u64) -> Result<Advance> {
    let mut advance = tx
        .advance(advance_id)
        .await?
        .ok_or_else(|| PayrollError::not_found("advance", advance_id))?;
    if advance.status != AdvanceStatus::Pending {
        return Err(PayrollError::forbidden("advance", advance_id, advance.status, AdvanceStatus::Approved));
    }
    advance.status = AdvanceStatus::Approved;
    advance.approved_by = Some(actor);
    tx.update_advance(&advance).await?;
    Ok(advance)
}

pub async fn cancel<T: PayrollTx>(tx: &mut T, advance_id: u64) -> Result<Advance> {
    let mut advance = tx
        .advance(advance_id)
        .await?
        .ok_or_else(|| PayrollError::not_found("advance", advance_id))?;
    let untouched = advance.paid_installments == 0 && tx.live_installments_total(advance_id).await?.is_zero();
    if !matches!(advance.status, AdvanceStatus::Pending | AdvanceStatus::Approved) || !untouched {
        return Err(PayrollError::forbidden("advance", advance_id, advance.status, AdvanceStatus::Cancelled));
    }
    advance.status = AdvanceStatus::Cancelled;
    tx.update_advance(&advance).await?;
    Ok(advance)
}
