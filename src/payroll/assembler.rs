//! Builds a payslip for one (employee, month) inside the caller's transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, instrument};

use crate::config::PayrollSettings;
use crate::error::{PayrollError, Result};
use crate::model::advance::{Advance, AdvanceInstallment};
use crate::model::attendance::AttendanceSummary;
use crate::model::contract::Contract;
use crate::model::employee::Employee;
use crate::model::leave::LeaveSummary;
use crate::model::payslip::{LineSource, Payslip, PayslipLine, PayslipStatus, PayslipWithLines};
use crate::model::salary_component::{CalculationMethod, ComponentKind, SalaryComponent};
use crate::payroll::formula::FormulaContext;
use crate::payroll::resolver::{self, BASIC_SALARY_CODE, ResolvedComponents};
use crate::payroll::{allocator, attendance_summary, leave_summary};
use crate::store::PayrollTx;
use crate::utils::calendar::month_start;
use crate::utils::money::round_cents;

const COMPONENT_ORDER_OFFSET: i32 = 10;
const ABSENCE_ORDER: i32 = 900;
const LATE_ORDER: i32 = 901;
const OVERTIME_ORDER: i32 = 902;
const UNPAID_LEAVE_ORDER: i32 = 950;
const ADVANCE_ORDER: i32 = 1000;

#[allow(clippy::too_many_arguments)]
fn line(
    code: impl Into<String>,
    name: impl Into<String>,
    kind: ComponentKind,
    source: LineSource,
    quantity: Decimal,
    rate: Decimal,
    amount: Decimal,
    order: i32,
) -> PayslipLine {
    PayslipLine {
        id: 0,
        payslip_id: 0,
        code: code.into(),
        name: name.into(),
        kind,
        source,
        quantity,
        rate,
        amount: round_cents(amount),
        order,
        component_id: None,
        advance_installment_id: None,
        leave_summary_month: None,
        details: serde_json::Value::Null,
    }
}

fn component_details(component: &SalaryComponent) -> serde_json::Value {
    match component.method {
        CalculationMethod::Fixed => json!({ "method": "fixed" }),
        CalculationMethod::Percentage => json!({
            "method": "percentage",
            "percentage": component.percentage,
            "of": "basic",
        }),
        CalculationMethod::Formula => json!({
            "method": "formula",
            "formula": component.formula,
        }),
    }
}

/// Formula `days`: paid days in the month.
fn payable_days(settings: &PayrollSettings, attendance: &AttendanceSummary, leave: &LeaveSummary) -> Decimal {
    let unpaid = attendance.absent_days + leave.unpaid_days;
    Decimal::from(settings.days_in_month_divisor.saturating_sub(unpaid))
}

/// Basic, component, attendance and leave lines, in emission order.
pub fn emit_lines(
    settings: &PayrollSettings,
    contract: &Contract,
    resolved: &ResolvedComponents,
    attendance: &AttendanceSummary,
    leave: &LeaveSummary,
) -> Vec<PayslipLine> {
    let basic = contract.basic_salary;
    let mut lines = Vec::new();

    let basic_component = resolved.components.iter().find(|c| c.is_basic);
    let mut basic_line = line(
        BASIC_SALARY_CODE,
        basic_component.map(|c| c.name.as_str()).unwrap_or("Basic salary"),
        ComponentKind::Earning,
        LineSource::Contract,
        Decimal::ONE,
        basic,
        basic,
        1,
    );
    basic_line.component_id = basic_component.map(|c| c.id).filter(|id| *id != 0);
    basic_line.details = json!({ "contract_id": contract.id });
    lines.push(basic_line);

    let days = payable_days(settings, attendance, leave);
    let mut gross = lines[0].amount;

    for component in resolved.non_basic() {
        let ctx = FormulaContext::payroll(basic, gross, days);
        let amount = resolver::component_amount(component, basic, &ctx);
        let mut l = line(
            component.code.clone(),
            component.name.clone(),
            component.kind,
            LineSource::Contract,
            Decimal::ONE,
            round_cents(amount),
            amount,
            component.order + COMPONENT_ORDER_OFFSET,
        );
        l.component_id = Some(component.id);
        l.details = component_details(component);
        if component.kind == ComponentKind::Earning {
            gross += l.amount;
        }
        lines.push(l);
    }

    if attendance.absent_days > 0 {
        let mut l = line(
            "ABSENCE_DEDUCTION",
            "Absence deduction",
            ComponentKind::Deduction,
            LineSource::Attendance,
            Decimal::from(attendance.absent_days),
            attendance.day_rate,
            attendance.absence_deduction_amount,
            ABSENCE_ORDER,
        );
        l.details = json!({
            "absent_days": attendance.absent_days,
            "day_rate": attendance.day_rate,
            "days_in_month_divisor": settings.days_in_month_divisor,
        });
        lines.push(l);
    }

    if attendance.total_late_minutes > 0 {
        let mut l = line(
            "LATE_DEDUCTION",
            "Late arrival deduction",
            ComponentKind::Deduction,
            LineSource::Attendance,
            Decimal::from(attendance.total_late_minutes),
            attendance.minute_rate.round_dp(6),
            attendance.late_deduction_amount,
            LATE_ORDER,
        );
        l.details = json!({
            "late_days": attendance.late_days,
            "total_late_minutes": attendance.total_late_minutes,
            "day_rate": attendance.day_rate,
            "late_grace_minutes": settings.late_grace_minutes,
        });
        lines.push(l);
    }

    if attendance.total_overtime_hours > Decimal::ZERO {
        let hourly = attendance.overtime_amount / attendance.total_overtime_hours;
        let mut l = line(
            "OVERTIME",
            "Overtime",
            ComponentKind::Earning,
            LineSource::Overtime,
            attendance.total_overtime_hours,
            round_cents(hourly),
            attendance.overtime_amount,
            OVERTIME_ORDER,
        );
        l.details = json!({
            "total_overtime_hours": attendance.total_overtime_hours,
            "day_rate": attendance.day_rate,
            "overtime_multiplier": settings.overtime_multiplier,
        });
        lines.push(l);
    }

    if leave.unpaid_days > 0 {
        let rate = leave.deduction_amount / Decimal::from(leave.unpaid_days);
        let mut l = line(
            "UNPAID_LEAVE_DEDUCTION",
            "Unpaid leave deduction",
            ComponentKind::Deduction,
            LineSource::Leave,
            Decimal::from(leave.unpaid_days),
            round_cents(rate),
            leave.deduction_amount,
            UNPAID_LEAVE_ORDER,
        );
        l.leave_summary_month = Some(leave.month);
        l.details = json!({
            "paid_days": leave.paid_days,
            "unpaid_days": leave.unpaid_days,
            "by_type": leave.details,
        });
        lines.push(l);
    }

    lines
}

pub fn advance_line(position: usize, advance: &Advance, installment: &AdvanceInstallment) -> PayslipLine {
    let mut l = line(
        format!("ADVANCE_{}", advance.id),
        format!("Advance {} installment {}", advance.id, advance.paid_installments),
        ComponentKind::Deduction,
        LineSource::Advance,
        Decimal::ONE,
        installment.amount,
        installment.amount,
        ADVANCE_ORDER + position as i32,
    );
    l.advance_installment_id = Some(installment.id);
    l.details = json!({
        "advance_id": advance.id,
        "installment": advance.paid_installments,
        "installments_count": advance.installments_count,
        "remaining_after": advance.remaining_amount,
    });
    l
}

/// `(gross, total_deductions, net)`.
pub fn totals(lines: &[PayslipLine]) -> (Decimal, Decimal, Decimal) {
    let sum = |kind| -> Decimal { lines.iter().filter(|l| l.kind == kind).map(|l| l.amount).sum() };
    let gross = sum(ComponentKind::Earning);
    let deductions = sum(ComponentKind::Deduction);
    (gross, deductions, gross - deductions)
}

fn sort_lines(lines: &mut [PayslipLine]) {
    lines.sort_by_key(|l| (l.kind, l.order, l.id));
}

async fn load_employee<T: PayrollTx>(tx: &mut T, employee_id: u64) -> Result<Employee> {
    let employee = tx
        .employee(employee_id)
        .await?
        .ok_or_else(|| PayrollError::not_found("employee", employee_id))?;
    if !employee.is_payroll_eligible() {
        return Err(PayrollError::Validation(format!(
            "employee {employee_id} is {} and not eligible for payroll",
            employee.status
        )));
    }
    Ok(employee)
}

pub(crate) async fn take_slot<T: PayrollTx>(tx: &mut T, employee_id: u64, month: NaiveDate) -> Result<()> {
    if tx.try_lock_slot(employee_id, month).await? {
        Ok(())
    } else {
        Err(PayrollError::PayrollInProgress { employee_id, month })
    }
}

/// Fills `payslip` (already stored, `id != 0`) with lines, installments and totals.
async fn fill<T: PayrollTx>(
    tx: &mut T,
    settings: &PayrollSettings,
    employee: &Employee,
    contract: &Contract,
    payslip: &mut Payslip,
    now: DateTime<Utc>,
) -> Result<Vec<PayslipLine>> {
    let month = payslip.month;

    let attendance =
        attendance_summary::materialize(tx, settings, employee, contract.basic_salary, month, now).await?;
    if settings.require_approved_attendance_for_payroll && !attendance.is_approved {
        return Err(PayrollError::SummaryApprovalRequired {
            employee_id: employee.id,
            month,
        });
    }
    let leave = leave_summary::materialize(tx, settings, employee.id, contract.basic_salary, month, now).await?;
    let resolved = resolver::resolve_for(tx, contract, month).await?;

    let mut lines = emit_lines(settings, contract, &resolved, &attendance, &leave);

    let installments = allocator::allocate(tx, employee.id, month, payslip.id).await?;
    for (i, (advance, installment)) in installments.iter().enumerate() {
        lines.push(advance_line(i, advance, installment));
    }

    for l in lines.iter_mut() {
        l.payslip_id = payslip.id;
        l.id = tx.insert_line(l).await?;
    }

    let (gross, total_deductions, net) = totals(&lines);
    payslip.gross = gross;
    payslip.total_deductions = total_deductions;
    payslip.net = net;
    tx.update_payslip(payslip).await?;

    sort_lines(&mut lines);
    Ok(lines)
}

/// Creates the payslip for (employee, month).
#[instrument(skip(tx, settings, now))]
pub async fn calculate_payslip<T: PayrollTx>(
    tx: &mut T,
    settings: &PayrollSettings,
    employee_id: u64,
    month: NaiveDate,
    actor: u64,
    now: DateTime<Utc>,
) -> Result<PayslipWithLines> {
    let month = month_start(month);
    take_slot(tx, employee_id, month).await?;

    let employee = load_employee(tx, employee_id).await?;
    let contract = resolver::active_contract(tx, employee_id, month).await?;

    if let Some(existing) = tx.live_payslip(employee_id, month).await? {
        return Err(PayrollError::DuplicatePayslip {
            employee_id,
            month,
            payslip_id: existing.id,
        });
    }

    let mut payslip = Payslip {
        id: 0,
        employee_id,
        contract_id: contract.id,
        month,
        basic_salary: contract.basic_salary,
        gross: Decimal::ZERO,
        total_deductions: Decimal::ZERO,
        net: Decimal::ZERO,
        status: PayslipStatus::Calculated,
        processed_by: actor,
        processed_at: now,
        approved_by: None,
        approved_at: None,
        paid_at: None,
        reversed_by: None,
        reversed_at: None,
        reversal_reason: None,
    };
    payslip.id = tx.insert_payslip(&payslip).await?;

    let lines = fill(tx, settings, &employee, &contract, &mut payslip, now).await?;

    info!(
        payslip_id = payslip.id,
        gross = %payslip.gross,
        deductions = %payslip.total_deductions,
        net = %payslip.net,
        "Payslip calculated"
    );
    Ok(PayslipWithLines { payslip, lines })
}

/// Drops the lines and installments of a `calculated` payslip and rebuilds them.
#[instrument(skip(tx, settings, now))]
pub async fn recalculate_payslip<T: PayrollTx>(
    tx: &mut T,
    settings: &PayrollSettings,
    payslip_id: u64,
    actor: u64,
    now: DateTime<Utc>,
) -> Result<PayslipWithLines> {
    let mut payslip = tx
        .payslip(payslip_id)
        .await?
        .ok_or_else(|| PayrollError::not_found("payslip", payslip_id))?;
    if payslip.status != PayslipStatus::Calculated {
        return Err(PayrollError::forbidden("payslip", payslip_id, payslip.status, "recalculated"));
    }
    take_slot(tx, payslip.employee_id, payslip.month).await?;

    let released = allocator::release(tx, payslip_id, true).await?;
    tx.delete_lines(payslip_id).await?;

    let employee = load_employee(tx, payslip.employee_id).await?;
    let contract = resolver::active_contract(tx, payslip.employee_id, payslip.month).await?;

    payslip.contract_id = contract.id;
    payslip.basic_salary = contract.basic_salary;
    payslip.processed_by = actor;
    payslip.processed_at = now;

    let lines = fill(tx, settings, &employee, &contract, &mut payslip, now).await?;

    info!(
        payslip_id,
        released_installments = released,
        net = %payslip.net,
        "Payslip recalculated"
    );
    Ok(PayslipWithLines { payslip, lines })
}
