//! Monthly attendance reduction.
//!
//! Daily rows win over punches for the same day; days with neither are
//! absences when they are scheduled (not weekend, after hire, not in the
//! future) and not covered by approved leave.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use crate::config::PayrollSettings;
use crate::error::{PayrollError, Result};
use crate::model::attendance::{AttendanceDaily, AttendanceStatus, AttendanceSummary};
use crate::model::employee::Employee;
use crate::payroll::daily::{ShiftRules, derive_daily};
use crate::store::PayrollTx;
use crate::utils::calendar::{clip, days_between, month_end, month_start, working_days};
use crate::utils::money::{day_rate, round_cents};

pub struct SummaryInputs<'a> {
    pub employee_id: u64,
    pub month: NaiveDate,
    pub hire_date: NaiveDate,
    /// Days after this are not yet scheduled.
    pub as_of: NaiveDate,
    pub basic_salary: Decimal,
    pub rules: &'a ShiftRules,
    pub daily: &'a [AttendanceDaily],
    pub punches: &'a [NaiveDateTime],
    pub leave_days: &'a BTreeSet<NaiveDate>,
}

/// Pure monthly reduction; the result is unsaved (`id = 0`) and unapproved.
pub fn summarize(input: &SummaryInputs<'_>, settings: &PayrollSettings, now: DateTime<Utc>) -> AttendanceSummary {
    let first = month_start(input.month);
    let last = month_end(first);
    let scheduled_from = first.max(input.hire_date);
    let scheduled_to = last.min(input.as_of);

    let rows: BTreeMap<NaiveDate, &AttendanceDaily> = input
        .daily
        .iter()
        .filter(|row| row.date >= first && row.date <= last)
        .map(|row| (row.date, row))
        .collect();

    let mut punches_by_day: BTreeMap<NaiveDate, Vec<NaiveDateTime>> = BTreeMap::new();
    for punch in input.punches {
        if punch.date() >= first && punch.date() <= last {
            punches_by_day.entry(punch.date()).or_default().push(*punch);
        }
    }
    for punches in punches_by_day.values_mut() {
        punches.sort();
    }

    let mut s = AttendanceSummary {
        id: 0,
        employee_id: input.employee_id,
        month: first,
        total_working_days: working_days(first, &input.rules.weekend),
        present_days: 0,
        late_days: 0,
        absent_days: 0,
        early_leave_days: 0,
        leave_days: 0,
        total_work_hours: Decimal::ZERO,
        total_late_minutes: 0,
        total_early_leave_minutes: 0,
        total_overtime_hours: Decimal::ZERO,
        day_rate: Decimal::ZERO,
        minute_rate: Decimal::ZERO,
        absence_deduction_amount: Decimal::ZERO,
        late_deduction_amount: Decimal::ZERO,
        overtime_amount: Decimal::ZERO,
        is_calculated: true,
        is_approved: false,
        approved_by: None,
        approved_at: None,
        calculated_at: Some(now),
    };

    for date in days_between(first, last) {
        let weekend = input.rules.is_weekend(date.weekday());
        let on_leave = input.leave_days.contains(&date);

        let derived;
        let record = match rows.get(&date) {
            Some(row) => Some(*row),
            None => {
                derived = punches_by_day
                    .get(&date)
                    .and_then(|p| derive_daily(input.employee_id, date, p, input.rules));
                derived.as_ref()
            }
        };

        let Some(record) = record else {
            let scheduled = !weekend && date >= scheduled_from && date <= scheduled_to;
            if scheduled && on_leave {
                s.leave_days += 1;
            } else if scheduled {
                s.absent_days += 1;
            }
            continue;
        };

        let status = match record.status {
            AttendanceStatus::Absent if on_leave => AttendanceStatus::Leave,
            other => other,
        };

        match status {
            AttendanceStatus::Present => s.present_days += 1,
            AttendanceStatus::Late => s.late_days += 1,
            AttendanceStatus::EarlyLeave => s.early_leave_days += 1,
            AttendanceStatus::Absent => s.absent_days += 1,
            AttendanceStatus::Leave => s.leave_days += 1,
        }

        if matches!(status, AttendanceStatus::Absent | AttendanceStatus::Leave) {
            continue;
        }

        s.total_work_hours += record.work_hours;
        s.total_late_minutes += record.late_minutes;
        s.total_early_leave_minutes += record.early_leave_minutes;

        let overtime = if weekend {
            record.work_hours
        } else {
            record.work_hours - input.rules.work_hours
        };
        if overtime > Decimal::ZERO {
            s.total_overtime_hours += overtime;
        }
    }

    price(&mut s, input.basic_salary, input.rules, settings);
    s
}

/// Fills in the monetary fields from the counts.
fn price(s: &mut AttendanceSummary, basic_salary: Decimal, rules: &ShiftRules, settings: &PayrollSettings) {
    let rate = day_rate(basic_salary, settings.days_in_month_divisor);
    let shift_minutes = rules.work_hours * Decimal::from(60);

    s.day_rate = rate;
    s.minute_rate = if shift_minutes.is_zero() {
        Decimal::ZERO
    } else {
        rate / shift_minutes
    };

    s.absence_deduction_amount = round_cents(Decimal::from(s.absent_days) * rate);

    // multiply before dividing so whole-cent results stay exact
    s.late_deduction_amount = if shift_minutes.is_zero() {
        Decimal::ZERO
    } else {
        round_cents(Decimal::from(s.total_late_minutes) * rate / shift_minutes).max(Decimal::ZERO)
    };

    s.overtime_amount = if rules.work_hours.is_zero() {
        Decimal::ZERO
    } else {
        round_cents(s.total_overtime_hours * rate * settings.overtime_multiplier / rules.work_hours)
    };
}

/// Loads everything the reduction needs and computes a fresh summary.
async fn compute<T: PayrollTx>(
    tx: &mut T,
    settings: &PayrollSettings,
    employee: &Employee,
    basic_salary: Decimal,
    month: NaiveDate,
    now: DateTime<Utc>,
) -> Result<AttendanceSummary> {
    let first = month_start(month);
    let last = month_end(first);

    let shift = match employee.shift_id {
        Some(id) => tx.shift(id).await?,
        None => None,
    };
    let rules = ShiftRules::resolve(shift.as_ref(), settings);

    let daily = tx.attendance_days(employee.id, first, last).await?;
    let punches = tx.punches(employee.id, first, last).await?;
    let leaves = tx.approved_leaves(employee.id, first, last).await?;

    let leave_days: BTreeSet<NaiveDate> = leaves
        .iter()
        .filter_map(|leave| clip(leave.start_date, leave.end_date, first, last))
        .flat_map(|(from, to)| days_between(from, to))
        .collect();

    debug!(
        employee_id = employee.id,
        %month,
        daily_rows = daily.len(),
        punches = punches.len(),
        leave_days = leave_days.len(),
        "Summarizing attendance"
    );

    Ok(summarize(
        &SummaryInputs {
            employee_id: employee.id,
            month: first,
            hire_date: employee.hire_date,
            as_of: now.date_naive(),
            basic_salary,
            rules: &rules,
            daily: &daily,
            punches: &punches,
            leave_days: &leave_days,
        },
        settings,
        now,
    ))
}

/// Reuses an approved summary, otherwise recomputes and stores it.
#[instrument(skip(tx, settings, employee), fields(employee_id = employee.id))]
pub async fn materialize<T: PayrollTx>(
    tx: &mut T,
    settings: &PayrollSettings,
    employee: &Employee,
    basic_salary: Decimal,
    month: NaiveDate,
    now: DateTime<Utc>,
) -> Result<AttendanceSummary> {
    let existing = tx.attendance_summary(employee.id, month).await?;
    if let Some(existing) = existing.as_ref().filter(|s| s.is_approved) {
        debug!(summary_id = existing.id, "Reusing approved attendance summary");
        return Ok(existing.clone());
    }

    let mut summary = compute(tx, settings, employee, basic_salary, month, now).await?;
    summary.id = existing.map(|s| s.id).unwrap_or(0);
    summary.id = tx.save_attendance_summary(&summary).await?;
    Ok(summary)
}

/// Recomputes a stored summary; refused while it is approved.
pub async fn recalculate<T: PayrollTx>(
    tx: &mut T,
    settings: &PayrollSettings,
    employee: &Employee,
    basic_salary: Decimal,
    existing: &AttendanceSummary,
    now: DateTime<Utc>,
) -> Result<AttendanceSummary> {
    if existing.is_approved {
        return Err(PayrollError::forbidden(
            "attendance_summary",
            existing.id,
            "approved",
            "recalculated",
        ));
    }

    let mut summary = compute(tx, settings, employee, basic_salary, existing.month, now).await?;
    summary.id = existing.id;
    tx.save_attendance_summary(&summary).await?;
    info!(summary_id = summary.id, "Attendance summary recalculated");
    Ok(summary)
}

pub async fn approve<T: PayrollTx>(
    tx: &mut T,
    summary: &AttendanceSummary,
    actor: u64,
    now: DateTime<Utc>,
) -> Result<()> {
    if summary.is_approved {
        return Err(PayrollError::forbidden(
            "attendance_summary",
            summary.id,
            "approved",
            "approved",
        ));
    }
    tx.set_attendance_approval(summary.id, Some(actor), Some(now)).await
}

/// Clears the approval so the summary may be recomputed.
pub async fn reset_approval<T: PayrollTx>(tx: &mut T, summary: &AttendanceSummary) -> Result<()> {
    if !summary.is_approved {
        return Err(PayrollError::forbidden(
            "attendance_summary",
            summary.id,
            "unapproved",
            "reset",
        ));
    }
    tx.set_attendance_approval(summary.id, None, None).await
}
