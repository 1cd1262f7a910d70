use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::PayrollSettings;
use crate::error::Result;
use crate::model::leave::{LeaveRequest, LeaveStatus, LeaveSummary, LeaveTypeDays};
use crate::store::PayrollTx;
use crate::utils::calendar::{clip, days_between, month_end, month_start};
use crate::utils::money::{day_rate, round_cents};

/// Clips approved leave to the month and splits the days into paid/unpaid.
/// A day claimed by two overlapping requests counts once, for the earlier one.
pub fn summarize(
    employee_id: u64,
    month: NaiveDate,
    basic_salary: Decimal,
    leaves: &[LeaveRequest],
    settings: &PayrollSettings,
    now: DateTime<Utc>,
) -> LeaveSummary {
    let first = month_start(month);
    let last = month_end(first);

    let mut ordered: Vec<&LeaveRequest> = leaves
        .iter()
        .filter(|l| l.status == LeaveStatus::Approved && l.employee_id == employee_id)
        .collect();
    ordered.sort_by_key(|l| (l.start_date, l.id));

    let mut claimed: BTreeMap<NaiveDate, (&str, bool)> = BTreeMap::new();
    for leave in ordered {
        let Some((from, to)) = clip(leave.start_date, leave.end_date, first, last) else {
            continue;
        };
        for day in days_between(from, to) {
            claimed
                .entry(day)
                .or_insert((leave.leave_type_code.as_str(), leave.is_paid()));
        }
    }

    let mut details: BTreeMap<String, LeaveTypeDays> = BTreeMap::new();
    let (mut paid_days, mut unpaid_days) = (0u32, 0u32);
    for (code, paid) in claimed.values() {
        let entry = details.entry((*code).to_string()).or_default();
        if *paid {
            entry.paid_days += 1;
            paid_days += 1;
        } else {
            entry.unpaid_days += 1;
            unpaid_days += 1;
        }
    }

    let rate = day_rate(basic_salary, settings.days_in_month_divisor);

    LeaveSummary {
        employee_id,
        month: first,
        paid_days,
        unpaid_days,
        deduction_amount: round_cents(Decimal::from(unpaid_days) * rate),
        details,
        calculated_at: now,
    }
}

/// Recomputes and stores the summary for (employee, month).
pub async fn materialize<T: PayrollTx>(
    tx: &mut T,
    settings: &PayrollSettings,
    employee_id: u64,
    basic_salary: Decimal,
    month: NaiveDate,
    now: DateTime<Utc>,
) -> Result<LeaveSummary> {
    let first = month_start(month);
    let leaves = tx.approved_leaves(employee_id, first, month_end(first)).await?;
    let summary = summarize(employee_id, first, basic_salary, &leaves, settings, now);

    debug!(
        employee_id,
        %first,
        paid_days = summary.paid_days,
        unpaid_days = summary.unpaid_days,
        "Leave summary computed"
    );

    tx.save_leave_summary(&summary).await?;
    Ok(summary)
}
