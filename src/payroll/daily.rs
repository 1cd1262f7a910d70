//! Turns one day's raw punches into an [`AttendanceDaily`] row.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Weekday};
use rust_decimal::Decimal;

use crate::config::PayrollSettings;
use crate::model::attendance::{AttendanceDaily, AttendanceStatus, Shift};

/// A gap wider than this between adjacent punches ends the working block.
const SPLIT_GAP_MINUTES: i64 = 120;

/// The shift an employee is measured against, with grace periods applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ShiftRules {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub work_hours: Decimal,
    pub weekend: Vec<Weekday>,
    pub late_grace_minutes: u32,
    pub early_leave_grace_minutes: u32,
}

impl ShiftRules {
    pub fn resolve(shift: Option<&Shift>, settings: &PayrollSettings) -> Self {
        match shift {
            Some(shift) => Self {
                start: shift.start_time,
                end: shift.end_time,
                work_hours: if shift.work_hours > Decimal::ZERO {
                    shift.work_hours
                } else {
                    settings.default_shift_hours
                },
                weekend: if shift.weekend_days.is_empty() {
                    settings.default_weekend_days.clone()
                } else {
                    shift.weekend_days.clone()
                },
                late_grace_minutes: settings.late_grace_minutes,
                early_leave_grace_minutes: settings.early_leave_grace_minutes,
            },
            None => Self {
                start: settings.default_shift_start,
                end: settings.default_shift_end,
                work_hours: settings.default_shift_hours,
                weekend: settings.default_weekend_days.clone(),
                late_grace_minutes: settings.late_grace_minutes,
                early_leave_grace_minutes: settings.early_leave_grace_minutes,
            },
        }
    }

    pub fn is_weekend(&self, weekday: Weekday) -> bool {
        self.weekend.contains(&weekday)
    }
}

/// Picks (check-in, check-out) from a sorted list of punches.
///
/// With three or more punches the widest gap over two hours closes the
/// working block at its earlier side; otherwise the last punch is the
/// check-out.
pub fn pair_punches(punches: &[NaiveDateTime]) -> Option<(NaiveDateTime, Option<NaiveDateTime>)> {
    match punches {
        [] => None,
        [only] => Some((*only, None)),
        [first, second] => Some((*first, Some(*second))),
        [first, .., last] => {
            let widest = punches
                .windows(2)
                .map(|pair| (pair[0], pair[1] - pair[0]))
                .filter(|(_, gap)| gap.num_minutes() > SPLIT_GAP_MINUTES)
                .max_by_key(|(_, gap)| *gap);
            let check_out = widest.map(|(before_gap, _)| before_gap).unwrap_or(*last);
            Some((*first, Some(check_out)))
        }
    }
}

fn minutes_between(from: NaiveTime, to: NaiveTime) -> i64 {
    (to - from).num_minutes()
}

fn hours(delta: TimeDelta) -> Decimal {
    (Decimal::from(delta.num_minutes().max(0)) / Decimal::from(60)).round_dp(2)
}

/// Builds the day record for `date` from its punches (sorted ascending).
pub fn derive_daily(
    employee_id: u64,
    date: NaiveDate,
    punches: &[NaiveDateTime],
    rules: &ShiftRules,
) -> Option<AttendanceDaily> {
    let (check_in, check_out) = pair_punches(punches)?;

    let Some(check_out) = check_out else {
        return Some(AttendanceDaily {
            employee_id,
            date,
            check_in: Some(check_in.time()),
            check_out: None,
            work_hours: Decimal::ZERO,
            late_minutes: 0,
            early_leave_minutes: 0,
            status: AttendanceStatus::Present,
        });
    };

    let late = minutes_between(rules.start, check_in.time());
    let late_minutes = if late > 0 && late >= i64::from(rules.late_grace_minutes) {
        late as u32
    } else {
        0
    };

    let early = minutes_between(check_out.time(), rules.end);
    let early_leave_minutes = if early > 0 && early >= i64::from(rules.early_leave_grace_minutes) {
        early as u32
    } else {
        0
    };

    let status = if late_minutes > 0 {
        AttendanceStatus::Late
    } else if early_leave_minutes > 0 {
        AttendanceStatus::EarlyLeave
    } else {
        AttendanceStatus::Present
    };

    Some(AttendanceDaily {
        employee_id,
        date,
        check_in: Some(check_in.time()),
        check_out: Some(check_out.time()),
        work_hours: hours(check_out - check_in),
        late_minutes,
        early_leave_minutes,
        status,
    })
}
