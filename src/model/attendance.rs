use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub id: u64,
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub work_hours: Decimal,
    pub weekend_days: Vec<Weekday>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    EarlyLeave,
    Leave,
}

/// One employee-day, built upstream from device punches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceDaily {
    pub employee_id: u64,
    pub date: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub work_hours: Decimal,
    pub late_minutes: u32,
    pub early_leave_minutes: u32,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AttendanceSummary {
    pub id: u64,
    pub employee_id: u64,

    #[schema(value_type = String, format = "date")]
    pub month: NaiveDate,

    pub total_working_days: u32,
    pub present_days: u32,
    pub late_days: u32,
    pub absent_days: u32,
    pub early_leave_days: u32,
    pub leave_days: u32,

    pub total_work_hours: Decimal,
    pub total_late_minutes: u32,
    pub total_early_leave_minutes: u32,
    pub total_overtime_hours: Decimal,

    pub day_rate: Decimal,
    pub minute_rate: Decimal,
    pub absence_deduction_amount: Decimal,
    pub late_deduction_amount: Decimal,
    pub overtime_amount: Decimal,

    pub is_calculated: bool,
    pub is_approved: bool,
    pub approved_by: Option<u64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub calculated_at: Option<DateTime<Utc>>,
}
