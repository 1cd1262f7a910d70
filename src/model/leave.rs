use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaveRequest {
    pub id: u64,
    pub employee_id: u64,
    pub leave_type_id: u64,

    #[schema(example = "annual")]
    pub leave_type_code: String,

    #[schema(value_type = String, format = "date")]
    pub start_date: NaiveDate,

    #[schema(value_type = String, format = "date")]
    pub end_date: NaiveDate,

    pub days_count: u32,
    pub status: LeaveStatus,

    /// Per-request override of the leave type's `paid` flag.
    pub paid: Option<bool>,

    /// The leave type's own `paid` flag.
    pub type_paid: bool,
}

impl LeaveRequest {
    pub fn is_paid(&self) -> bool {
        self.paid.unwrap_or(self.type_paid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaveBalance {
    pub employee_id: u64,
    pub leave_type_id: u64,
    pub year: i32,
    pub accrued: Decimal,
    pub used: Decimal,
    pub remaining: Decimal,
}

impl LeaveBalance {
    /// Deducts `days`, keeping `remaining = accrued - used >= 0`.
    pub fn consume(&mut self, days: Decimal) -> Result<(), String> {
        let used = self.used + days;
        let remaining = self.accrued - used;
        if remaining < Decimal::ZERO {
            return Err(format!(
                "insufficient leave balance: {} remaining, {} requested",
                self.remaining, days
            ));
        }
        self.used = used;
        self.remaining = remaining;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaveTypeDays {
    pub paid_days: u32,
    pub unpaid_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct LeaveSummary {
    pub employee_id: u64,

    #[schema(value_type = String, format = "date")]
    pub month: NaiveDate,

    pub paid_days: u32,
    pub unpaid_days: u32,
    pub deduction_amount: Decimal,

    /// Keyed by leave type code.
    pub details: BTreeMap<String, LeaveTypeDays>,

    pub calculated_at: DateTime<Utc>,
}
