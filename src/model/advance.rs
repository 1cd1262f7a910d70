use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdvanceStatus {
    Pending,
    Approved,
    InProgress,
    Completed,
    Cancelled,
}

impl AdvanceStatus {
    /// Statuses that still owe money.
    pub fn is_open(self) -> bool {
        matches!(
            self,
            AdvanceStatus::Pending | AdvanceStatus::Approved | AdvanceStatus::InProgress
        )
    }

    pub fn is_deductible(self) -> bool {
        matches!(self, AdvanceStatus::Approved | AdvanceStatus::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Advance {
    pub id: u64,
    pub employee_id: u64,
    pub principal: Decimal,
    pub installments_count: u32,
    pub remaining_amount: Decimal,

    #[schema(value_type = String, format = "date")]
    pub deduction_start_month: NaiveDate,

    pub status: AdvanceStatus,
    pub paid_installments: u32,
    pub created_by: Option<u64>,
    pub approved_by: Option<u64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AdvanceInstallment {
    pub id: u64,
    pub advance_id: u64,
    pub payslip_id: u64,

    #[schema(value_type = String, format = "date")]
    pub month: NaiveDate,

    pub amount: Decimal,
}
