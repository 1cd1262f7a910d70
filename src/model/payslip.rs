use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::model::salary_component::ComponentKind;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayslipStatus {
    Calculated,
    Approved,
    Paid,
    Reversed,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LineSource {
    Contract,
    Attendance,
    Leave,
    Advance,
    Overtime,
    Adjustment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Payslip {
    pub id: u64,
    pub employee_id: u64,
    pub contract_id: u64,

    #[schema(value_type = String, format = "date")]
    pub month: NaiveDate,

    /// Snapshot of the contract's basic salary at calculation time.
    pub basic_salary: Decimal,
    pub gross: Decimal,
    pub total_deductions: Decimal,
    pub net: Decimal,
    pub status: PayslipStatus,
    pub processed_by: u64,
    pub processed_at: DateTime<Utc>,
    pub approved_by: Option<u64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<u64>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversal_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PayslipLine {
    pub id: u64,
    pub payslip_id: u64,

    #[schema(example = "BASIC_SALARY")]
    pub code: String,
    pub name: String,
    pub kind: ComponentKind,
    pub source: LineSource,

    /// Informational; `amount` is authoritative.
    pub quantity: Decimal,
    pub rate: Decimal,
    pub amount: Decimal,

    pub order: i32,
    pub component_id: Option<u64>,
    pub advance_installment_id: Option<u64>,

    #[schema(value_type = String, format = "date", nullable = true)]
    pub leave_summary_month: Option<NaiveDate>,

    #[schema(value_type = Object)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayslipWithLines {
    #[serde(flatten)]
    pub payslip: Payslip,
    pub lines: Vec<PayslipLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PayslipSummary {
    pub id: u64,
    pub employee_id: u64,
    pub employee_code: String,

    #[schema(value_type = String, format = "date")]
    pub month: NaiveDate,

    pub gross: Decimal,
    pub total_deductions: Decimal,
    pub net: Decimal,
    pub status: PayslipStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayslipPage {
    pub items: Vec<PayslipSummary>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
}
