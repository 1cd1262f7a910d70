use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

/// Earnings sort before deductions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComponentKind {
    Earning,
    Deduction,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CalculationMethod {
    Fixed,
    Percentage,
    Formula,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComponentSource {
    Contract,
    Adjustment,
    AutoIncrease,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SalaryComponent {
    pub id: u64,
    pub employee_id: u64,

    /// Unique per employee.
    #[schema(example = "HOUSING")]
    pub code: String,
    pub name: String,
    pub kind: ComponentKind,
    pub method: CalculationMethod,
    pub amount: Option<Decimal>,
    pub percentage: Option<Decimal>,
    #[schema(example = "basic * 0.14")]
    pub formula: Option<String>,
    pub is_basic: bool,
    pub is_taxable: bool,
    pub is_fixed: bool,
    pub order: i32,

    #[schema(value_type = String, format = "date", nullable = true)]
    pub effective_from: Option<NaiveDate>,

    #[schema(value_type = String, format = "date", nullable = true)]
    pub effective_to: Option<NaiveDate>,

    pub is_active: bool,
    pub source: ComponentSource,
    pub source_contract_component_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl SalaryComponent {
    pub fn is_from_contract(&self) -> bool {
        self.source == ComponentSource::Contract
    }
}
