use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ContractStatus {
    Draft,
    Active,
    Ended,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncreaseFrequency {
    Annual,
    SemiAnnual,
    Quarterly,
    Monthly,
}

impl IncreaseFrequency {
    /// Calendar months between two increases.
    pub fn months(self) -> u32 {
        match self {
            IncreaseFrequency::Annual => 12,
            IncreaseFrequency::SemiAnnual => 6,
            IncreaseFrequency::Quarterly => 3,
            IncreaseFrequency::Monthly => 1,
        }
    }

    /// Number of increases per year; the annual percent is split evenly.
    pub fn periods_per_year(self) -> u32 {
        12 / self.months()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Contract {
    pub id: u64,
    pub employee_id: u64,

    #[schema(value_type = String, format = "date")]
    pub start_date: NaiveDate,

    #[schema(value_type = String, format = "date", nullable = true)]
    pub end_date: Option<NaiveDate>,

    /// Frozen once the contract is active; raises become separate components.
    pub basic_salary: Decimal,

    pub status: ContractStatus,

    pub annual_increase_percent: Option<Decimal>,

    pub increase_frequency: Option<IncreaseFrequency>,

    #[schema(value_type = String, format = "date", nullable = true)]
    pub next_increase_date: Option<NaiveDate>,

    /// Free-form audit trail appended to by scheduled jobs.
    pub audit_note: Option<String>,
}

impl Contract {
    /// Active and overlapping `[from, to]`.
    pub fn overlaps(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.status == ContractStatus::Active
            && self.start_date <= to
            && self.end_date.is_none_or(|end| end >= from)
    }
}
