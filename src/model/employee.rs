use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmployeeStatus {
    Active,
    OnLeave,
    Suspended,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "employee_code": "EMP-001",
        "first_name": "Omar",
        "last_name": "Haddad",
        "department_id": 10,
        "hire_date": "2024-01-01",
        "status": "active",
        "shift_id": 2
    })
)]
pub struct Employee {
    #[schema(example = 1)]
    pub id: u64,

    #[schema(example = "EMP-001")]
    pub employee_code: String,

    pub first_name: String,

    pub last_name: String,

    pub department_id: Option<u64>,

    #[schema(example = "2024-01-01", value_type = String, format = "date")]
    pub hire_date: NaiveDate,

    pub status: EmployeeStatus,

    #[schema(nullable = true)]
    pub shift_id: Option<u64>,
}

impl Employee {
    pub fn is_payroll_eligible(&self) -> bool {
        self.status == EmployeeStatus::Active
    }
}
