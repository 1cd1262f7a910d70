pub mod actor;
pub mod advance;
pub mod attendance;
pub mod leave;
pub mod payroll;

use actix_web::web;
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::error::Result;
use crate::payroll::PayrollService;
use crate::store::mysql::MySqlStore;
use crate::utils::calendar::parse_month;

pub type Service = web::Data<PayrollService<MySqlStore>>;

#[derive(Deserialize, IntoParams, ToSchema)]
pub struct EmployeeMonthQuery {
    #[schema(example = 1001)]
    pub employee_id: u64,

    /// `YYYY-MM` or `YYYY-MM-DD`
    #[schema(example = "2025-03")]
    pub month: String,
}

impl EmployeeMonthQuery {
    pub fn month(&self) -> Result<NaiveDate> {
        parse_month(&self.month)
    }
}
