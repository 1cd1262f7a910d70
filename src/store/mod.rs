//! Unit-of-work seam between the payroll core and its storage.
//!
//! Every command opens one [`PayrollTx`] through [`Store::begin`], does all of
//! its reads and writes through it and then commits. Dropping a transaction
//! without committing rolls it back.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::error::Result;
use crate::model::advance::{Advance, AdvanceInstallment};
use crate::model::attendance::{AttendanceDaily, AttendanceSummary, Shift};
use crate::model::contract::Contract;
use crate::model::employee::Employee;
use crate::model::leave::{LeaveBalance, LeaveRequest, LeaveStatus, LeaveSummary};
use crate::model::payslip::{Payslip, PayslipLine, PayslipStatus, PayslipSummary};
use crate::model::salary_component::SalaryComponent;

pub mod mysql;

#[cfg(test)]
pub mod memory;

/// Narrows the employees a batch run touches.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct EmployeeFilter {
    pub employee_ids: Option<Vec<u64>>,
    pub department_id: Option<u64>,
}

impl EmployeeFilter {
    pub fn admits(&self, employee: &Employee) -> bool {
        self.employee_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&employee.id))
            && self
                .department_id
                .is_none_or(|dept| employee.department_id == Some(dept))
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
pub struct PayslipQuery {
    pub status: Option<String>,
    pub employee_id: Option<u64>,
    pub department_id: Option<u64>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl PayslipQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> u32 {
        self.per_page.unwrap_or(20).clamp(1, 100)
    }

    pub fn offset(&self) -> u32 {
        (self.page() - 1) * self.per_page()
    }

    pub fn status(&self) -> Result<Option<PayslipStatus>> {
        self.status
            .as_deref()
            .map(|raw| {
                raw.parse().map_err(|_| {
                    crate::error::PayrollError::Validation(format!("unknown payslip status `{raw}`"))
                })
            })
            .transpose()
    }
}

#[allow(async_fn_in_trait)]
pub trait Store {
    type Tx: PayrollTx;

    async fn begin(&self) -> Result<Self::Tx>;

    /// Makes sure the (employee, month) lock row exists. Called before
    /// `begin` so creating it never needs a second connection mid-transaction.
    async fn prepare_slot(&self, employee_id: u64, month: NaiveDate) -> Result<()>;
}

#[allow(async_fn_in_trait)]
pub trait PayrollTx: Sized {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;

    /// Takes the per-(employee, month) lock for the rest of the transaction.
    /// Returns `false` when another transaction holds it.
    async fn try_lock_slot(&mut self, employee_id: u64, month: NaiveDate) -> Result<bool>;

    // employees, contracts, shifts

    async fn employee(&mut self, id: u64) -> Result<Option<Employee>>;

    /// Active employees with an active contract on `month` and no live
    /// payslip for it.
    async fn payroll_candidates(
        &mut self,
        month: NaiveDate,
        filter: &EmployeeFilter,
    ) -> Result<Vec<Employee>>;

    /// Contracts with `status = active` overlapping `[from, to]`.
    async fn active_contracts(
        &mut self,
        employee_id: u64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Contract>>;

    async fn contracts_due_increase(&mut self, today: NaiveDate) -> Result<Vec<Contract>>;

    /// Reads the contract and locks it for the rest of the transaction.
    async fn contract_for_update(&mut self, id: u64) -> Result<Option<Contract>>;

    /// Moves the increase schedule from `due` to `next_increase_date`.
    /// Returns `false` when the stored date is no longer `due`.
    async fn update_contract_schedule(
        &mut self,
        contract_id: u64,
        due: NaiveDate,
        next_increase_date: NaiveDate,
        audit_note: Option<&str>,
    ) -> Result<bool>;

    async fn shift(&mut self, id: u64) -> Result<Option<Shift>>;

    // salary components

    async fn components(&mut self, employee_id: u64) -> Result<Vec<SalaryComponent>>;

    async fn insert_component(&mut self, component: &SalaryComponent) -> Result<u64>;

    // attendance

    async fn attendance_days(
        &mut self,
        employee_id: u64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<AttendanceDaily>>;

    /// Raw punches in civil local time, ascending.
    async fn punches(
        &mut self,
        employee_id: u64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDateTime>>;

    async fn attendance_summary(
        &mut self,
        employee_id: u64,
        month: NaiveDate,
    ) -> Result<Option<AttendanceSummary>>;

    async fn attendance_summary_by_id(&mut self, id: u64) -> Result<Option<AttendanceSummary>>;

    /// Upserts on (employee, month); returns the row id.
    async fn save_attendance_summary(&mut self, summary: &AttendanceSummary) -> Result<u64>;

    async fn set_attendance_approval(
        &mut self,
        id: u64,
        approved_by: Option<u64>,
        approved_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    // leave

    /// Approved requests overlapping `[from, to]`.
    async fn approved_leaves(
        &mut self,
        employee_id: u64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LeaveRequest>>;

    async fn leave_request(&mut self, id: u64) -> Result<Option<LeaveRequest>>;

    async fn set_leave_status(&mut self, id: u64, status: LeaveStatus, actor: u64) -> Result<()>;

    async fn leave_balance(
        &mut self,
        employee_id: u64,
        leave_type_id: u64,
        year: i32,
    ) -> Result<Option<LeaveBalance>>;

    async fn save_leave_balance(&mut self, balance: &LeaveBalance) -> Result<()>;

    async fn leave_summary(&mut self, employee_id: u64, month: NaiveDate) -> Result<Option<LeaveSummary>>;

    async fn save_leave_summary(&mut self, summary: &LeaveSummary) -> Result<()>;

    // advances

    async fn advances_for_employee(&mut self, employee_id: u64) -> Result<Vec<Advance>>;

    async fn advance(&mut self, id: u64) -> Result<Option<Advance>>;

    async fn insert_advance(&mut self, advance: &Advance) -> Result<u64>;

    async fn update_advance(&mut self, advance: &Advance) -> Result<()>;

    /// Sum of installments bound to non-reversed payslips.
    async fn live_installments_total(&mut self, advance_id: u64) -> Result<Decimal>;

    async fn insert_installment(&mut self, installment: &AdvanceInstallment) -> Result<u64>;

    async fn installments_for_payslip(&mut self, payslip_id: u64) -> Result<Vec<AdvanceInstallment>>;

    async fn delete_installments(&mut self, payslip_id: u64) -> Result<()>;

    // payslips

    /// The non-reversed payslip for (employee, month), if any.
    async fn live_payslip(&mut self, employee_id: u64, month: NaiveDate) -> Result<Option<Payslip>>;

    async fn payslip(&mut self, id: u64) -> Result<Option<Payslip>>;

    async fn insert_payslip(&mut self, payslip: &Payslip) -> Result<u64>;

    async fn update_payslip(&mut self, payslip: &Payslip) -> Result<()>;

    async fn insert_line(&mut self, line: &PayslipLine) -> Result<u64>;

    /// Lines sorted by (kind, order, id).
    async fn lines(&mut self, payslip_id: u64) -> Result<Vec<PayslipLine>>;

    async fn delete_lines(&mut self, payslip_id: u64) -> Result<()>;

    async fn list_payslips(
        &mut self,
        month: NaiveDate,
        query: &PayslipQuery,
    ) -> Result<(Vec<PayslipSummary>, i64)>;
}
