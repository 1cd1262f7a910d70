//! In-memory [`Store`] for tests. A transaction works on a private copy of
//! the state and publishes it on commit; slot locks are shared so two open
//! transactions exclude each other the way row locks do. A writing commit
//! fails if another commit landed after `begin`, like a serialization
//! failure.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::rt::time::sleep;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::error::{PayrollError, Result};
use crate::model::advance::{Advance, AdvanceInstallment};
use crate::model::attendance::{AttendanceDaily, AttendanceStatus, AttendanceSummary, Shift};
use crate::model::contract::{Contract, ContractStatus};
use crate::model::employee::{Employee, EmployeeStatus};
use crate::model::leave::{LeaveBalance, LeaveRequest, LeaveStatus, LeaveSummary};
use crate::model::payslip::{Payslip, PayslipLine, PayslipStatus, PayslipSummary};
use crate::model::salary_component::SalaryComponent;
use crate::store::{EmployeeFilter, PayrollTx, PayslipQuery, Store};
use crate::utils::calendar::{days_between, month_end, month_start};

type Slot = (u64, NaiveDate);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemState {
    pub employees: BTreeMap<u64, Employee>,
    pub contracts: BTreeMap<u64, Contract>,
    pub shifts: BTreeMap<u64, Shift>,
    pub components: BTreeMap<u64, SalaryComponent>,
    pub daily: Vec<AttendanceDaily>,
    pub punches: Vec<(u64, NaiveDateTime)>,
    pub attendance_summaries: BTreeMap<u64, AttendanceSummary>,
    pub leave_requests: BTreeMap<u64, LeaveRequest>,
    pub leave_balances: Vec<LeaveBalance>,
    pub leave_summaries: BTreeMap<Slot, LeaveSummary>,
    pub advances: BTreeMap<u64, Advance>,
    pub installments: BTreeMap<u64, AdvanceInstallment>,
    pub payslips: BTreeMap<u64, Payslip>,
    pub lines: BTreeMap<u64, PayslipLine>,
    next_id: u64,
    version: u64,
}

impl MemState {
    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// An active employee hired in 2020 with an open-ended active contract.
    pub fn employee_with_contract(&mut self, employee_id: u64, basic_salary: Decimal) -> u64 {
        self.employees.insert(
            employee_id,
            Employee {
                id: employee_id,
                employee_code: format!("EMP-{employee_id:04}"),
                first_name: "Test".to_string(),
                last_name: format!("Employee {employee_id}"),
                department_id: Some(1),
                hire_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
                status: EmployeeStatus::Active,
                shift_id: None,
            },
        );
        let contract_id = self.next_id();
        self.contracts.insert(
            contract_id,
            Contract {
                id: contract_id,
                employee_id,
                start_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
                end_date: None,
                basic_salary,
                status: ContractStatus::Active,
                annual_increase_percent: None,
                increase_frequency: None,
                next_increase_date: None,
                audit_note: None,
            },
        );
        contract_id
    }

    pub fn add_component(&mut self, mut component: SalaryComponent) -> u64 {
        component.id = self.next_id();
        let id = component.id;
        self.components.insert(id, component);
        id
    }

    /// A clean 08:00-16:00 day on every working day of the month.
    pub fn full_attendance(&mut self, employee_id: u64, month: NaiveDate, weekend: &[chrono::Weekday]) {
        let first = month_start(month);
        for date in days_between(first, month_end(first)) {
            if weekend.contains(&date.weekday()) {
                continue;
            }
            self.daily.push(AttendanceDaily {
                employee_id,
                date,
                check_in: NaiveTime::from_hms_opt(8, 0, 0),
                check_out: NaiveTime::from_hms_opt(16, 0, 0),
                work_hours: Decimal::from(8),
                late_minutes: 0,
                early_leave_minutes: 0,
                status: AttendanceStatus::Present,
            });
        }
    }

    pub fn add_advance(&mut self, mut advance: Advance) -> u64 {
        advance.id = self.next_id();
        let id = advance.id;
        self.advances.insert(id, advance);
        id
    }

    pub fn add_leave_request(&mut self, mut request: LeaveRequest) -> u64 {
        request.id = self.next_id();
        let id = request.id;
        self.leave_requests.insert(id, request);
        id
    }

    fn is_live(&self, payslip_id: u64) -> bool {
        self.payslips
            .get(&payslip_id)
            .is_some_and(|p| p.status != PayslipStatus::Reversed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemState>>,
    locks: Arc<Mutex<HashSet<Slot>>>,
    line_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new(state: MemState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            locks: Arc::default(),
            line_delay: None,
        }
    }

    /// Every payslip line insert sleeps for `delay` first.
    pub fn with_line_delay(mut self, delay: Duration) -> Self {
        self.line_delay = Some(delay);
        self
    }

    pub fn snapshot(&self) -> MemState {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut MemState)) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut state);
        state.version += 1;
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let state = self.snapshot();
        Ok(MemoryTx {
            base: state.clone(),
            state,
            shared: self.state.clone(),
            locks: self.locks.clone(),
            held: Vec::new(),
            line_delay: self.line_delay,
        })
    }

    async fn prepare_slot(&self, _employee_id: u64, _month: NaiveDate) -> Result<()> {
        Ok(())
    }
}

pub struct MemoryTx {
    base: MemState,
    state: MemState,
    shared: Arc<Mutex<MemState>>,
    locks: Arc<Mutex<HashSet<Slot>>>,
    held: Vec<Slot>,
    line_delay: Option<Duration>,
}

impl MemoryTx {
    fn release(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        for slot in self.held.drain(..) {
            locks.remove(&slot);
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.release();
    }
}

fn missing(entity: &'static str, id: u64) -> PayrollError {
    PayrollError::not_found(entity, id)
}

impl PayrollTx for MemoryTx {
    async fn commit(mut self) -> Result<()> {
        if self.state != self.base {
            let mut shared = self.shared.lock().unwrap_or_else(|p| p.into_inner());
            if shared.version != self.base.version {
                drop(shared);
                self.release();
                return Err(PayrollError::Database(sqlx::Error::Protocol(
                    "serialization failure: state changed since begin".to_string(),
                )));
            }
            let mut next = std::mem::take(&mut self.state);
            next.version += 1;
            *shared = next;
        }
        self.release();
        Ok(())
    }

    async fn rollback(mut self) -> Result<()> {
        self.release();
        Ok(())
    }

    async fn try_lock_slot(&mut self, employee_id: u64, month: NaiveDate) -> Result<bool> {
        let slot = (employee_id, month_start(month));
        if self.held.contains(&slot) {
            return Ok(true);
        }
        let acquired = self
            .locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(slot);
        if acquired {
            self.held.push(slot);
        }
        Ok(acquired)
    }

    async fn employee(&mut self, id: u64) -> Result<Option<Employee>> {
        Ok(self.state.employees.get(&id).cloned())
    }

    async fn payroll_candidates(&mut self, month: NaiveDate, filter: &EmployeeFilter) -> Result<Vec<Employee>> {
        let first = month_start(month);
        let last = month_end(first);
        let s = &self.state;
        Ok(s.employees
            .values()
            .filter(|e| e.is_payroll_eligible() && filter.admits(e))
            .filter(|e| s.contracts.values().any(|c| c.employee_id == e.id && c.overlaps(first, last)))
            .filter(|e| {
                !s.payslips
                    .values()
                    .any(|p| p.employee_id == e.id && p.month == first && p.status != PayslipStatus::Reversed)
            })
            .cloned()
            .collect())
    }

    async fn active_contracts(&mut self, employee_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<Contract>> {
        Ok(self
            .state
            .contracts
            .values()
            .filter(|c| c.employee_id == employee_id && c.overlaps(from, to))
            .cloned()
            .collect())
    }

    async fn contracts_due_increase(&mut self, today: NaiveDate) -> Result<Vec<Contract>> {
        Ok(self
            .state
            .contracts
            .values()
            .filter(|c| c.status == ContractStatus::Active)
            .filter(|c| c.next_increase_date.is_some_and(|d| d <= today))
            .filter(|c| c.annual_increase_percent.is_some_and(|p| p > Decimal::ZERO))
            .cloned()
            .collect())
    }

    async fn contract_for_update(&mut self, id: u64) -> Result<Option<Contract>> {
        Ok(self.state.contracts.get(&id).cloned())
    }

    async fn update_contract_schedule(
        &mut self,
        contract_id: u64,
        due: NaiveDate,
        next_increase_date: NaiveDate,
        audit_note: Option<&str>,
    ) -> Result<bool> {
        let contract = self
            .state
            .contracts
            .get_mut(&contract_id)
            .ok_or_else(|| missing("contract", contract_id))?;
        if contract.next_increase_date != Some(due) {
            return Ok(false);
        }
        contract.next_increase_date = Some(next_increase_date);
        if let Some(note) = audit_note {
            contract.audit_note = Some(note.to_string());
        }
        Ok(true)
    }

    async fn shift(&mut self, id: u64) -> Result<Option<Shift>> {
        Ok(self.state.shifts.get(&id).cloned())
    }

    async fn components(&mut self, employee_id: u64) -> Result<Vec<SalaryComponent>> {
        Ok(self
            .state
            .components
            .values()
            .filter(|c| c.employee_id == employee_id)
            .cloned()
            .collect())
    }

    async fn insert_component(&mut self, component: &SalaryComponent) -> Result<u64> {
        Ok(self.state.add_component(component.clone()))
    }

    async fn attendance_days(&mut self, employee_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<AttendanceDaily>> {
        Ok(self
            .state
            .daily
            .iter()
            .filter(|d| d.employee_id == employee_id && d.date >= from && d.date <= to)
            .cloned()
            .collect())
    }

    async fn punches(&mut self, employee_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDateTime>> {
        let mut punches: Vec<NaiveDateTime> = self
            .state
            .punches
            .iter()
            .filter(|(e, at)| *e == employee_id && at.date() >= from && at.date() <= to)
            .map(|(_, at)| *at)
            .collect();
        punches.sort();
        Ok(punches)
    }

    async fn attendance_summary(&mut self, employee_id: u64, month: NaiveDate) -> Result<Option<AttendanceSummary>> {
        let month = month_start(month);
        Ok(self
            .state
            .attendance_summaries
            .values()
            .find(|s| s.employee_id == employee_id && s.month == month)
            .cloned())
    }

    async fn attendance_summary_by_id(&mut self, id: u64) -> Result<Option<AttendanceSummary>> {
        Ok(self.state.attendance_summaries.get(&id).cloned())
    }

    async fn save_attendance_summary(&mut self, summary: &AttendanceSummary) -> Result<u64> {
        let existing = self
            .state
            .attendance_summaries
            .values()
            .find(|s| s.employee_id == summary.employee_id && s.month == summary.month)
            .map(|s| s.id);
        let id = match existing {
            Some(id) => id,
            None => self.state.next_id(),
        };
        let mut stored = summary.clone();
        stored.id = id;
        self.state.attendance_summaries.insert(id, stored);
        Ok(id)
    }

    async fn set_attendance_approval(
        &mut self,
        id: u64,
        approved_by: Option<u64>,
        approved_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let summary = self
            .state
            .attendance_summaries
            .get_mut(&id)
            .ok_or_else(|| missing("attendance_summary", id))?;
        summary.is_approved = approved_by.is_some();
        summary.approved_by = approved_by;
        summary.approved_at = approved_at;
        Ok(())
    }

    async fn approved_leaves(&mut self, employee_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<LeaveRequest>> {
        Ok(self
            .state
            .leave_requests
            .values()
            .filter(|l| l.employee_id == employee_id && l.status == LeaveStatus::Approved)
            .filter(|l| l.start_date <= to && l.end_date >= from)
            .cloned()
            .collect())
    }

    async fn leave_request(&mut self, id: u64) -> Result<Option<LeaveRequest>> {
        Ok(self.state.leave_requests.get(&id).cloned())
    }

    async fn set_leave_status(&mut self, id: u64, status: LeaveStatus, _actor: u64) -> Result<()> {
        let request = self
            .state
            .leave_requests
            .get_mut(&id)
            .ok_or_else(|| missing("leave_request", id))?;
        request.status = status;
        Ok(())
    }

    async fn leave_balance(&mut self, employee_id: u64, leave_type_id: u64, year: i32) -> Result<Option<LeaveBalance>> {
        Ok(self
            .state
            .leave_balances
            .iter()
            .find(|b| b.employee_id == employee_id && b.leave_type_id == leave_type_id && b.year == year)
            .cloned())
    }

    async fn save_leave_balance(&mut self, balance: &LeaveBalance) -> Result<()> {
        self.state.leave_balances.retain(|b| {
            !(b.employee_id == balance.employee_id && b.leave_type_id == balance.leave_type_id && b.year == balance.year)
        });
        self.state.leave_balances.push(balance.clone());
        Ok(())
    }

    async fn leave_summary(&mut self, employee_id: u64, month: NaiveDate) -> Result<Option<LeaveSummary>> {
        Ok(self.state.leave_summaries.get(&(employee_id, month_start(month))).cloned())
    }

    async fn save_leave_summary(&mut self, summary: &LeaveSummary) -> Result<()> {
        self.state
            .leave_summaries
            .insert((summary.employee_id, summary.month), summary.clone());
        Ok(())
    }

    async fn advances_for_employee(&mut self, employee_id: u64) -> Result<Vec<Advance>> {
        Ok(self
            .state
            .advances
            .values()
            .filter(|a| a.employee_id == employee_id)
            .cloned()
            .collect())
    }

    async fn advance(&mut self, id: u64) -> Result<Option<Advance>> {
        Ok(self.state.advances.get(&id).cloned())
    }

    async fn insert_advance(&mut self, advance: &Advance) -> Result<u64> {
        Ok(self.state.add_advance(advance.clone()))
    }

    async fn update_advance(&mut self, advance: &Advance) -> Result<()> {
        let stored = self
            .state
            .advances
            .get_mut(&advance.id)
            .ok_or_else(|| missing("advance", advance.id))?;
        *stored = advance.clone();
        Ok(())
    }

    async fn live_installments_total(&mut self, advance_id: u64) -> Result<Decimal> {
        Ok(self
            .state
            .installments
            .values()
            .filter(|i| i.advance_id == advance_id && self.state.is_live(i.payslip_id))
            .map(|i| i.amount)
            .sum())
    }

    async fn insert_installment(&mut self, installment: &AdvanceInstallment) -> Result<u64> {
        let id = self.state.next_id();
        let mut stored = installment.clone();
        stored.id = id;
        self.state.installments.insert(id, stored);
        Ok(id)
    }

    async fn installments_for_payslip(&mut self, payslip_id: u64) -> Result<Vec<AdvanceInstallment>> {
        Ok(self
            .state
            .installments
            .values()
            .filter(|i| i.payslip_id == payslip_id)
            .cloned()
            .collect())
    }

    async fn delete_installments(&mut self, payslip_id: u64) -> Result<()> {
        self.state.installments.retain(|_, i| i.payslip_id != payslip_id);
        Ok(())
    }

    async fn live_payslip(&mut self, employee_id: u64, month: NaiveDate) -> Result<Option<Payslip>> {
        let month = month_start(month);
        Ok(self
            .state
            .payslips
            .values()
            .find(|p| p.employee_id == employee_id && p.month == month && p.status != PayslipStatus::Reversed)
            .cloned())
    }

    async fn payslip(&mut self, id: u64) -> Result<Option<Payslip>> {
        Ok(self.state.payslips.get(&id).cloned())
    }

    async fn insert_payslip(&mut self, payslip: &Payslip) -> Result<u64> {
        let id = self.state.next_id();
        let mut stored = payslip.clone();
        stored.id = id;
        self.state.payslips.insert(id, stored);
        Ok(id)
    }

    async fn update_payslip(&mut self, payslip: &Payslip) -> Result<()> {
        let stored = self
            .state
            .payslips
            .get_mut(&payslip.id)
            .ok_or_else(|| missing("payslip", payslip.id))?;
        *stored = payslip.clone();
        Ok(())
    }

    async fn insert_line(&mut self, line: &PayslipLine) -> Result<u64> {
        if let Some(delay) = self.line_delay {
            sleep(delay).await;
        }
        let id = self.state.next_id();
        let mut stored = line.clone();
        stored.id = id;
        self.state.lines.insert(id, stored);
        Ok(id)
    }

    async fn lines(&mut self, payslip_id: u64) -> Result<Vec<PayslipLine>> {
        let mut lines: Vec<PayslipLine> = self
            .state
            .lines
            .values()
            .filter(|l| l.payslip_id == payslip_id)
            .cloned()
            .collect();
        lines.sort_by_key(|l| (l.kind, l.order, l.id));
        Ok(lines)
    }

    async fn delete_lines(&mut self, payslip_id: u64) -> Result<()> {
        self.state.lines.retain(|_, l| l.payslip_id != payslip_id);
        Ok(())
    }

    async fn list_payslips(&mut self, month: NaiveDate, query: &PayslipQuery) -> Result<(Vec<PayslipSummary>, i64)> {
        let month = month_start(month);
        let status = query.status()?;
        let s = &self.state;
        let matching: Vec<PayslipSummary> = s
            .payslips
            .values()
            .filter(|p| p.month == month)
            .filter(|p| status.is_none_or(|st| p.status == st))
            .filter(|p| query.employee_id.is_none_or(|id| p.employee_id == id))
            .filter(|p| {
                query.department_id.is_none_or(|dept| {
                    s.employees
                        .get(&p.employee_id)
                        .is_some_and(|e| e.department_id == Some(dept))
                })
            })
            .map(|p| PayslipSummary {
                id: p.id,
                employee_id: p.employee_id,
                employee_code: s
                    .employees
                    .get(&p.employee_id)
                    .map(|e| e.employee_code.clone())
                    .unwrap_or_default(),
                month: p.month,
                gross: p.gross,
                total_deductions: p.total_deductions,
                net: p.net,
                status: p.status,
            })
            .collect();
        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page() as usize)
            .collect();
        Ok((items, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn interleaved_writers_do_not_lose_a_commit() {
        let mut state = MemState::default();
        let contract_id = state.employee_with_contract(1, dec!(3000));
        let due = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        state.contracts.values_mut().for_each(|c| c.next_increase_date = Some(due));
        let store = MemoryStore::new(state);

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let next = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(first.update_contract_schedule(contract_id, due, next, None).await.unwrap());
        assert!(second.update_contract_schedule(contract_id, due, next, Some("late")).await.unwrap());

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(PayrollError::Database(_))));

        let contract = &store.snapshot().contracts[&contract_id];
        assert_eq!(contract.next_increase_date, Some(next));
        assert_eq!(contract.audit_note, None);
    }

    #[tokio::test]
    async fn read_only_commit_after_a_write_keeps_the_write() {
        let mut state = MemState::default();
        let contract_id = state.employee_with_contract(1, dec!(3000));
        let store = MemoryStore::new(state);

        let mut reader = store.begin().await.unwrap();
        let mut writer = store.begin().await.unwrap();
        let due = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        writer.state.contracts.values_mut().for_each(|c| c.next_increase_date = Some(due));
        writer.commit().await.unwrap();

        assert!(reader.contract_for_update(contract_id).await.unwrap().is_some());
        reader.commit().await.unwrap();
        assert_eq!(store.snapshot().contracts[&contract_id].next_increase_date, Some(due));
    }

    #[tokio::test]
    async fn guarded_schedule_update_refuses_a_moved_date() {
        let mut state = MemState::default();
        let contract_id = state.employee_with_contract(1, dec!(3000));
        let store = MemoryStore::new(state);

        let mut tx = store.begin().await.unwrap();
        let stale = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let next = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(!tx.update_contract_schedule(contract_id, stale, next, None).await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.snapshot().contracts[&contract_id].next_increase_date, None);
    }
}
