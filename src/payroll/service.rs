//! Command and query surface of the payroll engine. Each method runs in its
//! own unit of work.

use std::sync::atomic::AtomicBool;

use actix_web::rt::time::timeout;
use chrono::{NaiveDate, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::PayrollSettings;
use crate::error::{PayrollError, Result};
use crate::model::advance::Advance;
use crate::model::attendance::AttendanceSummary;
use crate::model::leave::{LeaveRequest, LeaveSummary};
use crate::model::payslip::{Payslip, PayslipPage, PayslipWithLines};
use crate::payroll::allocator::{self, NewAdvance};
use crate::payroll::annual_increase::{self, IncreaseFailure, IncreaseReport};
use crate::payroll::batch::{self, BatchRegistry, BatchReport};
use crate::payroll::resolver::{self, ResolvedComponents};
use crate::payroll::{approval, assembler, attendance_summary, leave_requests, leave_summary};
use crate::store::{EmployeeFilter, PayrollTx, PayslipQuery, Store};
use crate::utils::calendar::month_start;

/// Commits on success, rolls back on error.
async fn finish<T: PayrollTx, R>(tx: T, result: Result<R>) -> Result<R> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

pub struct PayrollService<S: Store> {
    store: S,
    settings: PayrollSettings,
    batches: BatchRegistry,
}

impl<S: Store> PayrollService<S> {
    pub fn new(store: S, settings: PayrollSettings) -> Self {
        Self {
            store,
            settings,
            batches: BatchRegistry::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &PayrollSettings {
        &self.settings
    }

    pub fn batches(&self) -> &BatchRegistry {
        &self.batches
    }

    // payslips

    async fn calculate_once(&self, employee_id: u64, month: NaiveDate, actor: u64) -> Result<PayslipWithLines> {
        self.store.prepare_slot(employee_id, month).await?;
        let mut tx = self.store.begin().await?;
        let result =
            assembler::calculate_payslip(&mut tx, &self.settings, employee_id, month, actor, Utc::now()).await;
        finish(tx, result).await
    }

    /// `CalculatePayslip`. Runs under the assembly timeout; on expiry the
    /// transaction is dropped and nothing is written.
    #[instrument(skip(self))]
    pub async fn calculate_payslip(&self, employee_id: u64, month: NaiveDate, actor: u64) -> Result<PayslipWithLines> {
        let month = month_start(month);
        let limit = self.settings.assembly_timeout;
        match timeout(limit, self.calculate_once(employee_id, month, actor)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(employee_id, %month, "Payslip assembly timed out");
                Err(PayrollError::AssemblyTimeout {
                    employee_id,
                    month,
                    seconds: limit.as_secs(),
                })
            }
        }
    }

    async fn recalculate_once(&self, payslip_id: u64, actor: u64) -> Result<PayslipWithLines> {
        let mut tx = self.store.begin().await?;
        let result = assembler::recalculate_payslip(&mut tx, &self.settings, payslip_id, actor, Utc::now()).await;
        finish(tx, result).await
    }

    /// The (employee, month) slot of a payslip, with its lock row in place.
    async fn payslip_slot(&self, payslip_id: u64) -> Result<(u64, NaiveDate)> {
        let (employee_id, month) = {
            let mut tx = self.store.begin().await?;
            let payslip = tx.payslip(payslip_id).await?;
            tx.rollback().await?;
            payslip
                .map(|p| (p.employee_id, p.month))
                .ok_or_else(|| PayrollError::not_found("payslip", payslip_id))?
        };
        self.store.prepare_slot(employee_id, month).await?;
        Ok((employee_id, month))
    }

    #[instrument(skip(self))]
    pub async fn recalculate_payslip(&self, payslip_id: u64, actor: u64) -> Result<PayslipWithLines> {
        let (employee_id, month) = self.payslip_slot(payslip_id).await?;

        let limit = self.settings.assembly_timeout;
        match timeout(limit, self.recalculate_once(payslip_id, actor)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(payslip_id, "Payslip recalculation timed out");
                Err(PayrollError::AssemblyTimeout {
                    employee_id,
                    month,
                    seconds: limit.as_secs(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn approve_payslip(&self, payslip_id: u64, actor: u64) -> Result<Payslip> {
        let mut tx = self.store.begin().await?;
        let result = approval::approve(&mut tx, payslip_id, actor, Utc::now()).await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn mark_payslip_paid(&self, payslip_id: u64, actor: u64) -> Result<Payslip> {
        let mut tx = self.store.begin().await?;
        let result = approval::mark_paid(&mut tx, payslip_id, actor, Utc::now()).await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn reverse_payslip(&self, payslip_id: u64, actor: u64, reason: &str) -> Result<Payslip> {
        self.payslip_slot(payslip_id).await?;
        let mut tx = self.store.begin().await?;
        let result = approval::reverse(&mut tx, payslip_id, actor, reason, Utc::now()).await;
        finish(tx, result).await
    }

    pub async fn get_payslip(&self, payslip_id: u64) -> Result<PayslipWithLines> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let payslip = tx
                .payslip(payslip_id)
                .await?
                .ok_or_else(|| PayrollError::not_found("payslip", payslip_id))?;
            let lines = tx.lines(payslip_id).await?;
            Ok::<_, PayrollError>(PayslipWithLines { payslip, lines })
        }
        .await;
        finish(tx, result).await
    }

    pub async fn list_payslips(&self, month: NaiveDate, query: &PayslipQuery) -> Result<PayslipPage> {
        query.status()?;
        let mut tx = self.store.begin().await?;
        let result = tx.list_payslips(month_start(month), query).await;
        let (items, total) = finish(tx, result).await?;
        Ok(PayslipPage {
            items,
            total,
            page: query.page(),
            per_page: query.per_page(),
        })
    }

    // batches

    /// `RunMonthlyBatch`. The run id is registered while the batch runs so it
    /// can be cancelled between employees.
    #[instrument(skip(self, filter))]
    pub async fn run_monthly_batch(&self, month: NaiveDate, actor: u64, filter: &EmployeeFilter) -> Result<BatchReport> {
        let (run_id, stop) = self.batches.register();
        let result = self.run_registered_batch(run_id, &stop, month, actor, filter).await;
        self.batches.finish(&run_id);
        result
    }

    pub async fn run_registered_batch(
        &self,
        run_id: Uuid,
        stop: &AtomicBool,
        month: NaiveDate,
        actor: u64,
        filter: &EmployeeFilter,
    ) -> Result<BatchReport> {
        batch::run(self, run_id, stop, month_start(month), actor, filter).await
    }

    pub fn cancel_batch(&self, run_id: &Uuid) -> Result<()> {
        if self.batches.cancel(run_id) {
            info!(%run_id, "Batch cancellation requested");
            Ok(())
        } else {
            Err(PayrollError::not_found("batch", run_id))
        }
    }

    // annual increases

    /// `ApplyAnnualIncreases`. One transaction per contract; a dry run
    /// computes and logs every decision and rolls each transaction back.
    #[instrument(skip(self))]
    pub async fn apply_annual_increases(&self, today: NaiveDate, dry_run: bool) -> Result<IncreaseReport> {
        let contracts = {
            let mut tx = self.store.begin().await?;
            let due = tx.contracts_due_increase(today).await?;
            tx.rollback().await?;
            due
        };

        let mut report = IncreaseReport {
            today,
            dry_run,
            applied: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        };

        for contract in &contracts {
            let mut tx = self.store.begin().await?;
            let result = annual_increase::apply_one(&mut tx, &self.settings, contract, today, Utc::now()).await;
            let result = if dry_run {
                tx.rollback().await?;
                result.map(|decision| {
                    decision.map(|mut decision| {
                        decision.component_id = 0;
                        decision
                    })
                })
            } else {
                finish(tx, result).await
            };

            match result {
                Ok(Some(decision)) => {
                    annual_increase::log_decision(&decision, dry_run);
                    report.applied.push(decision);
                }
                Ok(None) => report.skipped.push(contract.id),
                Err(e) => {
                    warn!(contract_id = contract.id, error = %e, "Salary increase failed");
                    report.failures.push(IncreaseFailure {
                        contract_id: contract.id,
                        employee_id: contract.employee_id,
                        kind: e.kind().to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            dry_run,
            "Salary increases processed"
        );
        Ok(report)
    }

    // attendance

    pub async fn get_attendance_summary(&self, employee_id: u64, month: NaiveDate) -> Result<AttendanceSummary> {
        let month = month_start(month);
        let mut tx = self.store.begin().await?;
        let result = async {
            if let Some(existing) = tx.attendance_summary(employee_id, month).await? {
                return Ok(existing);
            }
            let employee = tx
                .employee(employee_id)
                .await?
                .ok_or_else(|| PayrollError::not_found("employee", employee_id))?;
            let contract = resolver::active_contract(&mut tx, employee_id, month).await?;
            attendance_summary::materialize(&mut tx, &self.settings, &employee, contract.basic_salary, month, Utc::now())
                .await
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn approve_attendance_summary(&self, summary_id: u64, actor: u64) -> Result<AttendanceSummary> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let summary = tx
                .attendance_summary_by_id(summary_id)
                .await?
                .ok_or_else(|| PayrollError::not_found("attendance_summary", summary_id))?;
            let now = Utc::now();
            attendance_summary::approve(&mut tx, &summary, actor, now).await?;
            Ok::<_, PayrollError>(AttendanceSummary {
                is_approved: true,
                approved_by: Some(actor),
                approved_at: Some(now),
                ..summary
            })
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn recalculate_attendance_summary(&self, summary_id: u64) -> Result<AttendanceSummary> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let summary = tx
                .attendance_summary_by_id(summary_id)
                .await?
                .ok_or_else(|| PayrollError::not_found("attendance_summary", summary_id))?;
            let employee = tx
                .employee(summary.employee_id)
                .await?
                .ok_or_else(|| PayrollError::not_found("employee", summary.employee_id))?;
            let contract = resolver::active_contract(&mut tx, summary.employee_id, summary.month).await?;
            attendance_summary::recalculate(&mut tx, &self.settings, &employee, contract.basic_salary, &summary, Utc::now())
                .await
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn reset_attendance_approval(&self, summary_id: u64, actor: u64) -> Result<AttendanceSummary> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let summary = tx
                .attendance_summary_by_id(summary_id)
                .await?
                .ok_or_else(|| PayrollError::not_found("attendance_summary", summary_id))?;
            attendance_summary::reset_approval(&mut tx, &summary).await?;
            info!(summary_id, actor, "Attendance approval reset");
            Ok::<_, PayrollError>(AttendanceSummary {
                is_approved: false,
                approved_by: None,
                approved_at: None,
                ..summary
            })
        }
        .await;
        finish(tx, result).await
    }

    // leave

    pub async fn get_leave_summary(&self, employee_id: u64, month: NaiveDate) -> Result<LeaveSummary> {
        let month = month_start(month);
        let mut tx = self.store.begin().await?;
        let result = async {
            let contract = resolver::active_contract(&mut tx, employee_id, month).await?;
            leave_summary::materialize(&mut tx, &self.settings, employee_id, contract.basic_salary, month, Utc::now())
                .await
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn approve_leave_request(&self, id: u64, actor: u64) -> Result<LeaveRequest> {
        let mut tx = self.store.begin().await?;
        let result = leave_requests::approve(&mut tx, id, actor).await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn reject_leave_request(&self, id: u64, actor: u64) -> Result<LeaveRequest> {
        let mut tx = self.store.begin().await?;
        let result = leave_requests::reject(&mut tx, id, actor).await;
        finish(tx, result).await
    }

    // components

    pub async fn get_active_components(&self, employee_id: u64, month: NaiveDate) -> Result<ResolvedComponents> {
        let month = month_start(month);
        let mut tx = self.store.begin().await?;
        let result = async {
            let contract = resolver::active_contract(&mut tx, employee_id, month).await?;
            resolver::resolve_for(&mut tx, &contract, month).await
        }
        .await;
        finish(tx, result).await
    }

    // advances

    /// `CreateAdvance`. Limits are checked against the salary of the
    /// contract active in the current month.
    #[instrument(skip(self))]
    pub async fn create_advance(&self, request: NewAdvance, actor: u64) -> Result<Advance> {
        let mut tx = self.store.begin().await?;
        let result = async {
            tx.employee(request.employee_id)
                .await?
                .ok_or_else(|| PayrollError::not_found("employee", request.employee_id))?;
            let now = Utc::now();
            let month = month_start(now.date_naive());
            let contract = resolver::active_contract(&mut tx, request.employee_id, month).await?;
            let resolved = resolver::resolve_for(&mut tx, &contract, month).await?;
            let salary =
                resolver::monthly_earnings(&resolved, contract.basic_salary, self.settings.days_in_month_divisor);
            allocator::create(&mut tx, &request, salary, &self.settings, actor, now).await
        }
        .await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn approve_advance(&self, advance_id: u64, actor: u64) -> Result<Advance> {
        let mut tx = self.store.begin().await?;
        let result = allocator::approve(&mut tx, advance_id, actor).await;
        finish(tx, result).await
    }

    #[instrument(skip(self))]
    pub async fn cancel_advance(&self, advance_id: u64, actor: u64) -> Result<Advance> {
        let mut tx = self.store.begin().await?;
        let result = allocator::cancel(&mut tx, advance_id).await;
        if result.is_ok() {
            info!(advance_id, actor, "Advance cancelled");
        }
        finish(tx, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PayrollError;
    use crate::model::advance::AdvanceStatus;
    use crate::model::attendance::AttendanceStatus;
    use crate::model::contract::IncreaseFrequency;
    use crate::model::leave::{LeaveBalance, LeaveStatus};
    use crate::model::payslip::{PayslipLine, PayslipStatus};
    use crate::model::salary_component::{CalculationMethod, ComponentKind, SalaryComponent};
    use crate::payroll::allocator::tests::advance;
    use crate::payroll::resolver::tests::component;
    use crate::store::memory::{MemState, MemoryStore};
    use chrono::{Datelike, Weekday};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn month(m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, 1).unwrap()
    }

    fn weekend() -> Vec<Weekday> {
        PayrollSettings::default().default_weekend_days
    }

    fn service(state: MemState) -> PayrollService<MemoryStore> {
        PayrollService::new(MemoryStore::new(state), PayrollSettings::default())
    }

    fn present_months(state: &mut MemState, employee_id: u64, months: &[u32]) {
        for m in months {
            state.full_attendance(employee_id, month(*m), &weekend());
        }
    }

    fn fixed(employee_id: u64, code: &str, kind: ComponentKind, amount: Decimal) -> SalaryComponent {
        let mut c = component(0, employee_id, code, kind, CalculationMethod::Fixed);
        c.amount = Some(amount);
        c
    }

    fn amounts(lines: &[PayslipLine]) -> Vec<(String, Decimal)> {
        lines.iter().map(|l| (l.code.clone(), l.amount)).collect()
    }

    /// Cross-entity invariants that must hold after every committed command.
    fn assert_invariants(store: &MemoryStore) {
        let s = store.snapshot();
        let mut live = BTreeMap::new();
        for p in s.payslips.values() {
            assert_eq!(p.net, p.gross - p.total_deductions, "payslip {}", p.id);
            let lines: Vec<_> = s.lines.values().filter(|l| l.payslip_id == p.id).collect();
            let earnings: Decimal = lines.iter().filter(|l| l.kind == ComponentKind::Earning).map(|l| l.amount).sum();
            let deductions: Decimal =
                lines.iter().filter(|l| l.kind == ComponentKind::Deduction).map(|l| l.amount).sum();
            assert_eq!(p.gross, earnings, "payslip {}", p.id);
            assert_eq!(p.total_deductions, deductions, "payslip {}", p.id);
            if p.status != PayslipStatus::Reversed {
                *live.entry((p.employee_id, p.month)).or_insert(0) += 1;
            }
        }
        assert!(live.values().all(|n| *n == 1));

        for a in s.advances.values() {
            let taken: Decimal = s
                .installments
                .values()
                .filter(|i| i.advance_id == a.id)
                .filter(|i| s.payslips.get(&i.payslip_id).is_some_and(|p| p.status != PayslipStatus::Reversed))
                .map(|i| i.amount)
                .sum();
            assert_eq!(a.remaining_amount, a.principal - taken, "advance {}", a.id);
        }
    }

    #[tokio::test]
    async fn scenario_a_basic_salary_only() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(6000));
        present_months(&mut state, 1, &[3]);
        let svc = service(state);

        let slip = svc.calculate_payslip(1, month(3), 99).await.unwrap();
        assert_eq!(amounts(&slip.lines), vec![("BASIC_SALARY".to_string(), dec!(6000))]);
        assert_eq!(slip.payslip.gross, dec!(6000));
        assert_eq!(slip.payslip.total_deductions, dec!(0));
        assert_eq!(slip.payslip.net, dec!(6000));
        assert_eq!(slip.payslip.status, PayslipStatus::Calculated);
        assert_eq!(slip.payslip.processed_by, 99);

        let summary = svc.get_attendance_summary(1, month(3)).await.unwrap();
        assert_eq!(summary.total_working_days, 22);
        assert_eq!(summary.present_days, 22);
        assert_invariants(svc.store());
    }

    #[tokio::test]
    async fn scenario_b_fixed_allowance_and_percentage_tax() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(5000));
        state.add_component(fixed(1, "HOUSING", ComponentKind::Earning, dec!(1000)));
        let mut tax = component(0, 1, "TAX", ComponentKind::Deduction, CalculationMethod::Percentage);
        tax.percentage = Some(dec!(10));
        state.add_component(tax);
        present_months(&mut state, 1, &[3]);
        let svc = service(state);

        let slip = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        assert_eq!(
            amounts(&slip.lines),
            vec![
                ("BASIC_SALARY".to_string(), dec!(5000)),
                ("HOUSING".to_string(), dec!(1000)),
                ("TAX".to_string(), dec!(500)),
            ]
        );
        assert_eq!((slip.payslip.gross, slip.payslip.total_deductions, slip.payslip.net), (dec!(6000), dec!(500), dec!(5500)));
        assert_invariants(svc.store());
    }

    #[tokio::test]
    async fn scenario_c_formula_deduction() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(4000));
        let mut social = component(0, 1, "SOCIAL", ComponentKind::Deduction, CalculationMethod::Formula);
        social.formula = Some("basic * 0.14".to_string());
        state.add_component(social);
        present_months(&mut state, 1, &[3]);
        let svc = service(state);

        let slip = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        let social = slip.lines.iter().find(|l| l.code == "SOCIAL").unwrap();
        assert_eq!(social.amount, dec!(560.00));
        assert_eq!(slip.payslip.net, dec!(3440));
    }

    #[tokio::test]
    async fn scenario_d_attendance_impact() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        for (i, day) in state.daily.iter_mut().take(3).enumerate() {
            if i < 2 {
                day.status = AttendanceStatus::Absent;
                day.work_hours = Decimal::ZERO;
                day.check_in = None;
                day.check_out = None;
            } else {
                day.status = AttendanceStatus::Late;
                day.late_minutes = 30;
                day.work_hours = dec!(7.5);
            }
        }
        let svc = service(state);

        let slip = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        assert_eq!(
            amounts(&slip.lines),
            vec![
                ("BASIC_SALARY".to_string(), dec!(3000)),
                ("ABSENCE_DEDUCTION".to_string(), dec!(200)),
                ("LATE_DEDUCTION".to_string(), dec!(6.25)),
            ]
        );
        assert_eq!(slip.payslip.net, dec!(2793.75));

        let summary = svc.get_attendance_summary(1, month(3)).await.unwrap();
        assert_eq!(summary.day_rate, dec!(100));
        assert_eq!(summary.absent_days, 2);
        assert_eq!(summary.total_late_minutes, 30);
        assert_invariants(svc.store());
    }

    fn advance_fixture() -> (PayrollService<MemoryStore>, u64) {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(5000));
        present_months(&mut state, 1, &[3, 4, 5]);
        let advance_id = state.add_advance(advance(0, dec!(1200), 3, month(3)));
        (service(state), advance_id)
    }

    #[tokio::test]
    async fn scenario_e_advance_installments_until_completed() {
        let (svc, advance_id) = advance_fixture();

        let slip = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        let line = slip.lines.iter().find(|l| l.code == format!("ADVANCE_{advance_id}")).unwrap();
        assert_eq!(line.amount, dec!(400));
        assert_eq!(line.kind, ComponentKind::Deduction);
        assert!(line.advance_installment_id.is_some());
        assert_eq!(slip.payslip.net, dec!(4600));

        let a = svc.store().snapshot().advances[&advance_id].clone();
        assert_eq!((a.remaining_amount, a.paid_installments, a.status), (dec!(800), 1, AdvanceStatus::InProgress));

        svc.calculate_payslip(1, month(4), 1).await.unwrap();
        svc.calculate_payslip(1, month(5), 1).await.unwrap();
        let a = svc.store().snapshot().advances[&advance_id].clone();
        assert_eq!((a.remaining_amount, a.paid_installments, a.status), (dec!(0), 3, AdvanceStatus::Completed));
        assert_invariants(svc.store());
    }

    #[tokio::test]
    async fn scenario_f_reversal_restores_the_advance_and_frees_the_month() {
        let (svc, advance_id) = advance_fixture();
        svc.calculate_payslip(1, month(3), 1).await.unwrap();
        svc.calculate_payslip(1, month(4), 1).await.unwrap();
        let may = svc.calculate_payslip(1, month(5), 1).await.unwrap();

        let reversed = svc.reverse_payslip(may.payslip.id, 7, "wrong bank details").await.unwrap();
        assert_eq!(reversed.status, PayslipStatus::Reversed);
        assert_eq!(reversed.reversed_by, Some(7));

        let a = svc.store().snapshot().advances[&advance_id].clone();
        assert_eq!((a.remaining_amount, a.paid_installments, a.status), (dec!(400), 2, AdvanceStatus::InProgress));
        assert_invariants(svc.store());

        let again = svc.calculate_payslip(1, month(5), 1).await.unwrap();
        assert_ne!(again.payslip.id, may.payslip.id);
        let a = svc.store().snapshot().advances[&advance_id].clone();
        assert_eq!(a.status, AdvanceStatus::Completed);
        assert_invariants(svc.store());
    }

    #[tokio::test]
    async fn second_payslip_for_the_month_is_a_duplicate() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        let svc = service(state);

        let first = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        match svc.calculate_payslip(1, NaiveDate::from_ymd_opt(2025, 3, 17).unwrap(), 1).await {
            Err(PayrollError::DuplicatePayslip { payslip_id, .. }) => assert_eq!(payslip_id, first.payslip.id),
            other => panic!("expected duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_contract_and_held_slot_are_refused() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        state.contracts.values_mut().for_each(|c| c.end_date = Some(month(2)));
        state.employee_with_contract(2, dec!(3000));
        let svc = service(state);

        assert!(matches!(
            svc.calculate_payslip(1, month(3), 1).await,
            Err(PayrollError::NoActiveContract { employee_id: 1, .. })
        ));

        let mut holder = svc.store().begin().await.unwrap();
        assert!(holder.try_lock_slot(2, month(3)).await.unwrap());
        assert!(matches!(
            svc.calculate_payslip(2, month(3), 1).await,
            Err(PayrollError::PayrollInProgress { employee_id: 2, .. })
        ));
        holder.rollback().await.unwrap();

        assert!(svc.calculate_payslip(2, month(3), 1).await.is_ok());
    }

    #[tokio::test]
    async fn failed_assembly_leaves_nothing_behind() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        let mut a = advance(0, dec!(1200), 3, month(3));
        // nothing was ever deducted, yet a third is gone
        a.remaining_amount = dec!(800);
        state.add_advance(a);
        let svc = service(state);

        assert!(matches!(
            svc.calculate_payslip(1, month(3), 1).await,
            Err(PayrollError::DataIntegrity(_))
        ));
        let s = svc.store().snapshot();
        assert!(s.payslips.is_empty());
        assert!(s.lines.is_empty());
        assert!(s.installments.is_empty());
    }

    #[tokio::test]
    async fn recalculation_is_idempotent() {
        let (svc, _) = advance_fixture();
        svc.store().update(|s| {
            let mut social = component(0, 1, "SOCIAL", ComponentKind::Deduction, CalculationMethod::Formula);
            social.formula = Some("gross * 0.07".to_string());
            s.add_component(social);
        });

        let first = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        let again = svc.recalculate_payslip(first.payslip.id, 2).await.unwrap();
        let third = svc.recalculate_payslip(first.payslip.id, 2).await.unwrap();

        let comparable = |lines: &[PayslipLine]| -> Vec<_> {
            lines
                .iter()
                .map(|l| {
                    (
                        l.code.clone(),
                        l.kind,
                        l.source,
                        l.quantity,
                        l.rate,
                        l.amount,
                        l.order,
                        l.component_id,
                        l.details.to_string(),
                    )
                })
                .collect()
        };
        assert_eq!(comparable(&first.lines), comparable(&again.lines));
        assert_eq!(comparable(&again.lines), comparable(&third.lines));
        assert_eq!(
            (first.payslip.gross, first.payslip.total_deductions, first.payslip.net),
            (third.payslip.gross, third.payslip.total_deductions, third.payslip.net)
        );
        assert_eq!(third.payslip.processed_by, 2);

        let s = svc.store().snapshot();
        assert_eq!(s.installments.len(), 1);
        assert_eq!(s.lines.values().filter(|l| l.payslip_id == first.payslip.id).count(), first.lines.len());
        assert_invariants(svc.store());
    }

    #[tokio::test]
    async fn payslip_state_machine() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        let svc = service(state);
        let id = svc.calculate_payslip(1, month(3), 1).await.unwrap().payslip.id;

        assert!(matches!(svc.mark_payslip_paid(id, 1).await, Err(PayrollError::StateTransitionForbidden { .. })));

        let approved = svc.approve_payslip(id, 5).await.unwrap();
        assert_eq!(approved.approved_by, Some(5));
        assert!(approved.approved_at.is_some());
        assert!(matches!(svc.recalculate_payslip(id, 1).await, Err(PayrollError::StateTransitionForbidden { .. })));

        let paid = svc.mark_payslip_paid(id, 5).await.unwrap();
        assert_eq!(paid.status, PayslipStatus::Paid);
        assert!(paid.paid_at.is_some());

        assert!(matches!(svc.reverse_payslip(id, 5, "late").await, Err(PayrollError::StateTransitionForbidden { .. })));
        assert!(matches!(svc.approve_payslip(999, 5).await, Err(PayrollError::NotFound { .. })));

        let fetched = svc.get_payslip(id).await.unwrap();
        assert_eq!(fetched.payslip.status, PayslipStatus::Paid);
        assert_eq!(fetched.lines.len(), 1);
    }

    #[tokio::test]
    async fn timed_out_assembly_leaves_nothing_behind() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        let settings = PayrollSettings {
            assembly_timeout: Duration::from_millis(20),
            ..PayrollSettings::default()
        };
        let store = MemoryStore::new(state).with_line_delay(Duration::from_secs(5));
        let svc = PayrollService::new(store, settings);
        let before = svc.store().snapshot();

        match svc.calculate_payslip(1, month(3), 1).await {
            Err(PayrollError::AssemblyTimeout { employee_id, month: m, .. }) => {
                assert_eq!(employee_id, 1);
                assert_eq!(m, month(3));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert_eq!(svc.store().snapshot(), before);

        // the slot was released with the dropped transaction
        let mut tx = svc.store().begin().await.unwrap();
        assert!(tx.try_lock_slot(1, month(3)).await.unwrap());
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn reversal_refuses_a_held_slot() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        let svc = service(state);
        let id = svc.calculate_payslip(1, month(3), 1).await.unwrap().payslip.id;

        let mut holder = svc.store().begin().await.unwrap();
        assert!(holder.try_lock_slot(1, month(3)).await.unwrap());
        assert!(matches!(
            svc.reverse_payslip(id, 1, "wrong bank account").await,
            Err(PayrollError::PayrollInProgress { employee_id: 1, .. })
        ));
        holder.rollback().await.unwrap();
        assert_eq!(svc.store().snapshot().payslips[&id].status, PayslipStatus::Calculated);

        let reversed = svc.reverse_payslip(id, 1, "wrong bank account").await.unwrap();
        assert_eq!(reversed.status, PayslipStatus::Reversed);
    }

    #[tokio::test]
    async fn reversal_needs_a_reason() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        let svc = service(state);
        let id = svc.calculate_payslip(1, month(3), 1).await.unwrap().payslip.id;
        assert!(matches!(svc.reverse_payslip(id, 1, "  ").await, Err(PayrollError::Validation(_))));
    }

    #[tokio::test]
    async fn unpaid_leave_is_deducted_and_not_counted_absent() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        // Mon 10 and Tue 11 March are leave, not attendance
        let leave_days = [NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), NaiveDate::from_ymd_opt(2025, 3, 11).unwrap()];
        state.daily.retain(|d| !leave_days.contains(&d.date));
        state.add_leave_request(LeaveRequest {
            id: 0,
            employee_id: 1,
            leave_type_id: 3,
            leave_type_code: "unpaid".to_string(),
            start_date: leave_days[0],
            end_date: leave_days[1],
            days_count: 2,
            status: LeaveStatus::Approved,
            paid: None,
            type_paid: false,
        });
        let svc = service(state);

        let slip = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        let line = slip.lines.iter().find(|l| l.code == "UNPAID_LEAVE_DEDUCTION").unwrap();
        assert_eq!(line.amount, dec!(200));
        assert_eq!(line.leave_summary_month, Some(month(3)));
        assert_eq!(line.details["by_type"]["unpaid"]["unpaid_days"], 2);
        assert!(slip.lines.iter().all(|l| l.code != "ABSENCE_DEDUCTION"));

        let summary = svc.get_attendance_summary(1, month(3)).await.unwrap();
        assert_eq!(summary.leave_days, 2);
        assert_eq!(summary.absent_days, 0);

        let leave = svc.get_leave_summary(1, month(3)).await.unwrap();
        assert_eq!(leave.unpaid_days, 2);
    }

    #[tokio::test]
    async fn approved_attendance_can_be_required() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        let settings = PayrollSettings {
            require_approved_attendance_for_payroll: true,
            ..PayrollSettings::default()
        };
        let svc = PayrollService::new(MemoryStore::new(state), settings);

        assert!(matches!(
            svc.calculate_payslip(1, month(3), 1).await,
            Err(PayrollError::SummaryApprovalRequired { .. })
        ));

        let summary = svc.get_attendance_summary(1, month(3)).await.unwrap();
        svc.approve_attendance_summary(summary.id, 4).await.unwrap();
        assert!(svc.calculate_payslip(1, month(3), 1).await.is_ok());
    }

    #[tokio::test]
    async fn approved_attendance_is_frozen_until_reset() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        present_months(&mut state, 1, &[3]);
        let svc = service(state);

        let summary = svc.get_attendance_summary(1, month(3)).await.unwrap();
        let approved = svc.approve_attendance_summary(summary.id, 4).await.unwrap();
        assert!(approved.is_approved);
        assert!(matches!(
            svc.approve_attendance_summary(summary.id, 4).await,
            Err(PayrollError::StateTransitionForbidden { .. })
        ));

        // a late punch-out correction arrives after approval
        svc.store().update(|s| s.daily.retain(|d| d.date.day() != 3));
        assert!(matches!(
            svc.recalculate_attendance_summary(summary.id).await,
            Err(PayrollError::StateTransitionForbidden { .. })
        ));
        let slip = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        assert!(slip.lines.iter().all(|l| l.code != "ABSENCE_DEDUCTION"));
        svc.reverse_payslip(slip.payslip.id, 1, "attendance correction").await.unwrap();

        let reset = svc.reset_attendance_approval(summary.id, 4).await.unwrap();
        assert!(!reset.is_approved);
        let fresh = svc.recalculate_attendance_summary(summary.id).await.unwrap();
        assert_eq!(fresh.absent_days, 1);

        let slip = svc.calculate_payslip(1, month(3), 1).await.unwrap();
        assert!(slip.lines.iter().any(|l| l.code == "ABSENCE_DEDUCTION"));
    }

    #[tokio::test]
    async fn batch_collects_failures_without_stopping() {
        let mut state = MemState::default();
        for id in 1..=3 {
            state.employee_with_contract(id, dec!(3000));
            present_months(&mut state, id, &[3]);
        }
        let mut a = fixed(2, "BASIC_A", ComponentKind::Earning, dec!(3000));
        a.is_basic = true;
        let mut b = fixed(2, "BASIC_B", ComponentKind::Earning, dec!(3000));
        b.is_basic = true;
        state.add_component(a);
        state.add_component(b);
        let svc = service(state);

        let report = svc.run_monthly_batch(month(3), 1, &EmployeeFilter::default()).await.unwrap();
        let ok: Vec<u64> = report.successes.iter().map(|s| s.employee_id).collect();
        assert_eq!(ok, vec![1, 3]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].employee_id, 2);
        assert_eq!(report.failures[0].kind, "data_integrity");
        assert!(!svc.batches().is_running(&report.run_id));

        // employees that already have a payslip are not candidates any more
        let rerun = svc.run_monthly_batch(month(3), 1, &EmployeeFilter::default()).await.unwrap();
        assert!(rerun.successes.is_empty());
        assert_eq!(rerun.failures.len(), 1);

        let filtered = EmployeeFilter {
            employee_ids: Some(vec![1]),
            department_id: None,
        };
        let none = svc.run_monthly_batch(month(3), 1, &filtered).await.unwrap();
        assert!(none.successes.is_empty() && none.failures.is_empty());
        assert_invariants(svc.store());
    }

    #[tokio::test]
    async fn cancelled_batch_skips_remaining_employees() {
        let mut state = MemState::default();
        for id in 1..=2 {
            state.employee_with_contract(id, dec!(3000));
        }
        let svc = service(state);

        let (run_id, stop) = svc.batches().register();
        svc.cancel_batch(&run_id).unwrap();
        assert!(stop.load(Ordering::SeqCst));

        let report = svc
            .run_registered_batch(run_id, &stop, month(3), 1, &EmployeeFilter::default())
            .await
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.skipped, vec![1, 2]);
        assert!(report.successes.is_empty());

        assert!(matches!(svc.cancel_batch(&Uuid::new_v4()), Err(PayrollError::NotFound { .. })));
    }

    #[tokio::test]
    async fn payslips_are_listed_by_month_with_paging() {
        let mut state = MemState::default();
        for id in 1..=3 {
            state.employee_with_contract(id, dec!(1000) * Decimal::from(id));
            present_months(&mut state, id, &[3]);
        }
        let svc = service(state);
        svc.run_monthly_batch(month(3), 1, &EmployeeFilter::default()).await.unwrap();

        let page = svc
            .list_payslips(
                month(3),
                &PayslipQuery {
                    per_page: Some(2),
                    ..PayslipQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);

        let only = svc
            .list_payslips(
                month(3),
                &PayslipQuery {
                    employee_id: Some(3),
                    status: Some("calculated".to_string()),
                    ..PayslipQuery::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(only.items.len(), 1);
        assert_eq!(only.items[0].net, dec!(3000));
        assert_eq!(only.items[0].employee_code, "EMP-0003");

        let bad = PayslipQuery {
            status: Some("open".to_string()),
            ..PayslipQuery::default()
        };
        assert!(matches!(svc.list_payslips(month(3), &bad).await, Err(PayrollError::Validation(_))));
    }

    fn increase_fixture() -> (PayrollService<MemoryStore>, u64) {
        let mut state = MemState::default();
        let contract_id = state.employee_with_contract(1, dec!(5000));
        state.add_component(fixed(1, "HOUSING", ComponentKind::Earning, dec!(1000)));
        let contract = state.contracts.get_mut(&contract_id).unwrap();
        contract.annual_increase_percent = Some(dec!(12));
        contract.increase_frequency = Some(IncreaseFrequency::Annual);
        contract.next_increase_date = NaiveDate::from_ymd_opt(2025, 3, 1);
        (service(state), contract_id)
    }

    #[tokio::test]
    async fn dry_run_increase_changes_nothing() {
        let (svc, contract_id) = increase_fixture();
        let before = svc.store().snapshot();

        let report = svc
            .apply_annual_increases(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(), true)
            .await
            .unwrap();
        assert!(report.dry_run);
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].amount, dec!(720));
        assert_eq!(report.applied[0].component_id, 0);

        let after = svc.store().snapshot();
        assert_eq!(after.components.len(), before.components.len());
        assert_eq!(
            after.contracts[&contract_id].next_increase_date,
            before.contracts[&contract_id].next_increase_date
        );
    }

    #[tokio::test]
    async fn increase_adds_an_employee_component_and_moves_the_date() {
        let (svc, contract_id) = increase_fixture();
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();

        let report = svc.apply_annual_increases(today, false).await.unwrap();
        assert_eq!(report.applied.len(), 1);
        assert!(report.failures.is_empty());

        let s = svc.store().snapshot();
        let added = s.components.values().find(|c| c.code == "AUTO_INC_202503").unwrap();
        assert_eq!(added.amount, Some(dec!(720)));
        assert_eq!(added.employee_id, 1);
        assert_eq!(added.effective_from, Some(month(3)));
        assert!(added.is_fixed && added.is_taxable && !added.is_basic);
        assert_eq!(s.contracts[&contract_id].next_increase_date, NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(s.contracts[&contract_id].basic_salary, dec!(5000));

        // not due again until next year
        let again = svc.apply_annual_increases(today, false).await.unwrap();
        assert!(again.applied.is_empty());

        let resolved = svc.get_active_components(1, month(4)).await.unwrap();
        assert!(resolved.components.iter().any(|c| c.code == "AUTO_INC_202503"));
    }

    #[tokio::test]
    async fn stale_increase_listing_is_applied_once() {
        let (svc, contract_id) = increase_fixture();
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let listed = svc.store().snapshot().contracts[&contract_id].clone();

        let report = svc.apply_annual_increases(today, false).await.unwrap();
        assert_eq!(report.applied.len(), 1);

        let mut tx = svc.store().begin().await.unwrap();
        let replay = annual_increase::apply_one(&mut tx, svc.settings(), &listed, today, Utc::now())
            .await
            .unwrap();
        assert!(replay.is_none());
        tx.commit().await.unwrap();

        let s = svc.store().snapshot();
        let increases: Vec<_> = s.components.values().filter(|c| c.code.starts_with("AUTO_INC_")).collect();
        assert_eq!(increases.len(), 1);
        assert_eq!(increases[0].amount, Some(dec!(720)));
        assert_eq!(s.contracts[&contract_id].next_increase_date, NaiveDate::from_ymd_opt(2026, 3, 1));
    }

    #[tokio::test]
    async fn overlapping_increase_runs_commit_once() {
        let (svc, contract_id) = increase_fixture();
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let listed = svc.store().snapshot().contracts[&contract_id].clone();

        // opened before the other run commits
        let mut late = svc.store().begin().await.unwrap();
        svc.apply_annual_increases(today, false).await.unwrap();

        let _ = annual_increase::apply_one(&mut late, svc.settings(), &listed, today, Utc::now()).await;
        assert!(late.commit().await.is_err());

        let s = svc.store().snapshot();
        assert_eq!(s.components.values().filter(|c| c.code.starts_with("AUTO_INC_")).count(), 1);
        assert_eq!(s.contracts[&contract_id].next_increase_date, NaiveDate::from_ymd_opt(2026, 3, 1));
    }

    #[tokio::test]
    async fn leave_approval_consumes_balance() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(3000));
        state.leave_balances.push(LeaveBalance {
            employee_id: 1,
            leave_type_id: 1,
            year: 2025,
            accrued: dec!(10),
            used: dec!(0),
            remaining: dec!(10),
        });
        let request = |days: u32| LeaveRequest {
            id: 0,
            employee_id: 1,
            leave_type_id: 1,
            leave_type_code: "annual".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, days).unwrap(),
            days_count: days,
            status: LeaveStatus::Pending,
            paid: None,
            type_paid: true,
        };
        let short = state.add_leave_request(request(3));
        let long = state.add_leave_request(request(20));
        let svc = service(state);

        let approved = svc.approve_leave_request(short, 8).await.unwrap();
        assert_eq!(approved.status, LeaveStatus::Approved);
        let balance = svc.store().snapshot().leave_balances[0].clone();
        assert_eq!((balance.used, balance.remaining), (dec!(3), dec!(7)));

        assert!(matches!(svc.approve_leave_request(long, 8).await, Err(PayrollError::Validation(_))));
        let s = svc.store().snapshot();
        assert_eq!(s.leave_requests[&long].status, LeaveStatus::Pending);
        assert_eq!(s.leave_balances[0].remaining, dec!(7));

        svc.reject_leave_request(long, 8).await.unwrap();
        assert!(matches!(
            svc.approve_leave_request(long, 8).await,
            Err(PayrollError::StateTransitionForbidden { .. })
        ));
    }

    #[tokio::test]
    async fn advance_lifecycle() {
        let mut state = MemState::default();
        state.employee_with_contract(1, dec!(5000));
        let svc = service(state);
        let request = |principal, count| NewAdvance {
            employee_id: 1,
            principal,
            installments_count: count,
            deduction_start_month: month(3),
        };

        let created = svc.create_advance(request(dec!(1200), 3), 9).await.unwrap();
        assert_eq!(created.status, AdvanceStatus::Pending);
        assert_eq!(created.remaining_amount, dec!(1200));
        assert_eq!(created.created_by, Some(9));

        let approved = svc.approve_advance(created.id, 9).await.unwrap();
        assert_eq!(approved.status, AdvanceStatus::Approved);
        assert!(matches!(
            svc.approve_advance(created.id, 9).await,
            Err(PayrollError::StateTransitionForbidden { .. })
        ));

        let cancelled = svc.cancel_advance(created.id, 9).await.unwrap();
        assert_eq!(cancelled.status, AdvanceStatus::Cancelled);

        assert!(matches!(
            svc.create_advance(request(dec!(3000), 1), 9).await,
            Err(PayrollError::AdvanceValidationFailed(_))
        ));
        assert!(matches!(
            svc.create_advance(NewAdvance { employee_id: 42, ..request(dec!(100), 1) }, 9).await,
            Err(PayrollError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn advance_with_installments_cannot_be_cancelled() {
        let (svc, advance_id) = advance_fixture();
        svc.calculate_payslip(1, month(3), 1).await.unwrap();
        assert!(matches!(
            svc.cancel_advance(advance_id, 1).await,
            Err(PayrollError::StateTransitionForbidden { .. })
        ));
    }
}
