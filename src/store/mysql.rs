//! MySQL-backed store. Connections run at SERIALIZABLE (see `db::init_db`);
//! enum columns hold their snake_case names and JSON columns are TEXT.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sqlx::mysql::{MySqlDatabaseError, MySqlRow};
use sqlx::{FromRow, MySql, MySqlPool, Row, Transaction};
use tracing::debug;

use crate::error::{PayrollError, Result};
use crate::model::advance::{Advance, AdvanceInstallment};
use crate::model::attendance::{AttendanceDaily, AttendanceSummary, Shift};
use crate::model::contract::Contract;
use crate::model::employee::Employee;
use crate::model::leave::{LeaveBalance, LeaveRequest, LeaveStatus, LeaveSummary, LeaveTypeDays};
use crate::model::payslip::{Payslip, PayslipLine, PayslipStatus, PayslipSummary};
use crate::model::salary_component::SalaryComponent;
use crate::store::{EmployeeFilter, PayrollTx, PayslipQuery, Store};
use crate::utils::calendar::{month_end, month_start, parse_weekdays};
use crate::utils::db_utils::{SqlValue, SqlWhere, bind_as, bind_scalar};

const ER_DUP_ENTRY: u16 = 1062;
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
const ER_LOCK_DEADLOCK: u16 = 1213;
const ER_LOCK_NOWAIT: u16 = 3572;

fn mysql_error_number(error: &sqlx::Error) -> Option<u16> {
    match error {
        sqlx::Error::Database(db) => db.try_downcast_ref::<MySqlDatabaseError>().map(|e| e.number()),
        _ => None,
    }
}

/// Another transaction holds the slot. A deadlock here has already rolled
/// this transaction back, so the caller must give up on it either way.
fn is_lock_conflict(error: &sqlx::Error) -> bool {
    matches!(
        mysql_error_number(error),
        Some(ER_LOCK_NOWAIT | ER_LOCK_DEADLOCK | ER_LOCK_WAIT_TIMEOUT)
    )
}

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

fn enum_col<T: FromStr>(row: &MySqlRow, column: &str) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| decode_error(column, format!("unknown value `{raw}`")))
}

fn opt_enum_col<T: FromStr>(row: &MySqlRow, column: &str) -> Result<Option<T>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        raw.parse()
            .map_err(|_| decode_error(column, format!("unknown value `{raw}`")))
    })
    .transpose()
}

fn json_col<T: DeserializeOwned>(row: &MySqlRow, column: &str) -> Result<T, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    serde_json::from_str(&raw).map_err(|e| decode_error(column, e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| PayrollError::integrity(format!("unserializable details: {e}")))
}

// ----- row mapping -----

impl<'r> FromRow<'r, MySqlRow> for Employee {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Employee {
            id: row.try_get("id")?,
            employee_code: row.try_get("employee_code")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            department_id: row.try_get("department_id")?,
            hire_date: row.try_get("hire_date")?,
            status: enum_col(row, "status")?,
            shift_id: row.try_get("shift_id")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for Contract {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Contract {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            basic_salary: row.try_get("basic_salary")?,
            status: enum_col(row, "status")?,
            annual_increase_percent: row.try_get("annual_increase_percent")?,
            increase_frequency: opt_enum_col(row, "increase_frequency")?,
            next_increase_date: row.try_get("next_increase_date")?,
            audit_note: row.try_get("audit_note")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for Shift {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        let weekend: String = row.try_get("weekend_days")?;
        Ok(Shift {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            work_hours: row.try_get("work_hours")?,
            weekend_days: parse_weekdays(&weekend)
                .map_err(|e| decode_error("weekend_days", e.to_string()))?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for SalaryComponent {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(SalaryComponent {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            kind: enum_col(row, "kind")?,
            method: enum_col(row, "method")?,
            amount: row.try_get("amount")?,
            percentage: row.try_get("percentage")?,
            formula: row.try_get("formula")?,
            is_basic: row.try_get("is_basic")?,
            is_taxable: row.try_get("is_taxable")?,
            is_fixed: row.try_get("is_fixed")?,
            order: row.try_get("sort_order")?,
            effective_from: row.try_get("effective_from")?,
            effective_to: row.try_get("effective_to")?,
            is_active: row.try_get("is_active")?,
            source: enum_col(row, "source")?,
            source_contract_component_id: row.try_get("source_contract_component_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for AttendanceDaily {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(AttendanceDaily {
            employee_id: row.try_get("employee_id")?,
            date: row.try_get("date")?,
            check_in: row.try_get("check_in")?,
            check_out: row.try_get("check_out")?,
            work_hours: row.try_get("work_hours")?,
            late_minutes: row.try_get("late_minutes")?,
            early_leave_minutes: row.try_get("early_leave_minutes")?,
            status: enum_col(row, "status")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for AttendanceSummary {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(AttendanceSummary {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            month: row.try_get("month")?,
            total_working_days: row.try_get("total_working_days")?,
            present_days: row.try_get("present_days")?,
            late_days: row.try_get("late_days")?,
            absent_days: row.try_get("absent_days")?,
            early_leave_days: row.try_get("early_leave_days")?,
            leave_days: row.try_get("leave_days")?,
            total_work_hours: row.try_get("total_work_hours")?,
            total_late_minutes: row.try_get("total_late_minutes")?,
            total_early_leave_minutes: row.try_get("total_early_leave_minutes")?,
            total_overtime_hours: row.try_get("total_overtime_hours")?,
            day_rate: row.try_get("day_rate")?,
            minute_rate: row.try_get("minute_rate")?,
            absence_deduction_amount: row.try_get("absence_deduction_amount")?,
            late_deduction_amount: row.try_get("late_deduction_amount")?,
            overtime_amount: row.try_get("overtime_amount")?,
            is_calculated: row.try_get("is_calculated")?,
            is_approved: row.try_get("is_approved")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
            calculated_at: row.try_get("calculated_at")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for LeaveRequest {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(LeaveRequest {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            leave_type_id: row.try_get("leave_type_id")?,
            leave_type_code: row.try_get("leave_type_code")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            days_count: row.try_get("days_count")?,
            status: enum_col(row, "status")?,
            paid: row.try_get("paid")?,
            type_paid: row.try_get("type_paid")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for LeaveBalance {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(LeaveBalance {
            employee_id: row.try_get("employee_id")?,
            leave_type_id: row.try_get("leave_type_id")?,
            year: row.try_get("year")?,
            accrued: row.try_get("accrued")?,
            used: row.try_get("used")?,
            remaining: row.try_get("remaining")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for LeaveSummary {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        let details: BTreeMap<String, LeaveTypeDays> = json_col(row, "details")?;
        Ok(LeaveSummary {
            employee_id: row.try_get("employee_id")?,
            month: row.try_get("month")?,
            paid_days: row.try_get("paid_days")?,
            unpaid_days: row.try_get("unpaid_days")?,
            deduction_amount: row.try_get("deduction_amount")?,
            details,
            calculated_at: row.try_get("calculated_at")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for Advance {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Advance {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            principal: row.try_get("principal")?,
            installments_count: row.try_get("installments_count")?,
            remaining_amount: row.try_get("remaining_amount")?,
            deduction_start_month: row.try_get("deduction_start_month")?,
            status: enum_col(row, "status")?,
            paid_installments: row.try_get("paid_installments")?,
            created_by: row.try_get("created_by")?,
            approved_by: row.try_get("approved_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for AdvanceInstallment {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(AdvanceInstallment {
            id: row.try_get("id")?,
            advance_id: row.try_get("advance_id")?,
            payslip_id: row.try_get("payslip_id")?,
            month: row.try_get("month")?,
            amount: row.try_get("amount")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for Payslip {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(Payslip {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            contract_id: row.try_get("contract_id")?,
            month: row.try_get("month")?,
            basic_salary: row.try_get("basic_salary")?,
            gross: row.try_get("gross")?,
            total_deductions: row.try_get("total_deductions")?,
            net: row.try_get("net")?,
            status: enum_col(row, "status")?,
            processed_by: row.try_get("processed_by")?,
            processed_at: row.try_get("processed_at")?,
            approved_by: row.try_get("approved_by")?,
            approved_at: row.try_get("approved_at")?,
            paid_at: row.try_get("paid_at")?,
            reversed_by: row.try_get("reversed_by")?,
            reversed_at: row.try_get("reversed_at")?,
            reversal_reason: row.try_get("reversal_reason")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for PayslipLine {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(PayslipLine {
            id: row.try_get("id")?,
            payslip_id: row.try_get("payslip_id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            kind: enum_col(row, "kind")?,
            source: enum_col(row, "source")?,
            quantity: row.try_get("quantity")?,
            rate: row.try_get("rate")?,
            amount: row.try_get("amount")?,
            order: row.try_get("sort_order")?,
            component_id: row.try_get("component_id")?,
            advance_installment_id: row.try_get("advance_installment_id")?,
            leave_summary_month: row.try_get("leave_summary_month")?,
            details: json_col(row, "details")?,
        })
    }
}

impl<'r> FromRow<'r, MySqlRow> for PayslipSummary {
    fn from_row(row: &'r MySqlRow) -> Result<Self, sqlx::Error> {
        Ok(PayslipSummary {
            id: row.try_get("id")?,
            employee_id: row.try_get("employee_id")?,
            employee_code: row.try_get("employee_code")?,
            month: row.try_get("month")?,
            gross: row.try_get("gross")?,
            total_deductions: row.try_get("total_deductions")?,
            net: row.try_get("net")?,
            status: enum_col(row, "status")?,
        })
    }
}

const LEAVE_REQUEST_SELECT: &str = r#"
    SELECT r.id, r.employee_id, r.leave_type_id, t.code AS leave_type_code,
           r.start_date, r.end_date, r.days_count, r.status, r.paid, t.paid AS type_paid
    FROM leave_requests r
    JOIN leave_types t ON t.id = r.leave_type_id
"#;

// ----- store -----

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

impl Store for MySqlStore {
    type Tx = MySqlTx;

    async fn begin(&self) -> Result<MySqlTx> {
        Ok(MySqlTx {
            tx: self.pool.begin().await?,
        })
    }

    async fn prepare_slot(&self, employee_id: u64, month: NaiveDate) -> Result<()> {
        let month = month_start(month);

        // Autocommit reads are non-locking, so an existing row never waits
        // on its holder here.
        let exists: Option<u64> = sqlx::query_scalar(
            "SELECT employee_id FROM payroll_slot_locks WHERE employee_id = ? AND month = ?",
        )
        .bind(employee_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_none() {
            sqlx::query("INSERT IGNORE INTO payroll_slot_locks (employee_id, month) VALUES (?, ?)")
                .bind(employee_id)
                .bind(month)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

pub struct MySqlTx {
    tx: Transaction<'static, MySql>,
}

impl MySqlTx {
    async fn lock_slot_row(&mut self, employee_id: u64, month: NaiveDate) -> sqlx::Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT employee_id FROM payroll_slot_locks
            WHERE employee_id = ? AND month = ?
            FOR UPDATE NOWAIT
            "#,
        )
        .bind(employee_id)
        .bind(month)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.is_some())
    }

    async fn acquire_slot(&mut self, employee_id: u64, month: NaiveDate) -> sqlx::Result<bool> {
        if self.lock_slot_row(employee_id, month).await? {
            return Ok(true);
        }
        // unprepared slot: create the row on this connection
        sqlx::query("INSERT IGNORE INTO payroll_slot_locks (employee_id, month) VALUES (?, ?)")
            .bind(employee_id)
            .bind(month)
            .execute(&mut *self.tx)
            .await?;
        self.lock_slot_row(employee_id, month).await
    }
}

impl PayrollTx for MySqlTx {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn try_lock_slot(&mut self, employee_id: u64, month: NaiveDate) -> Result<bool> {
        let month = month_start(month);
        match self.acquire_slot(employee_id, month).await {
            Ok(locked) => Ok(locked),
            Err(e) if is_lock_conflict(&e) => {
                debug!(employee_id, %month, "Slot lock held elsewhere");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn employee(&mut self, id: u64) -> Result<Option<Employee>> {
        Ok(sqlx::query_as::<_, Employee>("SELECT * FROM employees WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn payroll_candidates(&mut self, month: NaiveDate, filter: &EmployeeFilter) -> Result<Vec<Employee>> {
        let first = month_start(month);
        let last = month_end(first);

        let mut conditions = SqlWhere::new()
            .and("e.status = ?", SqlValue::String("active".to_string()))
            .and_all(
                r#"EXISTS (
                    SELECT 1 FROM contracts c
                    WHERE c.employee_id = e.id AND c.status = 'active'
                      AND c.start_date <= ? AND (c.end_date IS NULL OR c.end_date >= ?)
                )"#,
                [SqlValue::Date(last), SqlValue::Date(first)],
            )
            .and(
                r#"NOT EXISTS (
                    SELECT 1 FROM payslips p
                    WHERE p.employee_id = e.id AND p.month = ? AND p.status <> 'reversed'
                )"#,
                SqlValue::Date(first),
            )
            .and_opt("e.department_id = ?", filter.department_id, SqlValue::U64);
        if let Some(ids) = &filter.employee_ids {
            conditions = conditions.and_in("e.id", ids);
        }

        let sql = format!("SELECT e.* FROM employees e{} ORDER BY e.id", conditions.sql());
        let query = bind_as(sqlx::query_as::<_, Employee>(&sql), conditions.values());
        Ok(query.fetch_all(&mut *self.tx).await?)
    }

    async fn active_contracts(&mut self, employee_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<Contract>> {
        Ok(sqlx::query_as::<_, Contract>(
            r#"
            SELECT * FROM contracts
            WHERE employee_id = ? AND status = 'active'
              AND start_date <= ? AND (end_date IS NULL OR end_date >= ?)
            ORDER BY start_date, id
            "#,
        )
        .bind(employee_id)
        .bind(to)
        .bind(from)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn contracts_due_increase(&mut self, today: NaiveDate) -> Result<Vec<Contract>> {
        Ok(sqlx::query_as::<_, Contract>(
            r#"
            SELECT * FROM contracts
            WHERE status = 'active'
              AND next_increase_date IS NOT NULL AND next_increase_date <= ?
              AND annual_increase_percent > 0
            ORDER BY id
            "#,
        )
        .bind(today)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn contract_for_update(&mut self, id: u64) -> Result<Option<Contract>> {
        Ok(sqlx::query_as::<_, Contract>("SELECT * FROM contracts WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn update_contract_schedule(
        &mut self,
        contract_id: u64,
        due: NaiveDate,
        next_increase_date: NaiveDate,
        audit_note: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE contracts
            SET next_increase_date = ?, audit_note = COALESCE(?, audit_note)
            WHERE id = ? AND next_increase_date = ?
            "#,
        )
        .bind(next_increase_date)
        .bind(audit_note)
        .bind(contract_id)
        .bind(due)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn shift(&mut self, id: u64) -> Result<Option<Shift>> {
        Ok(sqlx::query_as::<_, Shift>("SELECT * FROM shifts WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn components(&mut self, employee_id: u64) -> Result<Vec<SalaryComponent>> {
        Ok(sqlx::query_as::<_, SalaryComponent>(
            "SELECT * FROM salary_components WHERE employee_id = ? ORDER BY id",
        )
        .bind(employee_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_component(&mut self, c: &SalaryComponent) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO salary_components
            (employee_id, code, name, kind, method, amount, percentage, formula,
             is_basic, is_taxable, is_fixed, sort_order, effective_from, effective_to,
             is_active, source, source_contract_component_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(c.employee_id)
        .bind(&c.code)
        .bind(&c.name)
        .bind(c.kind.as_ref())
        .bind(c.method.as_ref())
        .bind(c.amount)
        .bind(c.percentage)
        .bind(&c.formula)
        .bind(c.is_basic)
        .bind(c.is_taxable)
        .bind(c.is_fixed)
        .bind(c.order)
        .bind(c.effective_from)
        .bind(c.effective_to)
        .bind(c.is_active)
        .bind(c.source.as_ref())
        .bind(c.source_contract_component_id)
        .bind(c.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_id())
    }

    async fn attendance_days(&mut self, employee_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<AttendanceDaily>> {
        Ok(sqlx::query_as::<_, AttendanceDaily>(
            r#"
            SELECT * FROM attendance_daily
            WHERE employee_id = ? AND date BETWEEN ? AND ?
            ORDER BY date
            "#,
        )
        .bind(employee_id)
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn punches(&mut self, employee_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<NaiveDateTime>> {
        Ok(sqlx::query_scalar::<_, NaiveDateTime>(
            r#"
            SELECT punched_at FROM attendance_punches
            WHERE employee_id = ? AND DATE(punched_at) BETWEEN ? AND ?
            ORDER BY punched_at
            "#,
        )
        .bind(employee_id)
        .bind(from)
        .bind(to)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn attendance_summary(&mut self, employee_id: u64, month: NaiveDate) -> Result<Option<AttendanceSummary>> {
        Ok(sqlx::query_as::<_, AttendanceSummary>(
            "SELECT * FROM attendance_summaries WHERE employee_id = ? AND month = ?",
        )
        .bind(employee_id)
        .bind(month_start(month))
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn attendance_summary_by_id(&mut self, id: u64) -> Result<Option<AttendanceSummary>> {
        Ok(sqlx::query_as::<_, AttendanceSummary>("SELECT * FROM attendance_summaries WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn save_attendance_summary(&mut self, s: &AttendanceSummary) -> Result<u64> {
        // LAST_INSERT_ID(id) makes the update path report the existing row id
        let result = sqlx::query(
            r#"
            INSERT INTO attendance_summaries
            (employee_id, month, total_working_days, present_days, late_days, absent_days,
             early_leave_days, leave_days, total_work_hours, total_late_minutes,
             total_early_leave_minutes, total_overtime_hours, day_rate, minute_rate,
             absence_deduction_amount, late_deduction_amount, overtime_amount,
             is_calculated, is_approved, approved_by, approved_at, calculated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                id = LAST_INSERT_ID(id),
                total_working_days = VALUES(total_working_days),
                present_days = VALUES(present_days),
                late_days = VALUES(late_days),
                absent_days = VALUES(absent_days),
                early_leave_days = VALUES(early_leave_days),
                leave_days = VALUES(leave_days),
                total_work_hours = VALUES(total_work_hours),
                total_late_minutes = VALUES(total_late_minutes),
                total_early_leave_minutes = VALUES(total_early_leave_minutes),
                total_overtime_hours = VALUES(total_overtime_hours),
                day_rate = VALUES(day_rate),
                minute_rate = VALUES(minute_rate),
                absence_deduction_amount = VALUES(absence_deduction_amount),
                late_deduction_amount = VALUES(late_deduction_amount),
                overtime_amount = VALUES(overtime_amount),
                is_calculated = VALUES(is_calculated),
                is_approved = VALUES(is_approved),
                approved_by = VALUES(approved_by),
                approved_at = VALUES(approved_at),
                calculated_at = VALUES(calculated_at)
            "#,
        )
        .bind(s.employee_id)
        .bind(month_start(s.month))
        .bind(s.total_working_days)
        .bind(s.present_days)
        .bind(s.late_days)
        .bind(s.absent_days)
        .bind(s.early_leave_days)
        .bind(s.leave_days)
        .bind(s.total_work_hours)
        .bind(s.total_late_minutes)
        .bind(s.total_early_leave_minutes)
        .bind(s.total_overtime_hours)
        .bind(s.day_rate)
        .bind(s.minute_rate)
        .bind(s.absence_deduction_amount)
        .bind(s.late_deduction_amount)
        .bind(s.overtime_amount)
        .bind(s.is_calculated)
        .bind(s.is_approved)
        .bind(s.approved_by)
        .bind(s.approved_at)
        .bind(s.calculated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_id())
    }

    async fn set_attendance_approval(
        &mut self,
        id: u64,
        approved_by: Option<u64>,
        approved_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE attendance_summaries SET is_approved = ?, approved_by = ?, approved_at = ? WHERE id = ?",
        )
        .bind(approved_by.is_some())
        .bind(approved_by)
        .bind(approved_at)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(PayrollError::not_found("attendance_summary", id));
        }
        Ok(())
    }

    async fn approved_leaves(&mut self, employee_id: u64, from: NaiveDate, to: NaiveDate) -> Result<Vec<LeaveRequest>> {
        let sql = format!(
            "{LEAVE_REQUEST_SELECT} WHERE r.employee_id = ? AND r.status = ? \
             AND r.start_date <= ? AND r.end_date >= ? ORDER BY r.start_date, r.id"
        );
        Ok(sqlx::query_as::<_, LeaveRequest>(&sql)
            .bind(employee_id)
            .bind(LeaveStatus::Approved.as_ref())
            .bind(to)
            .bind(from)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn leave_request(&mut self, id: u64) -> Result<Option<LeaveRequest>> {
        let sql = format!("{LEAVE_REQUEST_SELECT} WHERE r.id = ?");
        Ok(sqlx::query_as::<_, LeaveRequest>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn set_leave_status(&mut self, id: u64, status: LeaveStatus, actor: u64) -> Result<()> {
        sqlx::query(
            "UPDATE leave_requests SET status = ?, decided_by = ?, decided_at = ? WHERE id = ?",
        )
        .bind(status.as_ref())
        .bind(actor)
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn leave_balance(&mut self, employee_id: u64, leave_type_id: u64, year: i32) -> Result<Option<LeaveBalance>> {
        Ok(sqlx::query_as::<_, LeaveBalance>(
            r#"
            SELECT * FROM leave_balances
            WHERE employee_id = ? AND leave_type_id = ? AND year = ?
            FOR UPDATE
            "#,
        )
        .bind(employee_id)
        .bind(leave_type_id)
        .bind(year)
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn save_leave_balance(&mut self, b: &LeaveBalance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leave_balances (employee_id, leave_type_id, year, accrued, used, remaining)
            VALUES (?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                accrued = VALUES(accrued), used = VALUES(used), remaining = VALUES(remaining)
            "#,
        )
        .bind(b.employee_id)
        .bind(b.leave_type_id)
        .bind(b.year)
        .bind(b.accrued)
        .bind(b.used)
        .bind(b.remaining)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn leave_summary(&mut self, employee_id: u64, month: NaiveDate) -> Result<Option<LeaveSummary>> {
        Ok(sqlx::query_as::<_, LeaveSummary>(
            "SELECT * FROM leave_summaries WHERE employee_id = ? AND month = ?",
        )
        .bind(employee_id)
        .bind(month_start(month))
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn save_leave_summary(&mut self, s: &LeaveSummary) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO leave_summaries
            (employee_id, month, paid_days, unpaid_days, deduction_amount, details, calculated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                paid_days = VALUES(paid_days),
                unpaid_days = VALUES(unpaid_days),
                deduction_amount = VALUES(deduction_amount),
                details = VALUES(details),
                calculated_at = VALUES(calculated_at)
            "#,
        )
        .bind(s.employee_id)
        .bind(month_start(s.month))
        .bind(s.paid_days)
        .bind(s.unpaid_days)
        .bind(s.deduction_amount)
        .bind(to_json(&s.details)?)
        .bind(s.calculated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn advances_for_employee(&mut self, employee_id: u64) -> Result<Vec<Advance>> {
        Ok(sqlx::query_as::<_, Advance>(
            "SELECT * FROM advances WHERE employee_id = ? ORDER BY id FOR UPDATE",
        )
        .bind(employee_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn advance(&mut self, id: u64) -> Result<Option<Advance>> {
        Ok(sqlx::query_as::<_, Advance>("SELECT * FROM advances WHERE id = ? FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn insert_advance(&mut self, a: &Advance) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO advances
            (employee_id, principal, installments_count, remaining_amount, deduction_start_month,
             status, paid_installments, created_by, approved_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(a.employee_id)
        .bind(a.principal)
        .bind(a.installments_count)
        .bind(a.remaining_amount)
        .bind(month_start(a.deduction_start_month))
        .bind(a.status.as_ref())
        .bind(a.paid_installments)
        .bind(a.created_by)
        .bind(a.approved_by)
        .bind(a.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_id())
    }

    async fn update_advance(&mut self, a: &Advance) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE advances
            SET remaining_amount = ?, status = ?, paid_installments = ?, approved_by = ?
            WHERE id = ?
            "#,
        )
        .bind(a.remaining_amount)
        .bind(a.status.as_ref())
        .bind(a.paid_installments)
        .bind(a.approved_by)
        .bind(a.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn live_installments_total(&mut self, advance_id: u64) -> Result<Decimal> {
        let total: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT SUM(i.amount) FROM advance_installments i
            JOIN payslips p ON p.id = i.payslip_id
            WHERE i.advance_id = ? AND p.status <> 'reversed'
            "#,
        )
        .bind(advance_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(total.unwrap_or_default())
    }

    async fn insert_installment(&mut self, i: &AdvanceInstallment) -> Result<u64> {
        let result = sqlx::query(
            "INSERT INTO advance_installments (advance_id, payslip_id, month, amount) VALUES (?, ?, ?, ?)",
        )
        .bind(i.advance_id)
        .bind(i.payslip_id)
        .bind(month_start(i.month))
        .bind(i.amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_id())
    }

    async fn installments_for_payslip(&mut self, payslip_id: u64) -> Result<Vec<AdvanceInstallment>> {
        Ok(sqlx::query_as::<_, AdvanceInstallment>(
            "SELECT * FROM advance_installments WHERE payslip_id = ? ORDER BY id",
        )
        .bind(payslip_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn delete_installments(&mut self, payslip_id: u64) -> Result<()> {
        sqlx::query("DELETE FROM advance_installments WHERE payslip_id = ?")
            .bind(payslip_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn live_payslip(&mut self, employee_id: u64, month: NaiveDate) -> Result<Option<Payslip>> {
        Ok(sqlx::query_as::<_, Payslip>(
            r#"
            SELECT * FROM payslips
            WHERE employee_id = ? AND month = ? AND status <> 'reversed'
            "#,
        )
        .bind(employee_id)
        .bind(month_start(month))
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn payslip(&mut self, id: u64) -> Result<Option<Payslip>> {
        Ok(sqlx::query_as::<_, Payslip>("SELECT * FROM payslips WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn insert_payslip(&mut self, p: &Payslip) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO payslips
            (employee_id, contract_id, month, basic_salary, gross, total_deductions, net,
             status, processed_by, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(p.employee_id)
        .bind(p.contract_id)
        .bind(month_start(p.month))
        .bind(p.basic_salary)
        .bind(p.gross)
        .bind(p.total_deductions)
        .bind(p.net)
        .bind(p.status.as_ref())
        .bind(p.processed_by)
        .bind(p.processed_at)
        .execute(&mut *self.tx)
        .await;

        match result {
            Ok(result) => Ok(result.last_insert_id()),
            // the live-slot unique key caught a concurrent writer
            Err(e) if mysql_error_number(&e) == Some(ER_DUP_ENTRY) => Err(PayrollError::DuplicatePayslip {
                employee_id: p.employee_id,
                month: month_start(p.month),
                payslip_id: 0,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_payslip(&mut self, p: &Payslip) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payslips
            SET basic_salary = ?, gross = ?, total_deductions = ?, net = ?, status = ?,
                processed_by = ?, processed_at = ?, approved_by = ?, approved_at = ?,
                paid_at = ?, reversed_by = ?, reversed_at = ?, reversal_reason = ?
            WHERE id = ?
            "#,
        )
        .bind(p.basic_salary)
        .bind(p.gross)
        .bind(p.total_deductions)
        .bind(p.net)
        .bind(p.status.as_ref())
        .bind(p.processed_by)
        .bind(p.processed_at)
        .bind(p.approved_by)
        .bind(p.approved_at)
        .bind(p.paid_at)
        .bind(p.reversed_by)
        .bind(p.reversed_at)
        .bind(&p.reversal_reason)
        .bind(p.id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_line(&mut self, l: &PayslipLine) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO payslip_lines
            (payslip_id, code, name, kind, source, quantity, rate, amount, sort_order,
             component_id, advance_installment_id, leave_summary_month, details)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(l.payslip_id)
        .bind(&l.code)
        .bind(&l.name)
        .bind(l.kind.as_ref())
        .bind(l.source.as_ref())
        .bind(l.quantity)
        .bind(l.rate)
        .bind(l.amount)
        .bind(l.order)
        .bind(l.component_id)
        .bind(l.advance_installment_id)
        .bind(l.leave_summary_month)
        .bind(to_json(&l.details)?)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.last_insert_id())
    }

    async fn lines(&mut self, payslip_id: u64) -> Result<Vec<PayslipLine>> {
        Ok(sqlx::query_as::<_, PayslipLine>(
            r#"
            SELECT * FROM payslip_lines
            WHERE payslip_id = ?
            ORDER BY FIELD(kind, 'earning', 'deduction'), sort_order, id
            "#,
        )
        .bind(payslip_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn delete_lines(&mut self, payslip_id: u64) -> Result<()> {
        sqlx::query("DELETE FROM payslip_lines WHERE payslip_id = ?")
            .bind(payslip_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn list_payslips(&mut self, month: NaiveDate, query: &PayslipQuery) -> Result<(Vec<PayslipSummary>, i64)> {
        let conditions = SqlWhere::new()
            .and("p.month = ?", SqlValue::Date(month_start(month)))
            .and_opt("p.status = ?", query.status()?, |s: PayslipStatus| {
                SqlValue::String(s.to_string())
            })
            .and_opt("p.employee_id = ?", query.employee_id, SqlValue::U64)
            .and_opt("e.department_id = ?", query.department_id, SqlValue::U64);

        let from = format!(
            "FROM payslips p JOIN employees e ON e.id = p.employee_id{}",
            conditions.sql()
        );

        let count_sql = format!("SELECT COUNT(*) {from}");
        let total: i64 = bind_scalar(sqlx::query_scalar(&count_sql), conditions.values())
            .fetch_one(&mut *self.tx)
            .await?;

        let page_sql = format!(
            r#"
            SELECT p.id, p.employee_id, e.employee_code, p.month, p.gross,
                   p.total_deductions, p.net, p.status
            {from}
            ORDER BY e.employee_code, p.id
            LIMIT ? OFFSET ?
            "#
        );
        let items = bind_as(sqlx::query_as::<_, PayslipSummary>(&page_sql), conditions.values())
            .bind(query.per_page())
            .bind(query.offset())
            .fetch_all(&mut *self.tx)
            .await?;

        Ok((items, total))
    }
}
