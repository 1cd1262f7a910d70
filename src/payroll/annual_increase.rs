//! Scheduled salary increases. Each matured contract gets one new fixed
//! earning component on the employee and its next increase date moves on by
//! one period.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::config::PayrollSettings;
use crate::error::{PayrollError, Result};
use crate::model::contract::{Contract, ContractStatus, IncreaseFrequency};
use crate::model::salary_component::{
    CalculationMethod, ComponentKind, ComponentSource, SalaryComponent,
};
use crate::payroll::resolver;
use crate::store::PayrollTx;
use crate::utils::calendar::month_start;
use crate::utils::money::round_cents;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IncreaseDecision {
    pub contract_id: u64,
    pub employee_id: u64,
    pub frequency: IncreaseFrequency,
    pub effective_percent: Decimal,
    pub base_earnings: Decimal,
    pub amount: Decimal,
    pub component_code: String,
    /// Id of the stored component; 0 in a dry run.
    pub component_id: u64,
    #[schema(value_type = String, format = "date")]
    pub next_increase_date: NaiveDate,
    /// The next date was approximated as 30 days per month.
    pub approximated: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IncreaseFailure {
    pub contract_id: u64,
    pub employee_id: u64,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IncreaseReport {
    #[schema(value_type = String, format = "date")]
    pub today: NaiveDate,
    pub dry_run: bool,
    pub applied: Vec<IncreaseDecision>,
    /// Contracts another run had already moved on.
    pub skipped: Vec<u64>,
    pub failures: Vec<IncreaseFailure>,
}

pub fn effective_percent(annual_percent: Decimal, frequency: IncreaseFrequency) -> Decimal {
    annual_percent / Decimal::from(frequency.periods_per_year())
}

/// The date one period after `from`, and whether it had to be approximated.
pub fn next_date(from: NaiveDate, frequency: IncreaseFrequency) -> Option<(NaiveDate, bool)> {
    let months = frequency.months();
    match from.checked_add_months(Months::new(months)) {
        Some(next) => Some((next, false)),
        None => from
            .checked_add_days(Days::new(30 * u64::from(months)))
            .map(|next| (next, true)),
    }
}

fn component_code(today: NaiveDate, taken: &[SalaryComponent]) -> String {
    let base = format!("AUTO_INC_{:04}{:02}", today.year(), today.month());
    let used = |code: &str| taken.iter().any(|c| c.code.eq_ignore_ascii_case(code));
    if !used(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{base}_{n}"))
        .find(|code| !used(code))
        .unwrap_or(base)
}

fn increase_component(
    contract: &Contract,
    code: String,
    amount: Decimal,
    effective_percent: Decimal,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> SalaryComponent {
    SalaryComponent {
        id: 0,
        employee_id: contract.employee_id,
        name: format!(
            "Salary increase {:04}-{:02} ({}%)",
            today.year(),
            today.month(),
            effective_percent.normalize()
        ),
        code,
        kind: ComponentKind::Earning,
        method: CalculationMethod::Fixed,
        amount: Some(amount),
        percentage: None,
        formula: None,
        is_basic: false,
        is_taxable: true,
        is_fixed: true,
        order: 90,
        effective_from: Some(month_start(today)),
        effective_to: None,
        is_active: true,
        source: ComponentSource::AutoIncrease,
        source_contract_component_id: None,
        created_at: now,
    }
}

/// Applies one increase step to a matured contract. `listed` may be stale:
/// the contract is re-read under a row lock and skipped (`None`) unless it
/// is still due, so overlapping runs move each schedule once.
pub async fn apply_one<T: PayrollTx>(
    tx: &mut T,
    settings: &PayrollSettings,
    listed: &Contract,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Option<IncreaseDecision>> {
    let contract = tx
        .contract_for_update(listed.id)
        .await?
        .ok_or_else(|| PayrollError::not_found("contract", listed.id))?;
    let due = match contract.next_increase_date {
        Some(due) if contract.status == ContractStatus::Active && due <= today => due,
        _ => {
            info!(contract_id = contract.id, "Increase no longer due, skipped");
            return Ok(None);
        }
    };
    let annual = contract.annual_increase_percent.unwrap_or_default();
    if annual <= Decimal::ZERO {
        return Err(PayrollError::Validation(format!(
            "contract {} has no positive increase percent",
            contract.id
        )));
    }
    let frequency = contract.increase_frequency.unwrap_or(IncreaseFrequency::Annual);
    let percent = effective_percent(annual, frequency);

    let (next, approximated) = next_date(due, frequency).ok_or_else(|| {
        PayrollError::integrity(format!("contract {} next increase date overflows", contract.id))
    })?;
    let note = approximated.then(|| {
        let line = format!("{today}: next increase after {due} approximated as {next}");
        match contract.audit_note.as_deref() {
            Some(existing) if !existing.is_empty() => format!("{existing}\n{line}"),
            _ => line,
        }
    });
    if !tx.update_contract_schedule(contract.id, due, next, note.as_deref()).await? {
        info!(contract_id = contract.id, %due, "Increase schedule moved concurrently, skipped");
        return Ok(None);
    }
    if approximated {
        warn!(contract_id = contract.id, %due, %next, "Increase date approximated");
    }

    let catalog = tx.components(contract.employee_id).await?;
    let resolved = resolver::resolve(&catalog, &contract, today)?;
    let base = resolver::monthly_earnings(&resolved, contract.basic_salary, settings.days_in_month_divisor);
    let amount = round_cents(base * percent / Decimal::ONE_HUNDRED);

    let code = component_code(today, &catalog);
    let mut component = increase_component(&contract, code.clone(), amount, percent, today, now);
    component.id = tx.insert_component(&component).await?;

    Ok(Some(IncreaseDecision {
        contract_id: contract.id,
        employee_id: contract.employee_id,
        frequency,
        effective_percent: percent,
        base_earnings: base,
        amount,
        component_code: code,
        component_id: component.id,
        next_increase_date: next,
        approximated,
    }))
}

pub fn log_decision(decision: &IncreaseDecision, dry_run: bool) {
    info!(
        contract_id = decision.contract_id,
        employee_id = decision.employee_id,
        percent = %decision.effective_percent,
        base = %decision.base_earnings,
        amount = %decision.amount,
        next = %decision.next_increase_date,
        dry_run,
        "Salary increase"
    );
}
