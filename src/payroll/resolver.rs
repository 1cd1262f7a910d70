//! Which salary components apply to an employee in a given month.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::error::{PayrollError, Result};
use crate::model::contract::Contract;
use crate::model::salary_component::{
    CalculationMethod, ComponentKind, ComponentSource, SalaryComponent,
};
use crate::payroll::formula::{self, FormulaContext};
use crate::store::PayrollTx;
use crate::utils::calendar::{month_end, month_start};

pub const BASIC_SALARY_CODE: &str = "BASIC_SALARY";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResolvedComponents {
    /// Sorted by (kind, order, id); always holds exactly one basic component.
    pub components: Vec<SalaryComponent>,
    /// Codes that appeared more than once; the newest row was kept.
    pub duplicate_codes: Vec<String>,
    /// True when no basic component exists and one was built from the contract.
    pub basic_synthesized: bool,
}

impl ResolvedComponents {
    pub fn non_basic(&self) -> impl Iterator<Item = &SalaryComponent> {
        self.components.iter().filter(|c| !c.is_basic)
    }
}

/// The single active contract overlapping `month`.
pub async fn active_contract<T: PayrollTx>(
    tx: &mut T,
    employee_id: u64,
    month: NaiveDate,
) -> Result<Contract> {
    let first = month_start(month);
    let mut contracts = tx.active_contracts(employee_id, first, month_end(first)).await?;
    match contracts.len() {
        0 => Err(PayrollError::NoActiveContract {
            employee_id,
            on: first,
        }),
        1 => Ok(contracts.remove(0)),
        n => Err(PayrollError::integrity(format!(
            "employee {employee_id} has {n} active contracts in {first}"
        ))),
    }
}

fn is_eligible(component: &SalaryComponent, contract: &Contract, month: NaiveDate) -> bool {
    if !component.is_active {
        return false;
    }
    if component.effective_to.is_some_and(|to| to < month) {
        return false;
    }
    // contract activation copies components forward; their start date is not a gate
    if component.is_from_contract() && contract.status == crate::model::contract::ContractStatus::Active {
        return true;
    }
    component.effective_from.is_none_or(|from| from <= month)
}

fn check_shape(component: &SalaryComponent) -> Result<()> {
    match component.method {
        CalculationMethod::Fixed if component.amount.is_none() => Err(PayrollError::integrity(format!(
            "component {} ({}) is fixed but has no amount",
            component.id, component.code
        ))),
        CalculationMethod::Percentage => match component.percentage {
            Some(p) if p >= Decimal::ZERO && p <= Decimal::ONE_HUNDRED => Ok(()),
            other => Err(PayrollError::integrity(format!(
                "component {} ({}) has percentage {:?} outside 0..=100",
                component.id, component.code, other
            ))),
        },
        _ => Ok(()),
    }
}

/// Validates a component before it is stored.
pub fn validate_new(component: &SalaryComponent) -> Result<()> {
    check_shape(component)?;
    if component.method == CalculationMethod::Formula {
        let formula = component.formula.as_deref().unwrap_or_default();
        formula::parse(formula)?;
    }
    Ok(())
}

pub fn synthesize_basic(contract: &Contract) -> SalaryComponent {
    SalaryComponent {
        id: 0,
        employee_id: contract.employee_id,
        code: BASIC_SALARY_CODE.to_string(),
        name: "Basic salary".to_string(),
        kind: ComponentKind::Earning,
        method: CalculationMethod::Fixed,
        amount: Some(contract.basic_salary),
        percentage: None,
        formula: None,
        is_basic: true,
        is_taxable: true,
        is_fixed: true,
        order: 1,
        effective_from: Some(contract.start_date),
        effective_to: contract.end_date,
        is_active: true,
        source: ComponentSource::Contract,
        source_contract_component_id: None,
        created_at: DateTime::<Utc>::UNIX_EPOCH,
    }
}

/// Applies the selection rules to an employee's component catalog.
pub fn resolve(
    catalog: &[SalaryComponent],
    contract: &Contract,
    month: NaiveDate,
) -> Result<ResolvedComponents> {
    let month = month_start(month);

    let mut by_code: BTreeMap<String, &SalaryComponent> = BTreeMap::new();
    let mut duplicate_codes = Vec::new();

    for component in catalog
        .iter()
        .filter(|c| c.employee_id == contract.employee_id)
        .filter(|c| is_eligible(c, contract, month))
    {
        let key = component.code.trim().to_ascii_uppercase();
        match by_code.get(&key) {
            Some(kept) => {
                if !duplicate_codes.contains(&key) {
                    duplicate_codes.push(key.clone());
                }
                let newer = (component.created_at, component.id) > (kept.created_at, kept.id);
                warn!(
                    employee_id = contract.employee_id,
                    code = %key,
                    kept = if newer { component.id } else { kept.id },
                    dropped = if newer { kept.id } else { component.id },
                    "Duplicate salary component code"
                );
                if newer {
                    by_code.insert(key, component);
                }
            }
            None => {
                by_code.insert(key, component);
            }
        }
    }

    let mut components: Vec<SalaryComponent> = by_code.into_values().cloned().collect();
    for component in &components {
        check_shape(component)?;
    }

    let basics = components.iter().filter(|c| c.is_basic).count();
    let basic_synthesized = match basics {
        0 => {
            components.push(synthesize_basic(contract));
            true
        }
        1 => false,
        n => {
            return Err(PayrollError::integrity(format!(
                "employee {} has {n} basic components effective in {month}",
                contract.employee_id
            )));
        }
    };

    components.sort_by_key(|c| (c.kind, c.order, c.id));

    Ok(ResolvedComponents {
        components,
        duplicate_codes,
        basic_synthesized,
    })
}

/// Loads the catalog and resolves it for the month.
pub async fn resolve_for<T: PayrollTx>(
    tx: &mut T,
    contract: &Contract,
    month: NaiveDate,
) -> Result<ResolvedComponents> {
    let catalog = tx.components(contract.employee_id).await?;
    resolve(&catalog, contract, month)
}

/// Amount of one component at full precision. Formula errors fall back to
/// the component's `amount` (zero when unset).
pub fn component_amount(component: &SalaryComponent, basic_salary: Decimal, ctx: &FormulaContext) -> Decimal {
    match component.method {
        CalculationMethod::Fixed => component.amount.unwrap_or_default(),
        CalculationMethod::Percentage => {
            basic_salary * component.percentage.unwrap_or_default() / Decimal::ONE_HUNDRED
        }
        CalculationMethod::Formula => {
            let formula = component.formula.as_deref().unwrap_or_default();
            match formula::evaluate(formula, ctx) {
                Ok(value) => value,
                Err(e) => {
                    let fallback = component.amount.unwrap_or_default();
                    warn!(
                        component_id = component.id,
                        code = %component.code,
                        error = %e,
                        %fallback,
                        "Formula failed; using fixed amount"
                    );
                    fallback
                }
            }
        }
    }
}

/// Basic salary plus every non-basic earning, priced with a full month of
/// days. Used for salary caps and increase bases.
pub fn monthly_earnings(resolved: &ResolvedComponents, basic_salary: Decimal, days_divisor: u32) -> Decimal {
    let mut gross = basic_salary;
    for component in resolved
        .non_basic()
        .filter(|c| c.kind == ComponentKind::Earning)
    {
        let ctx = FormulaContext::payroll(basic_salary, gross, Decimal::from(days_divisor));
        gross += crate::utils::money::round_cents(component_amount(component, basic_salary, &ctx));
    }
    gross
}
