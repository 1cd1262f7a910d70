//! Monthly batch runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::Result;
use crate::payroll::service::PayrollService;
use crate::store::{EmployeeFilter, PayrollTx, Store};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchSuccess {
    pub employee_id: u64,
    pub payslip_id: u64,
    pub net: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchFailure {
    pub employee_id: u64,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchReport {
    #[schema(value_type = String)]
    pub run_id: Uuid,
    #[schema(value_type = String, format = "date")]
    pub month: NaiveDate,
    pub cancelled: bool,
    pub successes: Vec<BatchSuccess>,
    pub failures: Vec<BatchFailure>,
    /// Employees left unprocessed after a cancellation.
    pub skipped: Vec<u64>,
}

/// Stop flags of the batches currently running in this process.
#[derive(Debug, Clone, Default)]
pub struct BatchRegistry {
    runs: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
}

impl BatchRegistry {
    pub fn register(&self) -> (Uuid, Arc<AtomicBool>) {
        let run_id = Uuid::new_v4();
        let flag = Arc::new(AtomicBool::new(false));
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(run_id, flag.clone());
        (run_id, flag)
    }

    /// Asks a running batch to stop before its next employee.
    pub fn cancel(&self, run_id: &Uuid) -> bool {
        match self
            .runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(run_id)
        {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn finish(&self, run_id: &Uuid) {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(run_id);
    }

    pub fn is_running(&self, run_id: &Uuid) -> bool {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(run_id)
    }
}

/// Runs the assembler for every candidate, one transaction each. Errors are
/// collected per employee; only failing to list the candidates aborts.
pub async fn run<S: Store>(
    service: &PayrollService<S>,
    run_id: Uuid,
    stop: &AtomicBool,
    month: NaiveDate,
    actor: u64,
    filter: &EmployeeFilter,
) -> Result<BatchReport> {
    let candidates = {
        let mut tx = service.store().begin().await?;
        let candidates = tx.payroll_candidates(month, filter).await?;
        tx.rollback().await?;
        candidates
    };

    info!(%run_id, %month, employees = candidates.len(), "Batch started");

    let mut report = BatchReport {
        run_id,
        month,
        cancelled: false,
        successes: Vec::new(),
        failures: Vec::new(),
        skipped: Vec::new(),
    };

    for (i, employee) in candidates.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            report.cancelled = true;
            report.skipped = candidates[i..].iter().map(|e| e.id).collect();
            warn!(%run_id, skipped = report.skipped.len(), "Batch cancelled");
            break;
        }

        match service.calculate_payslip(employee.id, month, actor).await {
            Ok(payslip) => report.successes.push(BatchSuccess {
                employee_id: employee.id,
                payslip_id: payslip.payslip.id,
                net: payslip.payslip.net,
            }),
            Err(e) => {
                warn!(%run_id, employee_id = employee.id, error = %e, "Payslip failed in batch");
                report.failures.push(BatchFailure {
                    employee_id: employee.id,
                    kind: e.kind().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        %run_id,
        successes = report.successes.len(),
        failures = report.failures.len(),
        skipped = report.skipped.len(),
        "Batch finished"
    );
    Ok(report)
}
