use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use chrono::NaiveDate;
use serde_json::json;
use thiserror::Error;

pub type Result<T, E = PayrollError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PayrollError {
    #[error("employee {employee_id} has no active contract on {on}")]
    NoActiveContract { employee_id: u64, on: NaiveDate },

    #[error("employee {employee_id} already has payslip {payslip_id} for {month}")]
    DuplicatePayslip {
        employee_id: u64,
        month: NaiveDate,
        payslip_id: u64,
    },

    #[error("payroll for employee {employee_id} / {month} is being processed elsewhere")]
    PayrollInProgress { employee_id: u64, month: NaiveDate },

    #[error("payslip assembly for employee {employee_id} / {month} exceeded {seconds}s")]
    AssemblyTimeout {
        employee_id: u64,
        month: NaiveDate,
        seconds: u64,
    },

    #[error("invalid formula `{formula}`: {reason}")]
    InvalidFormula { formula: String, reason: String },

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("{entity} {id}: cannot go from {from} to {to}")]
    StateTransitionForbidden {
        entity: &'static str,
        id: u64,
        from: String,
        to: String,
    },

    #[error("attendance summary for employee {employee_id} / {month} must be approved first")]
    SummaryApprovalRequired { employee_id: u64, month: NaiveDate },

    #[error("advance rejected: {0}")]
    AdvanceValidationFailed(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl PayrollError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PayrollError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(target: "payroll::integrity", %message, "invariant violated");
        PayrollError::DataIntegrity(message)
    }

    pub fn forbidden(
        entity: &'static str,
        id: u64,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        PayrollError::StateTransitionForbidden {
            entity,
            id,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PayrollError::NoActiveContract { .. } => "no_active_contract",
            PayrollError::DuplicatePayslip { .. } => "duplicate_payslip",
            PayrollError::PayrollInProgress { .. } => "payroll_in_progress",
            PayrollError::AssemblyTimeout { .. } => "assembly_timeout",
            PayrollError::InvalidFormula { .. } => "invalid_formula",
            PayrollError::DataIntegrity(_) => "data_integrity",
            PayrollError::StateTransitionForbidden { .. } => "state_transition_forbidden",
            PayrollError::SummaryApprovalRequired { .. } => "summary_approval_required",
            PayrollError::AdvanceValidationFailed(_) => "advance_validation_failed",
            PayrollError::NotFound { .. } => "not_found",
            PayrollError::Validation(_) => "validation",
            PayrollError::Database(_) => "database",
        }
    }
}

impl ResponseError for PayrollError {
    fn status_code(&self) -> StatusCode {
        match self {
            PayrollError::NotFound { .. } => StatusCode::NOT_FOUND,
            PayrollError::DuplicatePayslip { .. }
            | PayrollError::StateTransitionForbidden { .. } => StatusCode::CONFLICT,
            PayrollError::PayrollInProgress { .. } => StatusCode::LOCKED,
            PayrollError::AssemblyTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PayrollError::NoActiveContract { .. }
            | PayrollError::InvalidFormula { .. }
            | PayrollError::SummaryApprovalRequired { .. }
            | PayrollError::AdvanceValidationFailed(_)
            | PayrollError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PayrollError::DataIntegrity(_) | PayrollError::Database(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            PayrollError::Database(e) => {
                tracing::error!(error = %e, "database error");
                "Internal Server Error".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": message,
            "kind": self.kind(),
        }))
    }
}
