use utoipa::OpenApi;

use crate::api::EmployeeMonthQuery;
use crate::api::advance::CreateAdvance;
use crate::api::payroll::{
    ApplyIncreases, CalculatePayslip, ListPayslipsQuery, ReversePayslip, RunBatch,
};
use crate::model::advance::{Advance, AdvanceStatus};
use crate::model::attendance::AttendanceSummary;
use crate::model::contract::IncreaseFrequency;
use crate::model::leave::{LeaveRequest, LeaveStatus, LeaveSummary, LeaveTypeDays};
use crate::model::payslip::{
    LineSource, Payslip, PayslipLine, PayslipPage, PayslipStatus, PayslipSummary, PayslipWithLines,
};
use crate::model::salary_component::{
    CalculationMethod, ComponentKind, ComponentSource, SalaryComponent,
};
use crate::payroll::annual_increase::{IncreaseDecision, IncreaseFailure, IncreaseReport};
use crate::payroll::batch::{BatchFailure, BatchReport, BatchSuccess};
use crate::payroll::resolver::ResolvedComponents;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Payroll Engine API",
        version = "0.1.0",
        description = r#"
## Monthly Payroll Engine

Turns contracts, salary components, attendance, leave and salary advances
into monthly payslips.

### Key Features
- **Payslips**: calculate, recalculate, approve, pay and reverse
- **Batches**: whole-company monthly runs with per-employee outcomes
- **Attendance and leave**: monthly summaries and approvals
- **Advances**: creation, approval and installment deduction
- **Salary increases**: scheduled increase components

### Actor
Commands take the acting user's id from the `X-Actor-Id` header.

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::api::payroll::calculate_payslip,
        crate::api::payroll::list_payslips,
        crate::api::payroll::get_payslip,
        crate::api::payroll::recalculate_payslip,
        crate::api::payroll::approve_payslip,
        crate::api::payroll::mark_payslip_paid,
        crate::api::payroll::reverse_payslip,
        crate::api::payroll::run_batch,
        crate::api::payroll::cancel_batch,
        crate::api::payroll::apply_increases,
        crate::api::payroll::active_components,

        crate::api::attendance::get_summary,
        crate::api::attendance::approve_summary,
        crate::api::attendance::recalculate_summary,
        crate::api::attendance::reset_approval,

        crate::api::leave::get_summary,
        crate::api::leave::approve_leave,
        crate::api::leave::reject_leave,

        crate::api::advance::create_advance,
        crate::api::advance::approve_advance,
        crate::api::advance::cancel_advance
    ),
    components(
        schemas(
            EmployeeMonthQuery,
            CalculatePayslip,
            ListPayslipsQuery,
            ReversePayslip,
            RunBatch,
            ApplyIncreases,
            CreateAdvance,
            Payslip,
            PayslipLine,
            PayslipWithLines,
            PayslipSummary,
            PayslipPage,
            PayslipStatus,
            LineSource,
            SalaryComponent,
            ComponentKind,
            CalculationMethod,
            ComponentSource,
            ResolvedComponents,
            AttendanceSummary,
            LeaveRequest,
            LeaveStatus,
            LeaveSummary,
            LeaveTypeDays,
            Advance,
            AdvanceStatus,
            IncreaseFrequency,
            BatchReport,
            BatchSuccess,
            BatchFailure,
            IncreaseReport,
            IncreaseDecision,
            IncreaseFailure
        )
    ),
    tags(
        (name = "Payroll", description = "Payslip, batch and increase APIs"),
        (name = "Attendance", description = "Monthly attendance summary APIs"),
        (name = "Leave", description = "Leave summary and approval APIs"),
        (name = "Advances", description = "Salary advance APIs"),
    )
)]
pub struct ApiDoc;
