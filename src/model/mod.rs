pub mod advance;
pub mod attendance;
pub mod contract;
pub mod employee;
pub mod leave;
pub mod payslip;
pub mod salary_component;
