pub mod allocator;
pub mod annual_increase;
pub mod approval;
pub mod assembler;
pub mod attendance_summary;
pub mod batch;
pub mod daily;
pub mod formula;
pub mod leave_requests;
pub mod leave_summary;
pub mod resolver;
pub mod service;

pub use service::PayrollService;
