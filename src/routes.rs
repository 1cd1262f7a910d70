use actix_web::web;

use crate::api::{advance, attendance, leave, payroll};
use crate::config::Config;

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config) {
    cfg.service(
        web::scope(&config.api_prefix)
            .service(
                web::scope("/payroll")
                    // /payroll/payslips
                    .service(
                        web::resource("/payslips")
                            .route(web::post().to(payroll::calculate_payslip))
                            .route(web::get().to(payroll::list_payslips)),
                    )
                    // /payroll/payslips/{id}
                    .service(web::resource("/payslips/{id}").route(web::get().to(payroll::get_payslip)))
                    .service(
                        web::resource("/payslips/{id}/recalculate")
                            .route(web::post().to(payroll::recalculate_payslip)),
                    )
                    .service(
                        web::resource("/payslips/{id}/approve")
                            .route(web::post().to(payroll::approve_payslip)),
                    )
                    .service(
                        web::resource("/payslips/{id}/pay")
                            .route(web::post().to(payroll::mark_payslip_paid)),
                    )
                    .service(
                        web::resource("/payslips/{id}/reverse")
                            .route(web::post().to(payroll::reverse_payslip)),
                    )
                    // /payroll/batches
                    .service(web::resource("/batches").route(web::post().to(payroll::run_batch)))
                    .service(
                        web::resource("/batches/{run_id}/cancel")
                            .route(web::post().to(payroll::cancel_batch)),
                    )
                    .service(web::resource("/increases").route(web::post().to(payroll::apply_increases)))
                    .service(
                        web::resource("/components").route(web::get().to(payroll::active_components)),
                    ),
            )
            .service(
                web::scope("/attendance")
                    // /attendance/summaries
                    .service(web::resource("/summaries").route(web::get().to(attendance::get_summary)))
                    .service(
                        web::resource("/summaries/{id}/approve")
                            .route(web::post().to(attendance::approve_summary)),
                    )
                    .service(
                        web::resource("/summaries/{id}/recalculate")
                            .route(web::post().to(attendance::recalculate_summary)),
                    )
                    .service(
                        web::resource("/summaries/{id}/reset")
                            .route(web::post().to(attendance::reset_approval)),
                    ),
            )
            .service(
                web::scope("/leave")
                    .service(web::resource("/summaries").route(web::get().to(leave::get_summary)))
                    // /leave/{id}/approve
                    .service(web::resource("/{id}/approve").route(web::put().to(leave::approve_leave)))
                    // /leave/{id}/reject
                    .service(web::resource("/{id}/reject").route(web::put().to(leave::reject_leave))),
            )
            .service(
                web::scope("/advances")
                    .service(web::resource("").route(web::post().to(advance::create_advance)))
                    .service(
                        web::resource("/{id}/approve").route(web::post().to(advance::approve_advance)),
                    )
                    .service(
                        web::resource("/{id}/cancel").route(web::post().to(advance::cancel_advance)),
                    ),
            ),
    );
}
