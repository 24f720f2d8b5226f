// src/api/routes.rs
use actix_web::web;
use super::handlers;

pub fn configure_routes(cfg: &mut web::ServiceConfig, api_prefix: &str) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .route("/ws/{session_id}", web::get().to(handlers::ws_handler))
        .service(
            web::scope(api_prefix)
                .app_data(web::JsonConfig::default().error_handler(handlers::json_error))
                .app_data(web::FormConfig::default().error_handler(handlers::form_error))
                .app_data(web::QueryConfig::default().error_handler(handlers::query_error))
                .app_data(web::PathConfig::default().error_handler(handlers::path_error))
                .route("/token", web::post().to(handlers::login))
                .route("/run", web::post().to(handlers::run_code))
                .route("/run/batch", web::post().to(handlers::run_batch))
                .route("/jobs/{id}", web::get().to(handlers::get_job))
                .route("/history", web::get().to(handlers::get_history))
                .route("/languages", web::get().to(handlers::get_languages))
                .route("/upload", web::post().to(handlers::upload_files))
                .service(
                    web::scope("/projects")
                        .route("", web::get().to(handlers::list_projects))
                        .route("/{name}", web::get().to(handlers::get_project))
                )
        );
}
