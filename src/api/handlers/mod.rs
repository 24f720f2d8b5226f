// src/api/handlers/mod.rs
mod auth;
mod execution;
mod health;
mod projects;
pub mod ws;

pub use auth::{error_response, form_error, json_error, login, path_error, query_error, require_auth};
pub use execution::{get_history, get_job, get_languages, run_batch, run_code};
pub use health::health_check;
pub use projects::{get_project, list_projects, upload_files};
pub use ws::{ws_handler, SessionHub, WsMessage};
