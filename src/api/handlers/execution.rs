// src/api/handlers/execution.rs
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::handlers::{error_response, require_auth};
use crate::api::AppState;
use crate::errors::CodeboxError;
use crate::models::{ExecutionRequest, ExecutionResult, JobStatus};
use crate::runner;
use crate::sandbox::LanguageSpec;

#[derive(Serialize)]
pub struct RunResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

/// POST /api/run - execute code in the sandbox
pub async fn run_code(
    http: HttpRequest,
    state: web::Data<AppState>,
    req: web::Json<ExecutionRequest>,
) -> Result<HttpResponse> {
    if let Err(denied) = require_auth(&http, &state).await {
        return Ok(denied);
    }

    let request = req.into_inner();
    log::info!("Executing {} code for: {}", request.language, request.project_name);

    match runner::run_job(&state, request).await {
        Ok(job) => match job.result {
            Some(result) => Ok(HttpResponse::Ok().json(RunResponse {
                job_id: job.id,
                status: job.status,
                result,
            })),
            None => Ok(HttpResponse::InternalServerError().json(json!({
                "job_id": job.id,
                "detail": job.error.unwrap_or_else(|| "Execution failed".to_string())
            }))),
        },
        Err(e) => Ok(error_response(&e)),
    }
}

/// POST /api/run/batch - execute several submissions concurrently
pub async fn run_batch(
    http: HttpRequest,
    state: web::Data<AppState>,
    req: web::Json<Vec<ExecutionRequest>>,
) -> Result<HttpResponse> {
    if let Err(denied) = require_auth(&http, &state).await {
        return Ok(denied);
    }

    match runner::run_batch(&state, req.into_inner()).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome)),
        Err(e) => Ok(error_response(&e)),
    }
}

/// GET /api/jobs/{id} - live job first, then persisted history
pub async fn get_job(
    http: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    if let Err(denied) = require_auth(&http, &state).await {
        return Ok(denied);
    }

    let job_id = path.into_inner();
    if let Some(job) = state.jobs.get(&job_id).await {
        return Ok(HttpResponse::Ok().json(job));
    }

    if let Some(pool) = state.db_pool.as_ref() {
        match crate::database::get_execution(pool, &job_id).await {
            Ok(Some(entry)) => return Ok(HttpResponse::Ok().json(entry)),
            Ok(None) => {}
            Err(e) => return Ok(error_response(&CodeboxError::Database(e))),
        }
    }

    Ok(error_response(&CodeboxError::JobNotFound(job_id)))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub results: Vec<crate::database::HistoryEntry>,
}

/// GET /api/history - persisted executions, newest first
pub async fn get_history(
    http: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse> {
    if let Err(denied) = require_auth(&http, &state).await {
        return Ok(denied);
    }

    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    match state.db_pool.as_ref() {
        Some(pool) => match crate::database::get_all_executions(pool, limit).await {
            Ok(results) => Ok(HttpResponse::Ok().json(HistoryResponse { results })),
            Err(e) => Ok(error_response(&CodeboxError::Database(e))),
        },
        None => Ok(HttpResponse::Ok().json(HistoryResponse { results: vec![] })),
    }
}

#[derive(Serialize)]
pub struct LanguagesResponse<'a> {
    pub backend: &'static str,
    pub max_execution_time: u64,
    pub languages: &'a std::collections::BTreeMap<String, LanguageSpec>,
}

/// GET /api/languages
pub async fn get_languages(http: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    if let Err(denied) = require_auth(&http, &state).await {
        return Ok(denied);
    }

    Ok(HttpResponse::Ok().json(LanguagesResponse {
        backend: state.sandbox.backend_name(),
        max_execution_time: state.sandbox.config().max_execution_time,
        languages: state.sandbox.languages().entries(),
    }))
}
