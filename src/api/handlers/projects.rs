// src/api/handlers/projects.rs
use actix_web::{web, HttpRequest, HttpResponse, Result};
use serde::{Deserialize, Serialize};

use crate::api::handlers::{error_response, require_auth};
use crate::api::AppState;
use crate::errors::CodeboxError;
use crate::models::{ProjectSummary, UploadFile, UploadedFile};
use crate::workspace;

#[derive(Deserialize)]
pub struct UploadRequest {
    pub project_name: String,
    pub files: Vec<UploadFile>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub files: Vec<UploadedFile>,
}

#[derive(Serialize)]
pub struct ProjectsResponse {
    pub projects: Vec<ProjectSummary>,
}

/// Runs filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> std::result::Result<T, CodeboxError>
where
    F: FnOnce() -> std::result::Result<T, CodeboxError> + Send + 'static,
    T: Send + 'static,
{
    web::block(f)
        .await
        .map_err(|e| CodeboxError::Io(std::io::Error::other(e.to_string())))?
}

/// POST /api/upload - write files into a project workspace
pub async fn upload_files(
    http: HttpRequest,
    state: web::Data<AppState>,
    req: web::Json<UploadRequest>,
) -> Result<HttpResponse> {
    if let Err(denied) = require_auth(&http, &state).await {
        return Ok(denied);
    }

    let UploadRequest { project_name, files } = req.into_inner();
    let root = state.config.workspace_dir.clone();
    let limit = state.config.max_workspace_size_mb;
    let project = project_name.clone();

    match blocking(move || workspace::save_files(&root, &project, &files, limit)).await {
        Ok(saved) => {
            log::info!("Uploaded {} files to project {}", saved.len(), project_name);
            Ok(HttpResponse::Ok().json(UploadResponse {
                success: true,
                message: format!("Uploaded {} files", saved.len()),
                files: saved,
            }))
        }
        Err(e) => Ok(error_response(&e)),
    }
}

/// GET /api/projects
pub async fn list_projects(http: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    if let Err(denied) = require_auth(&http, &state).await {
        return Ok(denied);
    }

    let root = state.config.workspace_dir.clone();
    match blocking(move || workspace::list_projects(&root)).await {
        Ok(projects) => Ok(HttpResponse::Ok().json(ProjectsResponse { projects })),
        Err(e) => Ok(error_response(&e)),
    }
}

/// GET /api/projects/{name}
pub async fn get_project(
    http: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    if let Err(denied) = require_auth(&http, &state).await {
        return Ok(denied);
    }

    let name = path.into_inner();
    let root = state.config.workspace_dir.clone();
    match blocking(move || workspace::project_info(&root, &name)).await {
        Ok(info) => Ok(HttpResponse::Ok().json(info)),
        Err(e) => Ok(error_response(&e)),
    }
}
