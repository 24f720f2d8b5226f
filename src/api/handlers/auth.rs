// src/api/handlers/auth.rs
use actix_web::error::{InternalError, JsonPayloadError, PathError, QueryPayloadError, UrlencodedError};
use actix_web::http::{header, StatusCode};
use actix_web::{web, Either, HttpRequest, HttpResponse, ResponseError, Result};
use serde::Deserialize;

use crate::api::AppState;
use crate::auth::{bearer_token, Session};
use crate::errors::CodeboxError;
use crate::models::ApiError;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Maps an error to `{"detail": ...}` with the matching status code.
pub fn error_response(e: &CodeboxError) -> HttpResponse {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        log::error!("Request failed: {}", e);
    }
    let mut builder = HttpResponse::build(status);
    if status == StatusCode::UNAUTHORIZED {
        builder.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
    }
    builder.json(ApiError { detail: e.to_string() })
}

/// Turns an extractor failure into the usual `{"detail": ...}` response.
fn payload_error<E: ResponseError + 'static>(err: E) -> actix_web::Error {
    let detail = if err.status_code() == StatusCode::PAYLOAD_TOO_LARGE {
        CodeboxError::PayloadTooLarge(err.to_string())
    } else {
        CodeboxError::InvalidBody(err.to_string())
    };
    log::debug!("Rejected request: {}", detail);
    let response = error_response(&detail);
    InternalError::from_response(err, response).into()
}

pub fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    payload_error(err)
}

pub fn form_error(err: UrlencodedError, _req: &HttpRequest) -> actix_web::Error {
    payload_error(err)
}

pub fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    payload_error(err)
}

pub fn path_error(err: PathError, _req: &HttpRequest) -> actix_web::Error {
    payload_error(err)
}

/// Resolves the caller's session, or the 401 response to send back.
pub async fn require_auth(req: &HttpRequest, state: &AppState) -> std::result::Result<Session, HttpResponse> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    state
        .tokens
        .authorize(bearer_token(header))
        .await
        .map_err(|e| error_response(&e))
}

/// POST /api/token - accepts a form or a JSON body
pub async fn login(
    state: web::Data<AppState>,
    body: Either<web::Form<LoginRequest>, web::Json<LoginRequest>>,
) -> Result<HttpResponse> {
    let credentials = match body {
        Either::Left(form) => form.into_inner(),
        Either::Right(json) => json.into_inner(),
    };

    match state.tokens.login(&credentials.username, &credentials.password).await {
        Ok(token) => Ok(HttpResponse::Ok().json(token)),
        Err(e) => Ok(error_response(&e)),
    }
}
