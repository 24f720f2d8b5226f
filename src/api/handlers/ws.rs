// src/api/handlers/ws.rs
use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web::http::header;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::handlers::error_response;
use crate::api::AppState;
use crate::auth::bearer_token;
use crate::models::ExecutionRequest;
use crate::runner;

/// Server to client frame. Serialized as `{"type": ..., ...}`.
#[derive(Message, Clone, Debug, Serialize, Deserialize, PartialEq)]
#[rtype(result = "()")]
pub struct WsMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl WsMessage {
    pub fn status(status: &str, message: impl Into<String>) -> Self {
        Self {
            kind: "status".to_string(),
            status: Some(status.to_string()),
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn pong() -> Self {
        Self {
            kind: "pong".to_string(),
            status: None,
            message: Some("pong".to_string()),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            status: None,
            message: Some(message.into()),
            data: None,
        }
    }

    pub fn result(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: "result".to_string(),
            status: None,
            message: Some(message.into()),
            data: Some(data),
        }
    }

    pub fn job(status: &str, data: serde_json::Value) -> Self {
        Self {
            kind: "job".to_string(),
            status: Some(status.to_string()),
            message: None,
            data: Some(data),
        }
    }
}

/// Client to server frame.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    Execute(ExecutionRequest),
}

/// Live websocket sessions, one connection per session id (last one wins).
#[derive(Clone, Default)]
pub struct SessionHub {
    sessions: Arc<RwLock<HashMap<String, Addr<WsSession>>>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session_id: &str, addr: Addr<WsSession>) {
        let mut sessions = self.sessions.write().await;
        if sessions.insert(session_id.to_string(), addr).is_some() {
            log::info!("WebSocket session {} replaced by a new connection", session_id);
        } else {
            log::info!("WebSocket connected: {}", session_id);
        }
    }

    /// Drops the session only if `addr` is still the registered connection.
    pub async fn unregister(&self, session_id: &str, addr: &Addr<WsSession>) {
        let mut sessions = self.sessions.write().await;
        if sessions.get(session_id) == Some(addr) {
            sessions.remove(session_id);
            log::info!("WebSocket disconnected: {}", session_id);
        }
    }

    pub async fn send(&self, session_id: &str, msg: WsMessage) {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(addr) => addr.do_send(msg),
            None => log::debug!("No WebSocket session {}", session_id),
        }
    }

    pub async fn broadcast(&self, msg: WsMessage) {
        let sessions = self.sessions.read().await;
        for addr in sessions.values() {
            addr.do_send(msg.clone());
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

pub struct WsSession {
    session_id: String,
    state: AppState,
}

impl WsSession {
    pub fn new(session_id: String, state: AppState) -> Self {
        Self { session_id, state }
    }

    fn execute(&self, request: ExecutionRequest, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.address().do_send(WsMessage::status("running", "Executing code..."));

        let addr = ctx.address();
        let state = self.state.clone();
        actix::spawn(async move {
            let reply = match runner::run_job(&state, request).await {
                Ok(job) => match serde_json::to_value(&job.result) {
                    Ok(mut data) => {
                        if let Some(obj) = data.as_object_mut() {
                            obj.insert("job_id".to_string(), serde_json::Value::String(job.id.clone()));
                        }
                        WsMessage::result("Execution completed", data)
                    }
                    Err(e) => WsMessage::error(e.to_string()),
                },
                Err(e) => WsMessage::error(e.to_string()),
            };
            addr.do_send(reply);
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let hub = self.state.hub.clone();
        let session_id = self.session_id.clone();
        actix::spawn(async move {
            hub.register(&session_id, addr).await;
        });
        ctx.address().do_send(WsMessage::status("connected", "Connected to codebox"));
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        let hub = self.state.hub.clone();
        let session_id = self.session_id.clone();
        actix::spawn(async move {
            hub.unregister(&session_id, &addr).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => ctx.address().do_send(WsMessage::pong()),
                Ok(ClientMessage::Execute(request)) => self.execute(request, ctx),
                Err(e) => ctx.address().do_send(WsMessage::error(format!("Invalid message: {}", e))),
            },
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                log::error!("WebSocket error for {}: {}", self.session_id, e);
                ctx.stop();
            }
            _ => (),
        }
    }
}

impl Handler<WsMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: WsMessage, ctx: &mut Self::Context) {
        if let Ok(json) = serde_json::to_string(&msg) {
            ctx.text(json);
        }
    }
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a websocket handshake, so the token may
/// also come as `?token=`.
fn handshake_token(req: &HttpRequest) -> Option<String> {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    bearer_token(header).map(str::to_string).or_else(|| {
        web::Query::<WsQuery>::from_query(req.query_string())
            .ok()
            .and_then(|q| q.into_inner().token)
    })
}

pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let session_id = path.into_inner();
    if let Err(e) = state.tokens.authorize(handshake_token(&req).as_deref()).await {
        log::warn!("Rejected WebSocket connection for {}: {}", session_id, e);
        return Ok(error_response(&e));
    }

    let session = WsSession::new(session_id, state.get_ref().clone());
    ws::start(session, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_parse() {
        assert!(matches!(serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"execute","code":"print(1)","project_name":"demo"}"#).unwrap();
        match msg {
            ClientMessage::Execute(req) => {
                assert_eq!(req.code, "print(1)");
                assert_eq!(req.language, "python");
                assert_eq!(req.project_name, "demo");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"execute"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_server_messages_skip_empty_fields() {
        let json = serde_json::to_value(WsMessage::pong()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pong", "message": "pong"}));
    }
}
