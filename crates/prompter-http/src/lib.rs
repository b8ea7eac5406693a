//! Callback messenger over HTTP: a small axum app whose `/chat` handler
//! runs one turn and answers once the context is fully persisted.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use prompter_core::{Attachment, Message};
use prompter_engine::{MessengerInterface, Pipeline};

pub const INTERFACE_NAME: &str = "http";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub dialog_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub dialog_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChatResponse {
    fn from_message(dialog_id: String, message: Message) -> Self {
        Self {
            dialog_id,
            text: message.text,
            attachments: message.attachments,
        }
    }
}

/// Build the app router; exposed separately so embedders can mount it
/// under their own server.
pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn chat(
    State(pipeline): State<Arc<Pipeline>>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    match pipeline
        .run_turn_as(Some(INTERFACE_NAME), Message::text(body.text), &body.dialog_id)
        .await
    {
        Ok(response) => Ok(Json(ChatResponse::from_message(body.dialog_id, response))),
        Err(err) => {
            error!(dialog_id = %body.dialog_id, error = %err, "turn failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub struct HttpInterface {
    bind: String,
    port: u16,
}

impl HttpInterface {
    pub fn new(bind: impl Into<String>, port: u16) -> Self {
        Self {
            bind: bind.into(),
            port,
        }
    }
}

#[async_trait]
impl MessengerInterface for HttpInterface {
    fn name(&self) -> &str {
        INTERFACE_NAME
    }

    async fn connect(&self, pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
        let router = build_router(pipeline);
        let addr: SocketAddr = format!("{}:{}", self.bind, self.port).parse()?;
        info!("dialog HTTP interface listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_parses() {
        let body: ChatRequest =
            serde_json::from_str(r#"{"dialog_id":"alice","text":"hi"}"#).unwrap();
        assert_eq!(body.dialog_id, "alice");
        assert_eq!(body.text, "hi");
    }

    #[test]
    fn chat_response_omits_empty_fields() {
        let response = ChatResponse::from_message("alice".into(), Message::text("hello"));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"dialog_id":"alice","text":"hello"}"#);
    }

    #[test]
    fn chat_response_carries_attachments() {
        let message = Message {
            attachments: vec![Attachment::Location {
                longitude: 1.0,
                latitude: 2.0,
            }],
            ..Message::default()
        };
        let response = ChatResponse::from_message("bob".into(), message);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains(r#""type":"location""#));
        assert!(!json.contains(r#""text""#));
    }
}
