//! HTTP surface: `POST /query`, `GET /health` and a `GET /` descriptor.

use crate::error::Result;
use crate::manager::AgentManager;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
}

pub fn router(manager: Arc<AgentManager>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/query", post(query))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

/// Bind `0.0.0.0:port` and serve until the process exits.
pub async fn serve(manager: Arc<AgentManager>, port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(
        port,
        agent = %manager.agent_name().await,
        "HTTP server listening"
    );
    axum::serve(listener, router(manager)).await?;
    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "SQL Server Analysis MCP",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Simple SQL Server analysis agent",
        "endpoints": {
            "query": "POST /query – Execute natural language query",
            "health": "GET /health – Health check"
        }
    }))
}

async fn health(State(manager): State<Arc<AgentManager>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "agent": manager.agent_name().await
    }))
}

async fn query(
    State(manager): State<Arc<AgentManager>>,
    Json(request): Json<QueryRequest>,
) -> Response {
    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match manager.run(&request.query, &session_id).await {
        Ok(output) => (
            StatusCode::OK,
            Json(QueryResponse {
                response: output.content,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "error in query endpoint");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": e.to_string() })),
            )
                .into_response()
        }
    }
}
