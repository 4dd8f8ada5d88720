//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::health::{Health, WorkerInfo};
use crate::service::{HealthSnapshot, ToolService};
use crate::stats::StatsSnapshot;
use crate::tool_bridge::BridgeError;
use crate::version::VersionInfo;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: Health,
    pub worker: WorkerInfo,
    pub stats: StatsSnapshot,
    pub version: VersionInfo,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: snapshot.state,
            worker: snapshot.worker,
            stats: snapshot.stats,
            version: snapshot.version,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn bridge_error_status(error: &BridgeError) -> StatusCode {
    match error {
        BridgeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        BridgeError::Worker { .. } | BridgeError::Decode(_) => StatusCode::BAD_GATEWAY,
        BridgeError::Saturated | BridgeError::Closed => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bridge_error_response(error: &BridgeError) -> Response {
    error_response(bridge_error_status(error), error.message())
}

async fn health_check(State(service): State<Arc<ToolService>>) -> Json<HealthCheckResponse> {
    Json(service.health().into())
}

async fn list_tools(State(service): State<Arc<ToolService>>) -> Response {
    match service.list_tools().await {
        Ok(tools) => Json(serde_json::json!({ "tools": tools })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "list_tools failed");
            bridge_error_response(&e)
        }
    }
}

async fn call_tool(
    State(service): State<Arc<ToolService>>,
    Path(name): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let arguments = match body {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => {
            return error_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                "tool arguments must be a JSON object",
            );
        }
    };

    match service.invoke(&name, arguments).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => {
            tracing::warn!(tool = %name, error = %e, "Tool call failed");
            bridge_error_response(&e)
        }
    }
}

pub fn routes(service: Arc<ToolService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/tools", get(list_tools))
        .route("/tools/{name}", post(call_tool))
        .with_state(service)
}
