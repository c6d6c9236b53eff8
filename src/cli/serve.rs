//! `llm-catcher serve`: demo server with the diagnosis middleware
//!
//! Routes:
//! - `POST /greet`: typed body, validated; schemas declared for diagnosis
//! - `POST /echo`: echoes any JSON body
//! - `GET /divide/:a/:b`: panics on a zero divisor
//! - `GET /health`: outside the diagnosis layer

use anyhow::{Context, Result};
use axum::{
    extract::Path,
    routing::{get, post},
    Json, Router,
};
use catcher_core::{Diagnoser, Fault, FaultKind};
use llm_catcher::{DiagnoseLayer, RouteSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

const MAX_NAME_LEN: usize = 50;

#[derive(Debug, Deserialize)]
struct GreetRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct GreetResponse {
    message: String,
}

pub async fn run(port: u16) -> Result<()> {
    let diagnoser = Arc::new(Diagnoser::from_env().context("Failed to initialize diagnoser")?);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Demo server listening on http://{addr}");

    axum::serve(listener, app(diagnoser)).await?;
    Ok(())
}

fn app(diagnoser: Arc<Diagnoser>) -> Router {
    let diagnosis = DiagnoseLayer::new(diagnoser).with_route_schema(
        "/greet",
        RouteSchema::new()
            .with_request(greet_request_schema())
            .with_response(greet_response_schema()),
    );

    Router::new()
        .route("/greet", post(greet))
        .route("/echo", post(echo))
        .route("/divide/:a/:b", get(divide))
        .route_layer(diagnosis)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

fn greet_request_schema() -> Value {
    json!({
        "type": "object",
        "required": ["name"],
        "properties": {
            "name": {"type": "string", "minLength": 1, "maxLength": MAX_NAME_LEN}
        }
    })
}

fn greet_response_schema() -> Value {
    json!({
        "type": "object",
        "required": ["message"],
        "properties": {"message": {"type": "string"}}
    })
}

async fn greet(Json(body): Json<Value>) -> Result<Json<GreetResponse>, Fault> {
    let request: GreetRequest = serde_json::from_value(body)?;
    let name = request.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(Fault::new(
            FaultKind::InvalidInput,
            format!("name must be between 1 and {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(Json(GreetResponse {
        message: format!("Hello, {name}!"),
    }))
}

async fn echo(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

async fn divide(Path((a, b)): Path<(i64, i64)>) -> Json<Value> {
    Json(json!({ "result": a / b }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
