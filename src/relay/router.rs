//! # relay 路由
//!
//! 每个上游协议族一组入口：
//! - `POST /v1/messages` → claude
//! - `POST /responses` → codex
//! - `POST /gemini/v1beta/{*rest}`、`POST /gemini/v1/{*rest}` → gemini
//!
//! 另有 `GET /ping`、`GET /api/queue/stats`、`GET /api/logs` 三个本地查询接口。

use axum::extract::{DefaultBodyLimit, Path, Query, RawQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::ops::Deref;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::executor::RelayRequest;
use crate::app::AppContext;
use crate::database::{RequestLogQuery, list_request_logs};
use crate::logging::{LogComponent, LogStage};
use crate::provider::Platform;
use crate::provider::model_mapping::requested_model_from_path;
use crate::{lerror, linfo};

/// 路由共享状态
#[derive(Clone)]
pub struct RelayState {
    context: Arc<AppContext>,
}

impl RelayState {
    #[must_use]
    pub const fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

impl Deref for RelayState {
    type Target = AppContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

/// 创建 relay 路由
pub fn create_router(context: Arc<AppContext>) -> Router {
    let body_limit = context.config.relay.max_body_bytes;
    Router::new()
        .route("/v1/messages", post(relay_claude))
        .route("/responses", post(relay_codex))
        .route("/gemini/v1beta/{*rest}", post(relay_gemini_v1beta))
        .route("/gemini/v1/{*rest}", post(relay_gemini_v1))
        .route("/ping", get(ping))
        .route("/api/queue/stats", get(queue_stats))
        .route("/api/logs", get(request_logs))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(RelayState::new(context))
}

/// 请求体中决定路由的字段；解析失败时按空模型、非流式处理
#[derive(Debug, Default, Deserialize)]
struct RequestSummary {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stream: Option<bool>,
}

impl RequestSummary {
    fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

async fn relay_body_protocol(
    state: &RelayState,
    platform: Platform,
    endpoint: &str,
    headers: HeaderMap,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let request_id = new_request_id();
    let summary = RequestSummary::parse(&body);
    let request = RelayRequest {
        request_id,
        platform,
        endpoint: endpoint.to_string(),
        headers,
        query,
        requested_model: summary.model.unwrap_or_default(),
        is_stream: summary.stream.unwrap_or(false),
        body,
    };
    log_request_start(&request);
    state.executor.execute(request).await
}

async fn relay_claude(
    State(state): State<RelayState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay_body_protocol(&state, Platform::Claude, "/v1/messages", headers, query, body).await
}

async fn relay_codex(
    State(state): State<RelayState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay_body_protocol(&state, Platform::Codex, "/responses", headers, query, body).await
}

async fn relay_gemini(
    state: &RelayState,
    version: &str,
    rest: &str,
    headers: HeaderMap,
    query: Option<String>,
    body: Bytes,
) -> Response {
    let endpoint = format!("/{version}/{}", rest.trim_start_matches('/'));
    let is_stream = endpoint.contains(":streamGenerateContent")
        || query.as_deref().is_some_and(|q| q.contains("alt=sse"));
    let requested_model = requested_model_from_path(&endpoint)
        .unwrap_or_default()
        .to_string();

    let request = RelayRequest {
        request_id: new_request_id(),
        platform: Platform::Gemini,
        endpoint,
        headers,
        query,
        body,
        requested_model,
        is_stream,
    };
    log_request_start(&request);
    state.executor.execute(request).await
}

async fn relay_gemini_v1beta(
    State(state): State<RelayState>,
    Path(rest): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay_gemini(&state, "v1beta", &rest, headers, query, body).await
}

async fn relay_gemini_v1(
    State(state): State<RelayState>,
    Path(rest): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay_gemini(&state, "v1", &rest, headers, query, body).await
}

fn log_request_start(request: &RelayRequest) {
    linfo!(
        &request.request_id,
        LogStage::RequestStart,
        LogComponent::Router,
        "request_received",
        &format!("收到 {} 请求: {}", request.platform, request.endpoint),
        model = request.requested_model,
        stream = request.is_stream,
        body_bytes = request.body.len()
    );
}

async fn ping() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn queue_stats(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.queues.stats())
}

async fn request_logs(
    State(state): State<RelayState>,
    Query(query): Query<RequestLogQuery>,
) -> Response {
    match list_request_logs(&state.db, &query).await {
        Ok(logs) => Json(logs).into_response(),
        Err(err) => {
            lerror!(
                "system",
                LogStage::Db,
                LogComponent::Router,
                "list_request_logs_failed",
                &format!("查询请求日志失败: {err}")
            );
            err.into_response()
        }
    }
}
