//! # 故障转移执行器
//!
//! - 严格模式（启用分级拉黑）：只尝试最高优先级的第一个候选，失败直接返回 502，
//!   由熔断服务在后续请求中把流量切到下一个 provider。
//! - 降级模式：按 level 升序、组内按配置顺序逐个尝试，首个成功即返回。
//!
//! 模型映射失败或 provider 地址/密钥无法组成请求的候选直接跳过，
//! 不计入尝试次数，也不上报熔断服务。

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::forwarder::{
    Forwarder, Outcome, UpstreamRequest, UpstreamResponse, classify_outcome, is_event_stream,
    response_headers,
};
use super::selector::{CandidatePlan, SkippedProvider, select_candidates};
use crate::breaker::CircuitBreaker;
use crate::logging::{LogComponent, LogStage};
use crate::provider::{
    MappingError, Platform, Provider, ProviderStore, effective_model, rewrite_body,
    rewrite_path_model,
};
use crate::telemetry::{AttemptGuard, ObservedBody, TelemetryRecorder, UsageObserver};
use crate::{lerror, linfo, lwarn};

/// 失败响应体最多读取的字节数
const ERROR_SNIPPET_BYTES: usize = 512;
const ERROR_SNIPPET_TIMEOUT: Duration = Duration::from_secs(5);

const STRICT_MODE_HINT: &str = "拉黑模式已开启，不自动降级。如需自动降级请关闭拉黑功能";

/// 一次入站请求
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub request_id: String,
    pub platform: Platform,
    /// 发往上游的协议路径，gemini 为 `/v1beta/models/{model}:{method}` 形式
    pub endpoint: String,
    pub headers: HeaderMap,
    pub query: Option<String>,
    pub body: Bytes,
    /// 客户端请求的模型，可能为空
    pub requested_model: String,
    pub is_stream: bool,
}

/// 一次失败的上游调用
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub provider: String,
    pub level: i32,
    #[serde(serialize_with = "serialize_duration")]
    pub duration: Duration,
    pub error: String,
    #[serde(skip)]
    pub outcome: Outcome,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_duration<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_duration(*duration))
}

fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

enum AttemptResult {
    Success(Response),
    Failed(AttemptFailure),
    /// 本地准备请求失败，未发出请求
    Skipped(String),
}

/// 候选在本地就被排除的原因：不计入尝试次数，也不上报熔断服务
#[derive(Debug, Error)]
enum PrepareError {
    #[error("模型映射失败: {0}")]
    Mapping(#[from] MappingError),

    /// 地址或密钥无法组成合法请求
    #[error("provider 配置错误: {0}")]
    Configuration(String),
}

impl PrepareError {
    const fn operation(&self) -> &'static str {
        match self {
            Self::Mapping(_) => "model_rewrite_failed",
            Self::Configuration(_) => "build_request_failed",
        }
    }
}

/// 返回给客户端的 relay 失败
#[derive(Debug)]
pub enum RelayFailure {
    NoEligibleProvider {
        model: String,
        skipped: Vec<SkippedProvider>,
    },
    Strict(AttemptFailure),
    Exhausted {
        attempts: Vec<AttemptFailure>,
        last_error: String,
    },
}

impl IntoResponse for RelayFailure {
    fn into_response(self) -> Response {
        match self {
            Self::NoEligibleProvider { model, skipped } => {
                let error = if model.is_empty() {
                    "no providers available".to_string()
                } else {
                    format!(
                        "没有可用的 provider 支持模型 '{model}'（已跳过 {} 个不兼容的 provider）",
                        skipped.len()
                    )
                };
                let body = json!({
                    "error": error,
                    "model": model,
                    "skipped": skipped.len(),
                    "skipped_providers": skipped,
                });
                (StatusCode::NOT_FOUND, Json(body)).into_response()
            }
            Self::Strict(failure) => {
                let body = json!({
                    "error": format!("Provider {} 请求失败: {}", failure.provider, failure.error),
                    "provider": failure.provider,
                    "level": failure.level,
                    "duration": format_duration(failure.duration),
                    "mode": "strict",
                    "hint": STRICT_MODE_HINT,
                });
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
            Self::Exhausted {
                attempts,
                last_error,
            } => {
                let last = attempts.last();
                let body = json!({
                    "error": format!(
                        "所有 {} 个 provider 均失败，最后错误: {last_error}",
                        attempts.len()
                    ),
                    "total_attempts": attempts.len(),
                    "last_provider": last.map_or("", |a| a.provider.as_str()),
                    "last_duration": last.map_or_else(String::new, |a| format_duration(a.duration)),
                    "attempts": attempts,
                });
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
        }
    }
}

/// 故障转移执行器
#[derive(Clone)]
pub struct FailoverExecutor {
    store: Arc<dyn ProviderStore>,
    breaker: Arc<dyn CircuitBreaker>,
    forwarder: Forwarder,
    recorder: TelemetryRecorder,
}

impl FailoverExecutor {
    #[must_use]
    pub fn new(
        store: Arc<dyn ProviderStore>,
        breaker: Arc<dyn CircuitBreaker>,
        forwarder: Forwarder,
        recorder: TelemetryRecorder,
    ) -> Self {
        Self {
            store,
            breaker,
            forwarder,
            recorder,
        }
    }

    /// 处理一次入站请求并生成客户端响应
    pub async fn execute(&self, request: RelayRequest) -> Response {
        let providers = match self.store.load_providers(request.platform).await {
            Ok(providers) => providers,
            Err(err) => {
                lerror!(
                    &request.request_id,
                    LogStage::Routing,
                    LogComponent::Executor,
                    "load_providers_failed",
                    &format!("加载 provider 失败: {err}"),
                    platform = request.platform.as_str()
                );
                return err.into_response();
            }
        };

        let plan = select_candidates(
            &request.request_id,
            request.platform,
            providers,
            &request.requested_model,
            self.breaker.as_ref(),
        )
        .await;

        if plan.is_empty() {
            lwarn!(
                &request.request_id,
                LogStage::Routing,
                LogComponent::Executor,
                "no_eligible_provider",
                "没有可用的 provider",
                model = request.requested_model,
                skipped = plan.skipped.len()
            );
            return RelayFailure::NoEligibleProvider {
                model: request.requested_model.clone(),
                skipped: plan.skipped,
            }
            .into_response();
        }

        let result = if self.breaker.is_level_blacklist_enabled() {
            self.run_strict(&request, &plan).await
        } else {
            self.run_degrade(&request, &plan).await
        };
        result.unwrap_or_else(IntoResponse::into_response)
    }

    async fn run_strict(
        &self,
        request: &RelayRequest,
        plan: &CandidatePlan,
    ) -> Result<Response, RelayFailure> {
        linfo!(
            &request.request_id,
            LogStage::Routing,
            LogComponent::Executor,
            "strict_mode",
            "拉黑模式已开启，禁用自动降级"
        );

        let mut last_skip = String::new();
        for (level, provider) in plan.candidates() {
            match self.attempt(request, level, provider).await {
                AttemptResult::Success(response) => return Ok(response),
                AttemptResult::Failed(failure) => return Err(RelayFailure::Strict(failure)),
                AttemptResult::Skipped(reason) => last_skip = reason,
            }
        }

        Err(RelayFailure::Exhausted {
            attempts: Vec::new(),
            last_error: last_skip,
        })
    }

    async fn run_degrade(
        &self,
        request: &RelayRequest,
        plan: &CandidatePlan,
    ) -> Result<Response, RelayFailure> {
        let mut attempts: Vec<AttemptFailure> = Vec::new();
        let mut last_error = String::new();

        for group in &plan.levels {
            linfo!(
                &request.request_id,
                LogStage::Routing,
                LogComponent::Executor,
                "try_level",
                &format!("尝试 Level {}（{} 个 provider）", group.level, group.providers.len())
            );
            for provider in &group.providers {
                match self.attempt(request, group.level, provider).await {
                    AttemptResult::Success(response) => return Ok(response),
                    AttemptResult::Failed(failure) => {
                        last_error.clone_from(&failure.error);
                        attempts.push(failure);
                    }
                    AttemptResult::Skipped(reason) => last_error = reason,
                }
            }
        }

        lerror!(
            &request.request_id,
            LogStage::ResponseFailure,
            LogComponent::Executor,
            "all_providers_failed",
            &format!("所有 {} 个 provider 均失败，最后错误: {last_error}", attempts.len())
        );
        Err(RelayFailure::Exhausted {
            attempts,
            last_error,
        })
    }

    /// 按候选改写模型后的路径与请求体
    fn rewrite_model(
        request: &RelayRequest,
        effective: &str,
    ) -> Result<(String, Bytes), MappingError> {
        if request.requested_model.is_empty() || effective == request.requested_model {
            return Ok((request.endpoint.clone(), request.body.clone()));
        }
        match request.platform {
            Platform::Gemini => Ok((
                rewrite_path_model(&request.endpoint, effective)?,
                request.body.clone(),
            )),
            Platform::Claude | Platform::Codex => Ok((
                request.endpoint.clone(),
                rewrite_body(&request.body, effective)?,
            )),
        }
    }

    /// 在本地组装发往该候选的请求，失败时不会产生任何上游流量
    fn prepare(
        request: &RelayRequest,
        provider: &Provider,
        effective: &str,
    ) -> Result<UpstreamRequest, PrepareError> {
        let (endpoint, body) = Self::rewrite_model(request, effective)?;
        Forwarder::build_request(
            request.platform,
            provider,
            &endpoint,
            &request.headers,
            request.query.as_deref(),
            body,
        )
        .map_err(|err| PrepareError::Configuration(err.to_string()))
    }

    async fn attempt(&self, request: &RelayRequest, level: i32, provider: &Provider) -> AttemptResult {
        let request_id = request.request_id.as_str();
        let effective = effective_model(provider, &request.requested_model);

        let upstream_request = match Self::prepare(request, provider, &effective) {
            Ok(prepared) => prepared,
            Err(err) => {
                lwarn!(
                    request_id,
                    LogStage::RequestModify,
                    LogComponent::Executor,
                    err.operation(),
                    &format!("跳过 provider {}: {err}", provider.name),
                    model = effective
                );
                return AttemptResult::Skipped(err.to_string());
            }
        };
        if effective != request.requested_model && !request.requested_model.is_empty() {
            linfo!(
                request_id,
                LogStage::RequestModify,
                LogComponent::ModelMapper,
                "model_mapped",
                &format!(
                    "Provider {} 映射模型: {} -> {effective}",
                    provider.name, request.requested_model
                )
            );
        }

        let mut guard = self.recorder.begin(
            request_id,
            request.platform,
            &effective,
            &provider.name,
            request.is_stream,
        );

        let result = self
            .forwarder
            .forward(request_id, &provider.name, upstream_request)
            .await;

        match result {
            Ok(response) => {
                let status = response.status.as_u16();
                guard.set_status(status);
                if classify_outcome(status, None, true) == Outcome::Success {
                    linfo!(
                        request_id,
                        LogStage::Response,
                        LogComponent::Executor,
                        "provider_succeeded",
                        &format!("✓ 成功: {} (Level {level})", provider.name),
                        status = status,
                        elapsed_ms = guard.elapsed().as_millis()
                    );
                    self.report_success(request, &provider.name).await;
                    return AttemptResult::Success(Self::relay_response(request, response, guard));
                }

                let duration = guard.elapsed();
                drop(guard);
                let snippet = tokio::time::timeout(
                    ERROR_SNIPPET_TIMEOUT,
                    response.read_snippet(ERROR_SNIPPET_BYTES),
                )
                .await
                .unwrap_or_default();
                let failure = AttemptFailure {
                    provider: provider.name.clone(),
                    level,
                    duration,
                    error: format!("upstream status {status}"),
                    outcome: Outcome::UpstreamFailure,
                };
                lwarn!(
                    request_id,
                    LogStage::ResponseFailure,
                    LogComponent::Executor,
                    "provider_failed",
                    &format!("✗ 失败: {} | {}", provider.name, failure.error),
                    level = level,
                    body = snippet
                );
                self.report_failure(request, &failure).await;
                AttemptResult::Failed(failure)
            }
            Err(err) => {
                let message = err.to_string();
                let outcome = classify_outcome(0, Some(&message), err.exchange_started());
                let failure = AttemptFailure {
                    provider: provider.name.clone(),
                    level,
                    duration: guard.elapsed(),
                    error: message,
                    outcome,
                };
                drop(guard);
                lwarn!(
                    request_id,
                    LogStage::ResponseFailure,
                    LogComponent::Executor,
                    "provider_failed",
                    &format!("✗ 失败: {} | {}", provider.name, failure.error),
                    level = level,
                    outcome = outcome
                );
                self.report_failure(request, &failure).await;
                AttemptResult::Failed(failure)
            }
        }
    }

    fn relay_response(
        request: &RelayRequest,
        upstream: UpstreamResponse,
        guard: AttemptGuard,
    ) -> Response {
        let event_stream = request.is_stream || is_event_stream(&upstream.headers);
        let observer = UsageObserver::new(request.platform, event_stream);
        let body = ObservedBody::new(upstream.body, observer, guard, &request.request_id);

        let mut response = Response::new(Body::from_stream(body));
        *response.status_mut() = upstream.status;
        *response.headers_mut() = response_headers(&upstream.headers);
        response
    }

    async fn report_success(&self, request: &RelayRequest, provider: &str) {
        if let Err(err) = self.breaker.record_success(request.platform, provider).await {
            lwarn!(
                &request.request_id,
                LogStage::Response,
                LogComponent::Breaker,
                "record_success_failed",
                &format!("清零失败计数失败: {err}"),
                provider = provider
            );
        }
    }

    async fn report_failure(&self, request: &RelayRequest, failure: &AttemptFailure) {
        if failure.outcome == Outcome::ClientAbort {
            linfo!(
                &request.request_id,
                LogStage::ResponseFailure,
                LogComponent::Executor,
                "client_abort",
                &format!("客户端中断，跳过失败计数: {}", failure.provider)
            );
            return;
        }
        if let Err(err) = self
            .breaker
            .record_failure(request.platform, &failure.provider)
            .await
        {
            lerror!(
                &request.request_id,
                LogStage::ResponseFailure,
                LogComponent::Breaker,
                "record_failure_failed",
                &format!("记录失败到黑名单失败: {err}"),
                provider = failure.provider
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BlacklistStatus;
    use crate::error::Result;
    use crate::queue::{DbWriteQueue, QueueError, QueueOptions, WriteBackend, WriteStatement};
    use crate::relay::forwarder::{Upstream, UpstreamError};
    use async_trait::async_trait;
    use futures::StreamExt;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// 按 provider 主机名返回预设结果
    #[derive(Default)]
    struct ScriptedUpstream {
        statuses: HashMap<String, u16>,
        interrupted: Vec<String>,
        /// 返回 200 但响应体中途出错的主机
        broken_body: Vec<String>,
        calls: Mutex<Vec<(String, Bytes, String)>>,
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn send(
            &self,
            request: UpstreamRequest,
        ) -> std::result::Result<UpstreamResponse, UpstreamError> {
            let host = request.url.host_str().unwrap_or_default().to_string();
            self.calls
                .lock()
                .unwrap()
                .push((host.clone(), request.body.clone(), request.url.path().to_string()));
            if self.interrupted.contains(&host) {
                return Err(UpstreamError::Interrupted("stream reset".to_string()));
            }
            let Some(status) = self.statuses.get(&host) else {
                return Err(UpstreamError::Transport {
                    message: "connection refused".to_string(),
                    retryable: false,
                });
            };
            let mut chunks = vec![Ok(Bytes::from_static(
                br#"{"usage":{"input_tokens":3,"output_tokens":4}}"#,
            ))];
            if self.broken_body.contains(&host) {
                chunks.push(Err(std::io::Error::other("body reset")));
            }
            Ok(UpstreamResponse {
                status: StatusCode::from_u16(*status).unwrap(),
                headers: HeaderMap::new(),
                body: futures::stream::iter(chunks).boxed(),
            })
        }
    }

    impl ScriptedUpstream {
        fn hosts(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
        }
    }

    #[derive(Default)]
    struct RecordingBreaker {
        strict: bool,
        failures: Mutex<Vec<String>>,
        successes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CircuitBreaker for RecordingBreaker {
        async fn is_blacklisted(&self, _platform: Platform, _provider: &str) -> BlacklistStatus {
            BlacklistStatus::open()
        }

        async fn record_failure(&self, _platform: Platform, provider: &str) -> Result<()> {
            self.failures.lock().unwrap().push(provider.to_string());
            Ok(())
        }

        async fn record_success(&self, _platform: Platform, provider: &str) -> Result<()> {
            self.successes.lock().unwrap().push(provider.to_string());
            Ok(())
        }

        fn is_level_blacklist_enabled(&self) -> bool {
            self.strict
        }
    }

    struct MemoryStore(Vec<Provider>);

    #[async_trait]
    impl ProviderStore for MemoryStore {
        async fn load_providers(&self, _platform: Platform) -> Result<Vec<Provider>> {
            Ok(self.0.clone())
        }

        async fn save_providers(&self, _platform: Platform, _providers: &[Provider]) -> Result<()> {
            Ok(())
        }
    }

    struct NullBackend;

    #[async_trait]
    impl WriteBackend for NullBackend {
        async fn execute(&self, _statement: &WriteStatement) -> std::result::Result<(), QueueError> {
            Ok(())
        }

        async fn execute_batch(
            &self,
            _statements: &[WriteStatement],
        ) -> std::result::Result<(), QueueError> {
            Ok(())
        }
    }

    fn provider(name: &str, level: i32) -> Provider {
        Provider {
            name: name.to_string(),
            api_url: format!("http://{name}.test"),
            api_key: "sk".to_string(),
            enabled: true,
            level,
            ..Provider::default()
        }
    }

    fn executor(
        providers: Vec<Provider>,
        upstream: Arc<ScriptedUpstream>,
        breaker: Arc<RecordingBreaker>,
    ) -> FailoverExecutor {
        let queue = Arc::new(DbWriteQueue::new(
            "logs",
            Arc::new(NullBackend),
            QueueOptions::default(),
        ));
        FailoverExecutor::new(
            Arc::new(MemoryStore(providers)),
            breaker,
            Forwarder::new(upstream, 0, Duration::from_millis(1)),
            TelemetryRecorder::new(queue, Duration::from_secs(1)),
        )
    }

    fn request(platform: Platform, model: &str) -> RelayRequest {
        RelayRequest {
            request_id: "test".to_string(),
            platform,
            endpoint: "/v1/messages".to_string(),
            headers: HeaderMap::new(),
            query: None,
            body: Bytes::from(format!(r#"{{"model":"{model}","stream":false}}"#)),
            requested_model: model.to_string(),
            is_stream: false,
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn degrade_moves_to_next_candidate_and_stops_at_success() {
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([
                ("a.test".to_string(), 503),
                ("b.test".to_string(), 200),
                ("c.test".to_string(), 200),
            ]),
            ..ScriptedUpstream::default()
        });
        let breaker = Arc::new(RecordingBreaker::default());
        let executor = executor(
            vec![provider("a", 1), provider("b", 1), provider("c", 2)],
            Arc::clone(&upstream),
            Arc::clone(&breaker),
        );

        let response = executor.execute(request(Platform::Claude, "m")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.hosts(), vec!["a.test", "b.test"]);
        assert_eq!(*breaker.failures.lock().unwrap(), vec!["a"]);
        assert_eq!(*breaker.successes.lock().unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn degrade_exhaustion_reports_every_attempt() {
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([
                ("a.test".to_string(), 500),
                ("b.test".to_string(), 429),
            ]),
            ..ScriptedUpstream::default()
        });
        let breaker = Arc::new(RecordingBreaker::default());
        let executor = executor(
            vec![provider("a", 1), provider("b", 2), provider("c", 3)],
            Arc::clone(&upstream),
            Arc::clone(&breaker),
        );

        let response = executor.execute(request(Platform::Codex, "m")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["total_attempts"], 3);
        assert_eq!(body["last_provider"], "c");
        assert!(body["error"].as_str().unwrap().contains("所有 3 个 provider 均失败"));
        assert_eq!(body["attempts"][0]["error"], "upstream status 500");
        assert_eq!(breaker.failures.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn strict_mode_forwards_exactly_once() {
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([
                ("a.test".to_string(), 500),
                ("b.test".to_string(), 200),
            ]),
            ..ScriptedUpstream::default()
        });
        let breaker = Arc::new(RecordingBreaker {
            strict: true,
            ..RecordingBreaker::default()
        });
        let executor = executor(
            vec![provider("a", 1), provider("b", 1)],
            Arc::clone(&upstream),
            Arc::clone(&breaker),
        );

        let response = executor.execute(request(Platform::Claude, "m")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["mode"], "strict");
        assert_eq!(body["provider"], "a");
        assert_eq!(body["level"], 1);
        assert_eq!(upstream.hosts(), vec!["a.test"]);
        assert_eq!(*breaker.failures.lock().unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn client_abort_is_not_reported_as_failure() {
        let upstream = Arc::new(ScriptedUpstream {
            interrupted: vec!["a.test".to_string()],
            ..ScriptedUpstream::default()
        });
        let breaker = Arc::new(RecordingBreaker {
            strict: true,
            ..RecordingBreaker::default()
        });
        let executor = executor(vec![provider("a", 1)], upstream, Arc::clone(&breaker));

        let response = executor.execute(request(Platform::Claude, "m")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(breaker.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn no_candidates_yields_404_with_diagnostics() {
        let mut narrow = provider("narrow", 1);
        narrow.supported_models = IndexMap::from([("gpt-5".to_string(), true)]);
        let upstream = Arc::new(ScriptedUpstream::default());
        let executor = executor(
            vec![narrow],
            Arc::clone(&upstream),
            Arc::new(RecordingBreaker::default()),
        );

        let response = executor.execute(request(Platform::Codex, "claude-opus")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["model"], "claude-opus");
        assert_eq!(body["skipped"], 1);
        assert_eq!(body["skipped_providers"][0]["reason"], "unsupported_model");
        assert!(upstream.hosts().is_empty());
    }

    #[tokio::test]
    async fn mapping_rewrites_body_per_candidate() {
        let mut mapped = provider("a", 1);
        mapped.supported_models = IndexMap::from([("vendor-sonnet".to_string(), true)]);
        mapped.model_mapping =
            IndexMap::from([("claude-*".to_string(), "vendor-sonnet".to_string())]);
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([("a.test".to_string(), 200)]),
            ..ScriptedUpstream::default()
        });
        let executor = executor(
            vec![mapped],
            Arc::clone(&upstream),
            Arc::new(RecordingBreaker::default()),
        );

        let response = executor
            .execute(request(Platform::Claude, "claude-sonnet-4"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let calls = upstream.calls.lock().unwrap();
        assert_eq!(
            calls[0].1,
            Bytes::from_static(br#"{"model":"vendor-sonnet","stream":false}"#)
        );
    }

    #[tokio::test]
    async fn rewrite_failure_skips_candidate_without_reporting() {
        let mut mapped = provider("a", 1);
        mapped.supported_models = IndexMap::from([("target".to_string(), true)]);
        mapped.model_mapping = IndexMap::from([("m".to_string(), "target".to_string())]);
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([("b.test".to_string(), 200)]),
            ..ScriptedUpstream::default()
        });
        let breaker = Arc::new(RecordingBreaker::default());
        let executor = executor(
            vec![mapped, provider("b", 1)],
            Arc::clone(&upstream),
            Arc::clone(&breaker),
        );

        // 请求体没有顶层 model 字段，映射改写失败
        let mut req = request(Platform::Claude, "m");
        req.body = Bytes::from_static(br#"{"messages":[]}"#);

        let response = executor.execute(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.hosts(), vec!["b.test"]);
        assert!(breaker.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn body_error_after_success_status_is_still_success() {
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([
                ("a.test".to_string(), 200),
                ("b.test".to_string(), 200),
            ]),
            broken_body: vec!["a.test".to_string()],
            ..ScriptedUpstream::default()
        });
        let breaker = Arc::new(RecordingBreaker::default());
        let executor = executor(
            vec![provider("a", 1), provider("b", 1)],
            Arc::clone(&upstream),
            Arc::clone(&breaker),
        );

        let response = executor.execute(request(Platform::Claude, "m")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(axum::body::to_bytes(response.into_body(), usize::MAX).await.is_err());
        assert_eq!(upstream.hosts(), vec!["a.test"]);
        assert_eq!(*breaker.successes.lock().unwrap(), vec!["a"]);
        assert!(breaker.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unbuildable_request_skips_candidate_in_degrade_mode() {
        let mut broken = provider("a", 1);
        broken.api_url = "not a url".to_string();
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([("b.test".to_string(), 200)]),
            ..ScriptedUpstream::default()
        });
        let breaker = Arc::new(RecordingBreaker::default());
        let executor = executor(
            vec![broken, provider("b", 1)],
            Arc::clone(&upstream),
            Arc::clone(&breaker),
        );

        let response = executor.execute(request(Platform::Claude, "m")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.hosts(), vec!["b.test"]);
        assert!(breaker.failures.lock().unwrap().is_empty());
        assert_eq!(*breaker.successes.lock().unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn unbuildable_request_in_strict_mode_moves_to_next_candidate() {
        let mut bad_key = provider("a", 1);
        bad_key.api_key = "sk\nbroken".to_string();
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([("b.test".to_string(), 200)]),
            ..ScriptedUpstream::default()
        });
        let breaker = Arc::new(RecordingBreaker {
            strict: true,
            ..RecordingBreaker::default()
        });
        let executor = executor(
            vec![bad_key, provider("b", 2)],
            Arc::clone(&upstream),
            Arc::clone(&breaker),
        );

        let response = executor.execute(request(Platform::Claude, "m")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.hosts(), vec!["b.test"]);
        assert!(breaker.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_unbuildable_candidates_yield_zero_attempts() {
        let mut broken = provider("a", 1);
        broken.api_url = "not a url".to_string();
        let upstream = Arc::new(ScriptedUpstream::default());
        let breaker = Arc::new(RecordingBreaker {
            strict: true,
            ..RecordingBreaker::default()
        });
        let executor = executor(vec![broken], Arc::clone(&upstream), Arc::clone(&breaker));

        let response = executor.execute(request(Platform::Claude, "m")).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert_eq!(body["total_attempts"], 0);
        assert!(body["error"].as_str().unwrap().contains("provider 配置错误"));
        assert!(upstream.hosts().is_empty());
        assert!(breaker.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gemini_model_is_rewritten_in_path() {
        let mut mapped = provider("g", 1);
        mapped.supported_models = IndexMap::from([("vendor-*".to_string(), true)]);
        mapped.model_mapping =
            IndexMap::from([("gemini-*".to_string(), "vendor-*".to_string())]);
        let upstream = Arc::new(ScriptedUpstream {
            statuses: HashMap::from([("g.test".to_string(), 200)]),
            ..ScriptedUpstream::default()
        });
        let executor = executor(
            vec![mapped],
            Arc::clone(&upstream),
            Arc::new(RecordingBreaker::default()),
        );

        let req = RelayRequest {
            endpoint: "/v1beta/models/gemini-2.5-pro:generateContent".to_string(),
            body: Bytes::from_static(b"{\"contents\":[]}"),
            ..request(Platform::Gemini, "gemini-2.5-pro")
        };
        let response = executor.execute(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            upstream.calls.lock().unwrap()[0].2,
            "/v1beta/models/vendor-2.5-pro:generateContent"
        );
    }
}
