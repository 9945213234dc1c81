//! # 上游转发
//!
//! 构造发往 provider 的请求、执行传输层重试，并对结果分类。
//! 只有在拿到响应之前发生的连接/超时错误会重试，HTTP 状态码从不重试。

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::error::{ProxyError, Result};
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;
use crate::provider::{Platform, Provider};

/// 不应跨跳转发的头
fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// 一次转发的结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// 客户端断开导致的中断，不计入 provider 失败
    ClientAbort,
    UpstreamFailure,
}

/// 按状态码与错误判定结果
///
/// `response_received` 表示交换已经开始（拿到过响应或请求体已在传输）。
#[must_use]
pub fn classify_outcome(status: u16, error: Option<&str>, response_received: bool) -> Outcome {
    if (200..300).contains(&status) {
        return Outcome::Success;
    }
    if status != 0 {
        return Outcome::UpstreamFailure;
    }
    match error {
        None => Outcome::Success,
        Some(_) if response_received => Outcome::ClientAbort,
        Some(_) => Outcome::UpstreamFailure,
    }
}

/// 发往上游的请求
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// 上游响应，响应体以流的形式读取
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    /// 读取响应体前 `limit` 字节，用于失败诊断
    pub async fn read_snippet(mut self, limit: usize) -> String {
        let mut collected = Vec::new();
        while let Some(Ok(chunk)) = self.body.next().await {
            let room = limit.saturating_sub(collected.len());
            collected.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if collected.len() >= limit {
                break;
            }
        }
        String::from_utf8_lossy(&collected).into_owned()
    }
}

/// 上游调用错误
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// 拿到响应前的传输错误
    #[error("请求失败: {message}")]
    Transport { message: String, retryable: bool },

    /// 交换已经开始后被中断
    #[error("请求中断: {0}")]
    Interrupted(String),
}

impl UpstreamError {
    #[must_use]
    pub const fn exchange_started(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { retryable: true, .. })
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_body() || err.is_decode() {
            return Self::Interrupted(err.to_string());
        }
        Self::Transport {
            retryable: err.is_connect() || err.is_timeout(),
            message: err.to_string(),
        }
    }
}

/// 上游 HTTP 调用
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> std::result::Result<UpstreamResponse, UpstreamError>;
}

/// 基于 reqwest 的上游实现
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProxyError::network_with_source("创建 HTTP 客户端失败", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn send(&self, request: UpstreamRequest) -> std::result::Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .post(request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await?;

        Ok(UpstreamResponse {
            status: response.status(),
            headers: response.headers().clone(),
            body: response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other)).boxed(),
        })
    }
}

/// 转发器：请求构造 + 传输层重试
#[derive(Clone)]
pub struct Forwarder {
    upstream: Arc<dyn Upstream>,
    retries: u32,
    backoff: Duration,
}

impl Forwarder {
    #[must_use]
    pub fn new(upstream: Arc<dyn Upstream>, retries: u32, backoff: Duration) -> Self {
        Self {
            upstream,
            retries,
            backoff,
        }
    }

    /// 构造发往 provider 的请求
    ///
    /// `endpoint` 为协议路径（gemini 含版本与子路径），`query` 为客户端原始查询串。
    pub fn build_request(
        platform: Platform,
        provider: &Provider,
        endpoint: &str,
        client_headers: &HeaderMap,
        query: Option<&str>,
        body: Bytes,
    ) -> Result<UpstreamRequest> {
        let url = build_url(&provider.api_url, endpoint, query)?;
        let headers = build_headers(platform, &provider.api_key, client_headers)?;
        Ok(UpstreamRequest { url, headers, body })
    }

    /// 发送请求，未拿到响应的连接/超时错误按配置重试
    pub async fn forward(
        &self,
        request_id: &str,
        provider: &str,
        request: UpstreamRequest,
    ) -> std::result::Result<UpstreamResponse, UpstreamError> {
        let mut attempt = 0;
        loop {
            match self.upstream.send(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    lwarn!(
                        request_id,
                        LogStage::UpstreamRequest,
                        LogComponent::Forwarder,
                        "transport_retry",
                        &format!("上游传输失败，{}ms 后重试: {err}", self.backoff.as_millis()),
                        provider = provider,
                        attempt = attempt
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// 拼接上游地址：`apiUrl` 去掉尾部 `/` 后接协议路径，再附加客户端查询参数（同名取最后一个）
pub fn build_url(api_url: &str, endpoint: &str, query: Option<&str>) -> Result<Url> {
    let base = api_url.trim().trim_end_matches('/');
    let mut url = Url::parse(&format!("{base}{endpoint}")).map_err(|e| {
        ProxyError::config_with_source(format!("provider 地址无效: {api_url}"), e)
    })?;

    let pairs: IndexMap<String, String> = query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs.iter());
    }
    Ok(url)
}

/// 复制客户端请求头（同名取最后一个），去掉逐跳头并写入 provider 凭证
pub fn build_headers(
    platform: Platform,
    api_key: &str,
    client_headers: &HeaderMap,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(client_headers.len() + 2);
    for (name, value) in client_headers {
        if is_hop_by_hop(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::ACCEPT_ENCODING
        {
            continue;
        }
        headers.insert(name.clone(), value.clone());
    }

    match platform {
        Platform::Gemini => {
            let value = HeaderValue::from_str(api_key)
                .map_err(|e| ProxyError::config_with_source("provider apiKey 含非法字符", e))?;
            headers.insert(HeaderName::from_static("x-goog-api-key"), value);
        }
        Platform::Claude | Platform::Codex => {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| ProxyError::config_with_source("provider apiKey 含非法字符", e))?;
            headers.insert(header::AUTHORIZATION, value);
        }
    }

    headers
        .entry(header::ACCEPT)
        .or_insert_with(|| HeaderValue::from_static("application/json"));
    Ok(headers)
}

/// 透传给客户端的响应头
#[must_use]
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) || name == header::CONTENT_LENGTH {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// 响应是否为 SSE 流
#[must_use]
pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("text/event-stream"))
}
