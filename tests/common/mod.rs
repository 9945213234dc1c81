//! # 集成测试公共设施
//!
//! 内存 SQLite + 临时目录中的 provider 文件 + 真实 HTTP 上游客户端。

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use code_relay::AppConfig;
use code_relay::app::AppContext;
use code_relay::breaker::{CircuitBreaker, StaticBreaker};
use code_relay::database::{RequestLogQuery, list_request_logs, run_migrations};
use code_relay::provider::{JsonProviderStore, Platform, Provider, ProviderStore};
use code_relay::relay::{HttpUpstream, Upstream, create_router};

pub struct TestRelay {
    pub context: Arc<AppContext>,
    pub router: Router,
    pub breaker: Arc<StaticBreaker>,
    pub store: Arc<JsonProviderStore>,
    _dir: TempDir,
}

/// 测试用配置：小批量间隔，关闭传输层重试
pub fn test_config(strict: bool) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = "sqlite::memory:".to_string();
    config.queue.batch_interval_ms = 20;
    config.relay.transport_retries = 0;
    config.relay.upstream_timeout_secs = 5;
    config.blacklist.enable_level_blacklist = strict;
    config
}

pub async fn memory_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("connect sqlite memory");
    run_migrations(&db).await.expect("run migrations");
    db
}

impl TestRelay {
    pub async fn new(strict: bool) -> Self {
        let config = test_config(strict);
        let dir = TempDir::new().expect("create temp dir");
        let store = Arc::new(JsonProviderStore::new(dir.path()));
        let breaker = Arc::new(StaticBreaker::new(&config.blacklist));
        let upstream: Arc<dyn Upstream> =
            Arc::new(HttpUpstream::new(config.relay.upstream_timeout()).expect("http client"));

        let context = Arc::new(AppContext::new(
            Arc::new(config),
            Arc::new(memory_db().await),
            Arc::clone(&store) as Arc<dyn ProviderStore>,
            Arc::clone(&breaker) as Arc<dyn CircuitBreaker>,
            upstream,
        ));
        let router = create_router(Arc::clone(&context));

        Self {
            context,
            router,
            breaker,
            store,
            _dir: dir,
        }
    }

    pub async fn set_providers(&self, platform: Platform, providers: &[Provider]) {
        self.store
            .save_providers(platform, providers)
            .await
            .expect("save providers");
    }

    /// 发送请求并读取完整响应体
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, headers, body.to_vec())
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request");
        let (status, _, bytes) = self.send(request).await;
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .expect("build request");
        let (status, _, bytes) = self.send(request).await;
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    /// 等待日志队列落库，直到至少有 `expected` 条记录
    pub async fn wait_for_logs(&self, expected: usize) -> Vec<entity::request_log::Model> {
        let query = RequestLogQuery::default();
        for _ in 0..100 {
            let logs = list_request_logs(&self.context.db, &query)
                .await
                .expect("list request logs");
            if logs.len() >= expected {
                return logs;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("request_log 中少于 {expected} 条记录");
    }
}

pub fn provider(id: i64, name: &str, api_url: &str, level: i32) -> Provider {
    Provider {
        id,
        name: name.to_string(),
        api_url: api_url.to_string(),
        api_key: format!("key-{name}"),
        enabled: true,
        level,
        ..Provider::default()
    }
}
