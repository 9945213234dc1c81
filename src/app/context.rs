//! 应用上下文
//!
//! 统一持有跨模块共享的服务实例，便于在测试中注入替身实现。

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::breaker::{CircuitBreaker, StaticBreaker};
use crate::config::AppConfig;
use crate::database::{init_database, run_migrations};
use crate::error::{ProxyError, Result};
use crate::provider::{JsonProviderStore, ProviderStore};
use crate::queue::{QueueError, WriteQueues};
use crate::relay::{FailoverExecutor, Forwarder, HttpUpstream, Upstream};
use crate::telemetry::TelemetryRecorder;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub queues: WriteQueues,
    pub store: Arc<dyn ProviderStore>,
    pub breaker: Arc<dyn CircuitBreaker>,
    pub executor: FailoverExecutor,
}

impl AppContext {
    /// 用给定的协作者组装上下文，写入队列在此启动
    #[must_use]
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        store: Arc<dyn ProviderStore>,
        breaker: Arc<dyn CircuitBreaker>,
        upstream: Arc<dyn Upstream>,
    ) -> Self {
        let queues = WriteQueues::new(
            Arc::new(db.as_ref().clone()),
            &config.queue.queue_options(),
            config.queue.batch_options(),
        );
        let recorder = TelemetryRecorder::new(
            Arc::clone(&queues.logs),
            config.queue.telemetry_submit_timeout(),
        );
        let forwarder = Forwarder::new(
            upstream,
            config.relay.transport_retries,
            config.relay.retry_backoff(),
        );
        let executor =
            FailoverExecutor::new(Arc::clone(&store), Arc::clone(&breaker), forwarder, recorder);

        Self {
            config,
            db,
            queues,
            store,
            breaker,
            executor,
        }
    }

    /// 按配置初始化数据库、provider 存储、熔断服务与上游客户端
    pub async fn build(config: AppConfig) -> Result<Self> {
        let db = init_database(&config.database).await?;
        run_migrations(&db)
            .await
            .map_err(|e| ProxyError::database_with_source("数据库迁移失败", e))?;

        let store: Arc<dyn ProviderStore> = Arc::new(JsonProviderStore::new(&config.providers.dir));
        let breaker: Arc<dyn CircuitBreaker> = Arc::new(StaticBreaker::new(&config.blacklist));
        let upstream: Arc<dyn Upstream> =
            Arc::new(HttpUpstream::new(config.relay.upstream_timeout())?);

        Ok(Self::new(
            Arc::new(config),
            Arc::new(db),
            store,
            breaker,
            upstream,
        ))
    }

    /// 关闭写入队列，等待已入队的写入完成
    pub async fn shutdown(&self) -> std::result::Result<(), QueueError> {
        self.queues
            .shutdown_all(self.config.queue.shutdown_timeout())
            .await
    }
}
