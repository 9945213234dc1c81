//! # 应用配置结构定义

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use super::DatabaseConfig;
use crate::breaker::BlacklistLevelConfig;
use crate::queue::{BatchOptions, QueueOptions};

/// 应用主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// relay 监听与上游调用配置
    pub relay: RelayConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 写入队列配置
    pub queue: QueueConfig,
    /// provider 存储配置
    pub providers: ProvidersConfig,
    /// 分级拉黑配置
    pub blacklist: BlacklistLevelConfig,
}

/// relay 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// 监听地址，只应绑定回环地址
    pub bind: String,
    /// 单次上游调用超时（秒）
    pub upstream_timeout_secs: u64,
    /// 未拿到响应前的传输层重试次数
    pub transport_retries: u32,
    /// 传输层重试间隔（毫秒）
    pub retry_backoff_ms: u64,
    /// 请求体大小上限（字节）
    pub max_body_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:18100".to_string(),
            upstream_timeout_secs: 3 * 60 * 60,
            transport_retries: 1,
            retry_backoff_ms: 500,
            max_body_bytes: 32 * 1024 * 1024,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, String> {
        self.bind
            .parse()
            .map_err(|e| format!("Invalid relay bind address '{}': {e}", self.bind))
    }
}

/// 写入队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 每个通道的缓冲大小
    pub capacity: usize,
    /// 批量通道每批最大条数
    pub batch_size: usize,
    /// 批量通道定时提交间隔（毫秒）
    pub batch_interval_ms: u64,
    /// 默认提交超时（秒）
    pub submit_timeout_secs: u64,
    /// 请求日志提交超时（秒）
    pub telemetry_submit_timeout_secs: u64,
    /// 关闭时等待排空的时间（秒）
    pub shutdown_timeout_secs: u64,
    /// worker panic 后的重启间隔（毫秒）
    pub restart_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 5000,
            batch_size: 50,
            batch_interval_ms: 100,
            submit_timeout_secs: 30,
            telemetry_submit_timeout_secs: 5,
            shutdown_timeout_secs: 10,
            restart_delay_ms: 1000,
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub const fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            capacity: self.capacity,
            batch: None,
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
            restart_delay: Duration::from_millis(self.restart_delay_ms),
        }
    }

    #[must_use]
    pub const fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_size: self.batch_size,
            flush_interval: Duration::from_millis(self.batch_interval_ms),
        }
    }

    #[must_use]
    pub const fn telemetry_submit_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry_submit_timeout_secs)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// provider 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// 存放 `claude-code.json` / `codex.json` / `gemini.json` 的目录
    pub dir: PathBuf,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/providers"),
        }
    }
}

impl AppConfig {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        let addr = self.relay.bind_addr()?;
        if !addr.ip().is_loopback() {
            return Err(format!(
                "relay.bind must be a loopback address, got {addr}"
            ));
        }
        if self.relay.upstream_timeout_secs == 0 {
            return Err("relay.upstream_timeout_secs must be greater than 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.queue.capacity == 0 {
            return Err("queue.capacity must be greater than 0".to_string());
        }
        if self.queue.batch_size == 0 {
            return Err("queue.batch_size must be greater than 0".to_string());
        }
        if self.queue.batch_interval_ms == 0 {
            return Err("queue.batch_interval_ms must be greater than 0".to_string());
        }
        if self.queue.submit_timeout_secs == 0 || self.queue.telemetry_submit_timeout_secs == 0 {
            return Err("queue submit timeouts must be greater than 0".to_string());
        }

        if self.providers.dir.as_os_str().is_empty() {
            return Err("providers.dir cannot be empty".to_string());
        }

        self.blacklist.validate()
    }
}
