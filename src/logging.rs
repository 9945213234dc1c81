//! # 日志配置模块
//!
//! 统一的 tracing 初始化与结构化日志宏。
//!
//! 所有业务日志通过 `linfo!` / `lwarn!` / `lerror!` / `ldebug!` 输出，
//! 固定携带 `request_id`、`stage`、`component`、`operation` 四个字段，
//! 便于按请求串联一次转发的完整链路。

use std::env;
use std::fmt;
use tracing_subscriber::{EnvFilter, fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 请求处理阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStage {
    Startup,
    Shutdown,
    Configuration,
    RequestStart,
    Routing,
    RequestModify,
    UpstreamRequest,
    Response,
    ResponseFailure,
    Db,
    BackgroundTask,
    Internal,
    Error,
}

impl LogStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::Configuration => "configuration",
            Self::RequestStart => "request_start",
            Self::Routing => "routing",
            Self::RequestModify => "request_modify",
            Self::UpstreamRequest => "upstream_request",
            Self::Response => "response",
            Self::ResponseFailure => "response_failure",
            Self::Db => "db",
            Self::BackgroundTask => "background_task",
            Self::Internal => "internal",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 日志所属组件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogComponent {
    Main,
    Config,
    Database,
    ServerSetup,
    Router,
    Selector,
    Executor,
    Forwarder,
    ModelMapper,
    Telemetry,
    WriteQueue,
    Breaker,
    ProviderStore,
}

impl LogComponent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Config => "config",
            Self::Database => "database",
            Self::ServerSetup => "server_setup",
            Self::Router => "router",
            Self::Selector => "selector",
            Self::Executor => "executor",
            Self::Forwarder => "forwarder",
            Self::ModelMapper => "model_mapper",
            Self::Telemetry => "telemetry",
            Self::WriteQueue => "write_queue",
            Self::Breaker => "breaker",
            Self::ProviderStore => "provider_store",
        }
    }
}

impl fmt::Display for LogComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 内部宏：按级别输出一条结构化事件
#[doc(hidden)]
#[macro_export]
macro_rules! __relay_log {
    ($level:expr, $request_id:expr, $stage:expr, $component:expr, $operation:expr, $message:expr $(, $key:ident = $value:expr)* $(,)?) => {
        ::tracing::event!(
            $level,
            request_id = %$request_id,
            stage = %$stage,
            component = %$component,
            operation = $operation,
            $($key = ?$value,)*
            "{}",
            $message
        )
    };
}

/// 结构化 INFO 日志
#[macro_export]
macro_rules! linfo {
    ($($arg:tt)+) => {
        $crate::__relay_log!(::tracing::Level::INFO, $($arg)+)
    };
}

/// 结构化 WARN 日志
#[macro_export]
macro_rules! lwarn {
    ($($arg:tt)+) => {
        $crate::__relay_log!(::tracing::Level::WARN, $($arg)+)
    };
}

/// 结构化 ERROR 日志
#[macro_export]
macro_rules! lerror {
    ($($arg:tt)+) => {
        $crate::__relay_log!(::tracing::Level::ERROR, $($arg)+)
    };
}

/// 结构化 DEBUG 日志
#[macro_export]
macro_rules! ldebug {
    ($($arg:tt)+) => {
        $crate::__relay_log!(::tracing::Level::DEBUG, $($arg)+)
    };
}

/// 默认过滤规则：屏蔽逐条 SQL 日志，保留本 crate 的调试输出
#[must_use]
pub fn default_filter(level: &str) -> String {
    format!("{level},code_relay=debug,sqlx::query=off,sea_orm::query=warn,sqlx=warn")
}

/// 初始化日志系统
///
/// `RUST_LOG` 存在时优先使用环境变量，否则使用 [`default_filter`]。
/// 重复初始化（例如测试中）会被静默忽略。
pub fn init_optimized_logging(log_level: Option<&String>) {
    let level = log_level.map_or("info", String::as_str);
    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level));

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init();

    if env::var("RUST_LOG").is_ok_and(|v| v.contains("sqlx::query=info") || v.contains("sqlx::query=debug")) {
        tracing::info!("🔍 SQLx database query logging enabled");
    } else {
        tracing::info!("📋 SQLx database query logging disabled");
    }
}

/// 环境变量设置指南
pub fn print_logging_help() {
    println!("📋 日志配置指南:");
    println!("  RUST_LOG=info                      # 标准日志级别");
    println!("  RUST_LOG=debug                     # 调试级别");
    println!("  RUST_LOG=info,sqlx::query=info     # 开发环境：启用数据库查询日志");
    println!("  RUST_LOG=code_relay=trace          # 转发链路详细追踪");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_silences_sql_queries() {
        let filter = default_filter("warn");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("sqlx::query=off"));
        assert!(filter.contains("code_relay=debug"));
    }

    #[test]
    fn stage_and_component_render_snake_case() {
        assert_eq!(LogStage::UpstreamRequest.to_string(), "upstream_request");
        assert_eq!(LogComponent::WriteQueue.to_string(), "write_queue");
    }
}
