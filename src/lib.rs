//! # Code Relay Library
//!
//! 本地 AI provider 转发服务：候选筛选、模型映射、流式转发、失败分类与逐级降级，
//! 以及串行化 SQLite 写入的异步队列。

pub mod app;
pub mod breaker;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod provider;
pub mod queue;
pub mod relay;
pub mod server;
pub mod telemetry;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{ProxyError, Result};
