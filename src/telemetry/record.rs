//! # 请求记录
//!
//! 每次上游调用对应一条 `request_log` 记录，失败的调用同样落库。

use chrono::Utc;
use serde::Serialize;

use super::TokenUsage;
use crate::provider::Platform;
use crate::queue::WriteStatement;

const INSERT_REQUEST_LOG: &str = "INSERT INTO request_log \
    (platform, model, provider, http_code, input_tokens, output_tokens, \
    cache_create_tokens, cache_read_tokens, reasoning_tokens, is_stream, duration_sec, created_at) \
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// 一次上游调用的结果与用量
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestAttempt {
    pub platform: Platform,
    /// 映射后实际发往上游的模型
    pub model: String,
    pub provider: String,
    /// 0 表示没有拿到任何响应
    pub http_code: u16,
    pub usage: TokenUsage,
    pub is_stream: bool,
    pub duration_sec: f64,
}

impl RequestAttempt {
    #[must_use]
    pub fn new(
        platform: Platform,
        model: impl Into<String>,
        provider: impl Into<String>,
        is_stream: bool,
    ) -> Self {
        Self {
            platform,
            model: model.into(),
            provider: provider.into(),
            http_code: 0,
            usage: TokenUsage::default(),
            is_stream,
            duration_sec: 0.0,
        }
    }

    /// 生成写入 `request_log` 的参数化语句；同一张表的插入语句形状一致，可走批量通道
    #[must_use]
    pub fn to_statement(&self) -> WriteStatement {
        WriteStatement::new(
            INSERT_REQUEST_LOG,
            [
                self.platform.as_str().into(),
                self.model.clone().into(),
                self.provider.clone().into(),
                i32::from(self.http_code).into(),
                self.usage.input_tokens.into(),
                self.usage.output_tokens.into(),
                self.usage.cache_create_tokens.into(),
                self.usage.cache_read_tokens.into(),
                self.usage.reasoning_tokens.into(),
                self.is_stream.into(),
                self.duration_sec.into(),
                Utc::now().naive_utc().into(),
            ],
        )
    }
}
