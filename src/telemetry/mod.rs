//! # 用量与请求记录
//!
//! 从上游响应中提取 token 用量，并为每次上游调用提交一条 `request_log` 记录。

mod observer;
mod record;
mod recorder;
mod sse;
mod usage;

pub use observer::{MAX_OBSERVED_BODY_BYTES, ObservedBody, UsageObserver};
pub use record::RequestAttempt;
pub use recorder::{AttemptGuard, TelemetryRecorder};
pub use sse::{SseAccumulator, SseDecoder, SseEvent};
pub use usage::{
    ClaudeUsageParser, CodexUsageParser, GeminiUsageParser, TokenUsage, UsageParser, parser_for,
};
