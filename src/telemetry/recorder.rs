//! # 请求记录提交
//!
//! 记录以后台任务提交到批量写入队列，失败只写日志，不影响客户端响应。

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{RequestAttempt, TokenUsage};
use crate::logging::{LogComponent, LogStage};
use crate::provider::Platform;
use crate::queue::{DbWriteQueue, QueueError};
use crate::{ldebug, lwarn};

/// 请求记录提交器
#[derive(Clone)]
pub struct TelemetryRecorder {
    queue: Arc<DbWriteQueue>,
    submit_timeout: Duration,
}

impl TelemetryRecorder {
    #[must_use]
    pub const fn new(queue: Arc<DbWriteQueue>, submit_timeout: Duration) -> Self {
        Self {
            queue,
            submit_timeout,
        }
    }

    /// 开始一次上游调用的计时与记录
    #[must_use]
    pub fn begin(
        &self,
        request_id: &str,
        platform: Platform,
        model: &str,
        provider: &str,
        is_stream: bool,
    ) -> AttemptGuard {
        AttemptGuard {
            recorder: self.clone(),
            request_id: request_id.to_string(),
            attempt: Some(RequestAttempt::new(platform, model, provider, is_stream)),
            started: Instant::now(),
        }
    }

    /// 提交并等待写入结果
    pub async fn write(&self, attempt: &RequestAttempt) -> Result<(), QueueError> {
        let deadline = Instant::now() + self.submit_timeout;
        let statement = attempt.to_statement();
        if self.queue.batch_enabled() {
            self.queue.exec_batch_until(statement, deadline).await
        } else {
            self.queue.exec_until(statement, deadline).await
        }
    }

    /// 在后台任务中提交，调用方不等待
    pub fn submit(&self, request_id: String, attempt: RequestAttempt) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            lwarn!(
                &request_id,
                LogStage::Db,
                LogComponent::Telemetry,
                "submit_without_runtime",
                "no tokio runtime, request log dropped",
                provider = attempt.provider
            );
            return;
        };

        let recorder = self.clone();
        handle.spawn(async move {
            match recorder.write(&attempt).await {
                Ok(()) => ldebug!(
                    &request_id,
                    LogStage::Db,
                    LogComponent::Telemetry,
                    "request_log_written",
                    "request log persisted",
                    provider = attempt.provider,
                    http_code = attempt.http_code
                ),
                Err(err) => lwarn!(
                    &request_id,
                    LogStage::Db,
                    LogComponent::Telemetry,
                    "request_log_failed",
                    &format!("写入请求日志失败: {err}"),
                    provider = attempt.provider,
                    http_code = attempt.http_code
                ),
            }
        });
    }
}

/// 一次上游调用的记录守卫
///
/// 在 [`AttemptGuard::finish`] 或 drop 时提交，且只提交一次。
pub struct AttemptGuard {
    recorder: TelemetryRecorder,
    request_id: String,
    attempt: Option<RequestAttempt>,
    started: Instant,
}

impl AttemptGuard {
    pub fn set_status(&mut self, http_code: u16) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.http_code = http_code;
        }
    }

    pub fn set_usage(&mut self, usage: TokenUsage) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.usage = usage;
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// 立即提交记录
    pub fn finish(mut self) {
        self.submit_once();
    }

    fn submit_once(&mut self) {
        if let Some(mut attempt) = self.attempt.take() {
            attempt.duration_sec = self.started.elapsed().as_secs_f64();
            self.recorder
                .submit(std::mem::take(&mut self.request_id), attempt);
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        self.submit_once();
    }
}
