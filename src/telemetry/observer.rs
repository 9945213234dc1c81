//! # 响应体观察
//!
//! 响应体逐块透传给客户端，同时从中提取 token 用量。流结束、出错或被客户端断开时
//! 把用量写入 [`AttemptGuard`] 并提交记录。

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use super::{AttemptGuard, SseAccumulator, TokenUsage, UsageParser, parser_for};
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;
use crate::provider::Platform;

/// 非流式响应体最多缓存的字节数，超出后放弃解析用量
pub const MAX_OBSERVED_BODY_BYTES: usize = 4 * 1024 * 1024;

enum Mode {
    Events(SseAccumulator),
    Body { buffer: BytesMut, overflowed: bool },
}

/// 从响应字节中提取用量
pub struct UsageObserver {
    parser: &'static dyn UsageParser,
    mode: Mode,
    usage: TokenUsage,
}

impl UsageObserver {
    /// `event_stream` 为 true 时按 SSE 事件解析，否则在结束时整体解析 JSON
    #[must_use]
    pub fn new(platform: Platform, event_stream: bool) -> Self {
        let mode = if event_stream {
            Mode::Events(SseAccumulator::new())
        } else {
            Mode::Body {
                buffer: BytesMut::new(),
                overflowed: false,
            }
        };
        Self {
            parser: parser_for(platform),
            mode,
            usage: TokenUsage::default(),
        }
    }

    pub fn observe(&mut self, chunk: &[u8]) {
        match &mut self.mode {
            Mode::Events(accumulator) => {
                for event in accumulator.feed(chunk) {
                    if let Some(data) = event.json() {
                        self.parser.observe_event(&data, &mut self.usage);
                    }
                }
            }
            Mode::Body { buffer, overflowed } => {
                if *overflowed {
                    return;
                }
                if buffer.len() + chunk.len() > MAX_OBSERVED_BODY_BYTES {
                    *overflowed = true;
                    buffer.clear();
                    return;
                }
                buffer.extend_from_slice(chunk);
            }
        }
    }

    /// 处理残留数据并返回最终用量
    pub fn finish(&mut self) -> TokenUsage {
        match &mut self.mode {
            Mode::Events(accumulator) => {
                if let Some(data) = accumulator.flush().and_then(|event| event.json()) {
                    self.parser.observe_event(&data, &mut self.usage);
                }
            }
            Mode::Body { buffer, overflowed } => {
                if !*overflowed && !buffer.is_empty() {
                    if let Ok(body) = serde_json::from_slice::<Value>(buffer) {
                        self.parser.observe_body(&body, &mut self.usage);
                    }
                    buffer.clear();
                }
            }
        }
        self.usage
    }

    #[must_use]
    pub const fn usage(&self) -> TokenUsage {
        self.usage
    }
}

/// 带用量观察的响应体流
pub struct ObservedBody<E> {
    inner: BoxStream<'static, Result<Bytes, E>>,
    observer: UsageObserver,
    guard: Option<AttemptGuard>,
    request_id: String,
}

impl<E> ObservedBody<E> {
    #[must_use]
    pub fn new(
        inner: BoxStream<'static, Result<Bytes, E>>,
        observer: UsageObserver,
        guard: AttemptGuard,
        request_id: &str,
    ) -> Self {
        Self {
            inner,
            observer,
            guard: Some(guard),
            request_id: request_id.to_string(),
        }
    }

    fn complete(&mut self) {
        if let Some(mut guard) = self.guard.take() {
            guard.set_usage(self.observer.finish());
            guard.finish();
        }
    }
}

impl<E: fmt::Display> Stream for ObservedBody<E> {
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.observer.observe(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                // 状态码已发给客户端，中途断流仍按成功记录
                lwarn!(
                    &this.request_id,
                    LogStage::ResponseFailure,
                    LogComponent::Telemetry,
                    "body_stream_error",
                    &format!("上游响应体中断: {err}")
                );
                this.complete();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<E> Drop for ObservedBody<E> {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{
        BatchOptions, DbWriteQueue, QueueError, QueueOptions, WriteBackend, WriteStatement,
    };
    use crate::telemetry::TelemetryRecorder;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Captured {
        statements: Mutex<Vec<WriteStatement>>,
    }

    #[async_trait]
    impl WriteBackend for Captured {
        async fn execute(&self, statement: &WriteStatement) -> Result<(), QueueError> {
            self.statements.lock().unwrap().push(statement.clone());
            Ok(())
        }

        async fn execute_batch(&self, statements: &[WriteStatement]) -> Result<(), QueueError> {
            self.statements
                .lock()
                .unwrap()
                .extend_from_slice(statements);
            Ok(())
        }
    }

    impl Captured {
        /// 等待记录落下，再多等一会确认没有重复提交
        async fn settled(&self, count: usize) -> Vec<WriteStatement> {
            for _ in 0..100 {
                if self.statements.lock().unwrap().len() >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.statements.lock().unwrap().clone()
        }
    }

    fn observed(
        backend: &Arc<Captured>,
        platform: Platform,
        inner: BoxStream<'static, Result<Bytes, String>>,
    ) -> ObservedBody<String> {
        let options = QueueOptions::default().with_batch(BatchOptions {
            max_size: 10,
            flush_interval: Duration::from_millis(10),
        });
        let queue = DbWriteQueue::new("logs", Arc::clone(backend) as Arc<dyn WriteBackend>, options);
        let recorder = TelemetryRecorder::new(Arc::new(queue), Duration::from_secs(5));
        let mut guard = recorder.begin("req-body", platform, "m", "p", true);
        guard.set_status(200);
        ObservedBody::new(inner, UsageObserver::new(platform, true), guard, "req-body")
    }

    fn chunk(text: &'static str) -> Result<Bytes, String> {
        Ok(Bytes::from_static(text.as_bytes()))
    }

    #[tokio::test]
    async fn body_error_records_once_with_partial_usage() {
        let backend = Arc::new(Captured::default());
        let inner = futures::stream::iter([
            chunk("data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":10}}}\n\n"),
            Err("connection reset".to_string()),
        ])
        .boxed();
        let mut body = observed(&backend, Platform::Claude, inner);

        assert!(body.next().await.unwrap().is_ok());
        assert_eq!(body.next().await.unwrap(), Err("connection reset".to_string()));
        drop(body);

        let statements = backend.settled(1).await;
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].values[3], sea_orm::Value::from(200_i32));
        assert_eq!(statements[0].values[4], sea_orm::Value::from(10_i64));
    }

    #[tokio::test]
    async fn client_drop_mid_stream_records_once() {
        let backend = Arc::new(Captured::default());
        let inner = futures::stream::iter([chunk(
            "data: {\"type\":\"response.completed\",\"response\":{\"usage\":{\"input_tokens\":4,\"output_tokens\":2}}}\n\n",
        )])
        .chain(futures::stream::pending())
        .boxed();
        let mut body = observed(&backend, Platform::Codex, inner);

        assert!(body.next().await.unwrap().is_ok());
        drop(body);

        let statements = backend.settled(1).await;
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].values[3], sea_orm::Value::from(200_i32));
        assert_eq!(statements[0].values[4], sea_orm::Value::from(4_i64));
        assert_eq!(statements[0].values[5], sea_orm::Value::from(2_i64));
    }

    #[tokio::test]
    async fn gemini_cumulative_usage_keeps_final_value_across_chunks() {
        let backend = Arc::new(Captured::default());
        let inner = futures::stream::iter([
            chunk("data: {\"usageMetadata\":{\"promptTokenCount\":5,\"candidatesTokenCount\":10}}\n\ndata: {\"usage"),
            chunk("Metadata\":{\"promptTokenCount\":5,\"candidatesTokenCount\":25}}\n"),
            chunk("\ndata: {\"usageMetadata\":{\"promptTokenCount\":5,\"candidatesTokenCount\":40}}\n\n"),
        ])
        .boxed();
        let body = observed(&backend, Platform::Gemini, inner);

        let relayed: Vec<_> = body.collect().await;
        assert_eq!(relayed.len(), 3);

        let statements = backend.settled(1).await;
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].values[4], sea_orm::Value::from(5_i64));
        assert_eq!(statements[0].values[5], sea_orm::Value::from(40_i64));
    }

    #[test]
    fn event_stream_usage_survives_chunk_splits() {
        let mut observer = UsageObserver::new(Platform::Claude, true);
        observer.observe(b"data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_");
        observer.observe(b"tokens\":100,\"output_tokens\":1}}}\n\n");
        observer.observe(b"data: {\"type\":\"message_delta\",\"usage\":{\"output_tokens\":9}}");

        let usage = observer.finish();
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 10);
    }

    #[test]
    fn plain_body_is_parsed_once_at_the_end() {
        let mut observer = UsageObserver::new(Platform::Codex, false);
        observer.observe(b"{\"id\":\"resp_1\",\"usage\":{\"input_tokens\":");
        assert_eq!(observer.usage(), TokenUsage::default());
        observer.observe(b"6,\"output_tokens\":2}}");

        let usage = observer.finish();
        assert_eq!((usage.input_tokens, usage.output_tokens), (6, 2));
    }

    #[test]
    fn oversized_body_is_not_parsed() {
        let mut observer = UsageObserver::new(Platform::Claude, false);
        observer.observe(&vec![b' '; MAX_OBSERVED_BODY_BYTES]);
        observer.observe(b"{\"usage\":{\"input_tokens\":1}}");
        assert_eq!(observer.finish(), TokenUsage::default());
    }

    #[test]
    fn non_json_body_yields_zero_usage() {
        let mut observer = UsageObserver::new(Platform::Gemini, false);
        observer.observe(b"<html>bad gateway</html>");
        assert_eq!(observer.finish(), TokenUsage::default());
    }
}
