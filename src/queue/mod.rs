//! # 写入队列模块
//!
//! - `write_queue`：单条 / 批量双通道的串行化队列
//! - `worker`：受监督的 worker 与批量提交
//! - `backend`：写语句与执行后端
//! - `stats`：吞吐与延迟统计

mod backend;
mod stats;
mod worker;
mod write_queue;

pub use backend::{WriteBackend, WriteStatement};
pub use stats::QueueStats;
pub use worker::BatchOptions;
pub use write_queue::{DbWriteQueue, QueueOptions, WriteTask};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::logging::{LogComponent, LogStage};
use crate::lerror;

/// 写入队列错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("写入队列已关闭")]
    Closed,

    #[error("入队超时，队列已满")]
    Full,

    #[error("写入超时，队列可能积压严重")]
    Timeout,

    #[error("写入已取消")]
    Cancelled,

    #[error("批量模式未启用")]
    BatchDisabled,

    #[error("数据库写入 panic: {0}")]
    Panicked(String),

    #[error("{0}")]
    Database(String),

    #[error("批量提交失败: {0}")]
    BatchFailed(String),

    #[error("关闭超时，队列中仍有 {remaining} 个任务")]
    ShutdownTimeout { remaining: usize },
}

/// relay 使用的两个队列实例
///
/// `single` 用于异构写入，`logs` 开启批量通道，只接收 `request_log` 插入。
#[derive(Clone)]
pub struct WriteQueues {
    pub single: Arc<DbWriteQueue>,
    pub logs: Arc<DbWriteQueue>,
}

/// 两个队列的统计快照
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WriteQueuesStats {
    pub single: QueueStats,
    pub logs: QueueStats,
}

impl WriteQueues {
    /// 在同一个后端上创建两个队列
    pub fn new(backend: Arc<dyn WriteBackend>, options: &QueueOptions, batch: BatchOptions) -> Self {
        let single_options = QueueOptions {
            batch: None,
            ..options.clone()
        };
        let logs_options = options.clone().with_batch(batch);

        Self {
            single: Arc::new(DbWriteQueue::new("single", backend.clone(), single_options)),
            logs: Arc::new(DbWriteQueue::new("logs", backend, logs_options)),
        }
    }

    #[must_use]
    pub fn stats(&self) -> WriteQueuesStats {
        WriteQueuesStats {
            single: self.single.stats(),
            logs: self.logs.stats(),
        }
    }

    /// 依次关闭两个队列，两个都会被尝试关闭
    pub async fn shutdown_all(&self, timeout: Duration) -> Result<(), QueueError> {
        let single = self.single.shutdown(timeout).await;
        let logs = self.logs.shutdown(timeout).await;

        for (name, result) in [("single", &single), ("logs", &logs)] {
            if let Err(err) = result {
                lerror!(
                    "system",
                    LogStage::Shutdown,
                    LogComponent::WriteQueue,
                    "shutdown_all",
                    format!("{name} 队列关闭失败: {err}")
                );
            }
        }
        single.and(logs)
    }
}
