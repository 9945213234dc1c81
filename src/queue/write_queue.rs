//! # 数据库写入队列
//!
//! SQLite 只允许单写者：所有写语句经由队列交给唯一的 worker 顺序执行。
//! 批量通道只能用于同表同操作的同构写入（例如 `request_log` 插入），
//! 异构写入必须走单条通道。

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backend::{WriteBackend, WriteStatement};
use super::stats::{QueueStats, StatsRecorder};
use super::worker::{BatchOptions, supervise_batch, supervise_single};
use super::QueueError;
use crate::logging::{LogComponent, LogStage};
use crate::{linfo, lwarn};

/// 已入队的写任务，结果通道只会被使用一次
#[derive(Debug)]
pub struct WriteTask {
    pub statement: WriteStatement,
    pub result: oneshot::Sender<Result<(), QueueError>>,
}

/// 队列参数
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// 每个通道的缓冲大小
    pub capacity: usize,
    /// 为 None 时不启用批量通道
    pub batch: Option<BatchOptions>,
    /// `exec` / `exec_batch` 的默认截止时间（覆盖入队与等待结果两个阶段）
    pub submit_timeout: Duration,
    /// worker panic 后的重启间隔
    pub restart_delay: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            capacity: 5000,
            batch: None,
            submit_timeout: Duration::from_secs(30),
            restart_delay: Duration::from_secs(1),
        }
    }
}

impl QueueOptions {
    #[must_use]
    pub fn with_batch(mut self, batch: BatchOptions) -> Self {
        self.batch = Some(batch);
        self
    }
}

/// worker 与队列句柄共享的状态
pub(crate) struct Shared {
    pub(crate) label: &'static str,
    pub(crate) backend: Arc<dyn WriteBackend>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) restart_delay: Duration,
    stats: Mutex<StatsRecorder>,
}

impl Shared {
    pub(crate) fn record(&self, count: usize, latency: Duration, success: bool) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(count, latency, success);
    }

    pub(crate) fn record_batch_commit(&self) {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_batch_commit();
    }
}

#[derive(Debug, Clone, Copy)]
enum Lane {
    Single,
    Batch,
}

/// 提交的终止条件
enum Stop {
    Deadline(Instant),
    Token(CancellationToken),
}

impl Stop {
    fn wait(self) -> impl Future<Output = ()> + Send {
        async move {
            match self {
                Self::Deadline(deadline) => tokio::time::sleep_until(deadline).await,
                Self::Token(token) => token.cancelled_owned().await,
            }
        }
    }

    const fn enqueue_error(&self) -> QueueError {
        match self {
            Self::Deadline(_) => QueueError::Full,
            Self::Token(_) => QueueError::Cancelled,
        }
    }

    const fn wait_error(&self) -> QueueError {
        match self {
            Self::Deadline(_) => QueueError::Timeout,
            Self::Token(_) => QueueError::Cancelled,
        }
    }
}

/// 串行化写入队列
pub struct DbWriteQueue {
    shared: Arc<Shared>,
    single_tx: mpsc::Sender<WriteTask>,
    batch_tx: Option<mpsc::Sender<WriteTask>>,
    closed: AtomicBool,
    submit_timeout: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DbWriteQueue {
    /// 创建队列并启动 worker，必须在 tokio 运行时内调用
    pub fn new(label: &'static str, backend: Arc<dyn WriteBackend>, options: QueueOptions) -> Self {
        let capacity = options.capacity.max(1);
        let shared = Arc::new(Shared {
            label,
            backend,
            shutdown: CancellationToken::new(),
            restart_delay: options.restart_delay,
            stats: Mutex::new(StatsRecorder::default()),
        });

        let (single_tx, single_rx) = mpsc::channel(capacity);
        let mut workers = vec![tokio::spawn(supervise_single(shared.clone(), single_rx))];

        let batch_tx = options.batch.map(|batch_options| {
            let (batch_tx, batch_rx) = mpsc::channel(capacity);
            workers.push(tokio::spawn(supervise_batch(
                shared.clone(),
                batch_rx,
                batch_options,
            )));
            batch_tx
        });

        linfo!(
            "system",
            LogStage::Startup,
            LogComponent::WriteQueue,
            "queue_start",
            "Write queue started",
            queue = label,
            capacity = capacity,
            batch_enabled = batch_tx.is_some()
        );

        Self {
            shared,
            single_tx,
            batch_tx,
            closed: AtomicBool::new(false),
            submit_timeout: options.submit_timeout,
            workers: Mutex::new(workers),
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        self.shared.label
    }

    #[must_use]
    pub const fn batch_enabled(&self) -> bool {
        self.batch_tx.is_some()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 单条写入，使用默认截止时间
    pub async fn exec(&self, statement: WriteStatement) -> Result<(), QueueError> {
        self.exec_until(statement, Instant::now() + self.submit_timeout)
            .await
    }

    /// 批量通道写入，使用默认截止时间
    pub async fn exec_batch(&self, statement: WriteStatement) -> Result<(), QueueError> {
        self.exec_batch_until(statement, Instant::now() + self.submit_timeout)
            .await
    }

    pub async fn exec_until(
        &self,
        statement: WriteStatement,
        deadline: Instant,
    ) -> Result<(), QueueError> {
        self.submit(Lane::Single, statement, Stop::Deadline(deadline))
            .await
    }

    pub async fn exec_batch_until(
        &self,
        statement: WriteStatement,
        deadline: Instant,
    ) -> Result<(), QueueError> {
        self.submit(Lane::Batch, statement, Stop::Deadline(deadline))
            .await
    }

    /// 可取消的单条写入；取消只影响调用方等待，已入队的任务仍会执行
    pub async fn exec_cancellable(
        &self,
        statement: WriteStatement,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        self.submit(Lane::Single, statement, Stop::Token(cancel))
            .await
    }

    /// 可取消的批量写入
    pub async fn exec_batch_cancellable(
        &self,
        statement: WriteStatement,
        cancel: CancellationToken,
    ) -> Result<(), QueueError> {
        self.submit(Lane::Batch, statement, Stop::Token(cancel))
            .await
    }

    async fn submit(
        &self,
        lane: Lane,
        statement: WriteStatement,
        stop: Stop,
    ) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let sender = match lane {
            Lane::Single => &self.single_tx,
            Lane::Batch => self.batch_tx.as_ref().ok_or(QueueError::BatchDisabled)?,
        };

        let (result_tx, result_rx) = oneshot::channel();
        let task = WriteTask {
            statement,
            result: result_tx,
        };

        let enqueue_error = stop.enqueue_error();
        let wait_error = stop.wait_error();
        let stop = stop.wait();
        tokio::pin!(stop);

        tokio::select! {
            sent = sender.send(task) => {
                if sent.is_err() {
                    return Err(QueueError::Closed);
                }
            }
            () = &mut stop => return Err(enqueue_error),
            () = self.shared.shutdown.cancelled() => return Err(QueueError::Closed),
        }

        // 已入队的任务不可撤销；放弃等待时直接丢弃接收端
        tokio::select! {
            result = result_rx => result.unwrap_or(Err(QueueError::Closed)),
            () = &mut stop => Err(wait_error),
        }
    }

    /// 当前统计快照
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let mut stats = self
            .shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        stats.queue_length = depth(&self.single_tx);
        stats.batch_queue_length = self.batch_tx.as_ref().map_or(0, depth);
        stats
    }

    /// 优雅关闭：拒绝新任务，排空已入队任务，最多等待 `timeout`
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        self.shared.shutdown.cancel();

        let handles = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );

        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            let remaining =
                depth(&self.single_tx) + self.batch_tx.as_ref().map_or(0, depth);
            lwarn!(
                "system",
                LogStage::Shutdown,
                LogComponent::WriteQueue,
                "queue_shutdown",
                "Write queue shutdown timed out",
                queue = self.shared.label,
                remaining = remaining
            );
            return Err(QueueError::ShutdownTimeout { remaining });
        }

        linfo!(
            "system",
            LogStage::Shutdown,
            LogComponent::WriteQueue,
            "queue_shutdown",
            "Write queue drained",
            queue = self.shared.label
        );
        Ok(())
    }
}

fn depth(sender: &mpsc::Sender<WriteTask>) -> usize {
    sender.max_capacity() - sender.capacity()
}
