//! # 写入 worker
//!
//! 每个通道一个 worker，由 supervisor 包裹：worker 内的执行 panic 后，
//! 当前任务（或整批）收到错误，worker 退出，supervisor 休眠后在同一个
//! 接收端上重启它。接收端由 supervisor 持有，重启不会丢失已排队的任务。

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::write_queue::{Shared, WriteTask};
use super::QueueError;
use crate::logging::{LogComponent, LogStage};
use crate::{ldebug, lerror};

/// worker 一轮运行的结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    /// 通道已关闭且排空
    Drained,
    /// 执行中发生 panic，需要重启
    Panicked,
}

/// 批量参数
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// 达到该条数立即提交
    pub max_size: usize,
    /// 定时提交间隔
    pub flush_interval: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_size: 50,
            flush_interval: Duration::from_millis(100),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 单条写入 worker 的 supervisor
pub(crate) async fn supervise_single(shared: Arc<Shared>, mut rx: mpsc::Receiver<WriteTask>) {
    loop {
        match run_single(&shared, &mut rx).await {
            WorkerExit::Drained => break,
            WorkerExit::Panicked => {
                tokio::time::sleep(shared.restart_delay).await;
                ldebug!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::WriteQueue,
                    "restart_worker",
                    "Restarting single-write worker",
                    queue = shared.label
                );
            }
        }
    }
}

/// 批量写入 worker 的 supervisor
pub(crate) async fn supervise_batch(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<WriteTask>,
    options: BatchOptions,
) {
    loop {
        match run_batch(&shared, &mut rx, options).await {
            WorkerExit::Drained => break,
            WorkerExit::Panicked => {
                tokio::time::sleep(shared.restart_delay).await;
                ldebug!(
                    "system",
                    LogStage::BackgroundTask,
                    LogComponent::WriteQueue,
                    "restart_worker",
                    "Restarting batch-write worker",
                    queue = shared.label
                );
            }
        }
    }
}

async fn run_single(shared: &Shared, rx: &mut mpsc::Receiver<WriteTask>) -> WorkerExit {
    loop {
        tokio::select! {
            maybe_task = rx.recv() => {
                let Some(task) = maybe_task else {
                    return WorkerExit::Drained;
                };
                if execute_one(shared, task).await == WorkerExit::Panicked {
                    return WorkerExit::Panicked;
                }
            }
            () = shared.shutdown.cancelled() => {
                rx.close();
                while let Some(task) = rx.recv().await {
                    if execute_one(shared, task).await == WorkerExit::Panicked {
                        return WorkerExit::Panicked;
                    }
                }
                return WorkerExit::Drained;
            }
        }
    }
}

async fn execute_one(shared: &Shared, task: WriteTask) -> WorkerExit {
    let WriteTask { statement, result } = task;
    let start = Instant::now();
    let outcome = AssertUnwindSafe(shared.backend.execute(&statement))
        .catch_unwind()
        .await;
    let latency = start.elapsed();

    match outcome {
        Ok(outcome) => {
            shared.record(1, latency, outcome.is_ok());
            let _ = result.send(outcome);
            WorkerExit::Drained
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            lerror!(
                "system",
                LogStage::Db,
                LogComponent::WriteQueue,
                "worker_panic",
                "Single-write worker panicked",
                queue = shared.label,
                panic = message
            );
            shared.record(1, latency, false);
            let _ = result.send(Err(QueueError::Panicked(message)));
            WorkerExit::Panicked
        }
    }
}

async fn run_batch(
    shared: &Shared,
    rx: &mut mpsc::Receiver<WriteTask>,
    options: BatchOptions,
) -> WorkerExit {
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + options.flush_interval,
        options.flush_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch: Vec<WriteTask> = Vec::with_capacity(options.max_size);

    loop {
        tokio::select! {
            maybe_task = rx.recv() => {
                let Some(task) = maybe_task else {
                    return commit_batch(shared, std::mem::take(&mut batch)).await;
                };
                batch.push(task);
                if batch.len() >= options.max_size
                    && commit_batch(shared, std::mem::take(&mut batch)).await == WorkerExit::Panicked
                {
                    return WorkerExit::Panicked;
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty()
                    && commit_batch(shared, std::mem::take(&mut batch)).await == WorkerExit::Panicked
                {
                    return WorkerExit::Panicked;
                }
            }
            () = shared.shutdown.cancelled() => {
                if commit_batch(shared, std::mem::take(&mut batch)).await == WorkerExit::Panicked {
                    return WorkerExit::Panicked;
                }
                rx.close();
                while let Some(task) = rx.recv().await {
                    batch.push(task);
                    if batch.len() >= options.max_size
                        && commit_batch(shared, std::mem::take(&mut batch)).await == WorkerExit::Panicked
                    {
                        return WorkerExit::Panicked;
                    }
                }
                return commit_batch(shared, std::mem::take(&mut batch)).await;
            }
        }
    }
}

/// 在一个事务中提交整批，所有任务收到同一个结果
async fn commit_batch(shared: &Shared, tasks: Vec<WriteTask>) -> WorkerExit {
    if tasks.is_empty() {
        return WorkerExit::Drained;
    }

    let count = tasks.len();
    let (statements, senders): (Vec<_>, Vec<_>) = tasks
        .into_iter()
        .map(|task| (task.statement, task.result))
        .unzip();

    let start = Instant::now();
    let outcome = AssertUnwindSafe(shared.backend.execute_batch(&statements))
        .catch_unwind()
        .await;
    let latency = start.elapsed();

    let (result, exit) = match outcome {
        Ok(result) => (result, WorkerExit::Drained),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            lerror!(
                "system",
                LogStage::Db,
                LogComponent::WriteQueue,
                "worker_panic",
                "Batch-write worker panicked",
                queue = shared.label,
                batch_size = count,
                panic = message
            );
            (Err(QueueError::Panicked(message)), WorkerExit::Panicked)
        }
    };

    shared.record(count, latency, result.is_ok());
    if result.is_ok() {
        shared.record_batch_commit();
    } else if exit == WorkerExit::Drained {
        lerror!(
            "system",
            LogStage::Db,
            LogComponent::WriteQueue,
            "commit_batch",
            "Batch commit failed, all tasks rolled back",
            queue = shared.label,
            batch_size = count,
            error = result.as_ref().err()
        );
    }

    for sender in senders {
        let _ = sender.send(result.clone());
    }
    exit
}
