//! # 队列统计
//!
//! 批量提交时假设批次耗时在各任务间均匀分布：平均延迟按任务数加权，
//! P99 样本按 `批次耗时 / 任务数` 逐条记录。批次内耗时差异大时统计会失真。

use serde::Serialize;
use std::time::Duration;

/// 环形缓冲区容量
const SAMPLE_CAPACITY: usize = 1000;
/// 样本数超过 100 后每 100 条重算一次 P99
const P99_REFRESH_EVERY: u64 = 100;

/// 对外暴露的统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub queue_length: usize,
    pub batch_queue_length: usize,
    pub total_writes: u64,
    pub success_writes: u64,
    pub failed_writes: u64,
    pub avg_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub batch_commits: u64,
}

/// 统计累加器，由队列在锁内更新
#[derive(Debug)]
pub(crate) struct StatsRecorder {
    stats: QueueStats,
    samples: Vec<f64>,
    sample_index: usize,
    sample_count: u64,
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self {
            stats: QueueStats::default(),
            samples: vec![0.0; SAMPLE_CAPACITY],
            sample_index: 0,
            sample_count: 0,
        }
    }
}

impl StatsRecorder {
    /// 记录一次执行结果；`count` 为该次执行覆盖的任务数
    pub(crate) fn record(&mut self, count: usize, latency: Duration, success: bool) {
        if count == 0 {
            return;
        }
        let count_u64 = count as u64;

        self.stats.total_writes += count_u64;
        if success {
            self.stats.success_writes += count_u64;
        } else {
            self.stats.failed_writes += count_u64;
        }

        let latency_ms = latency.as_secs_f64() * 1000.0;
        let old_total = (self.stats.total_writes - count_u64) as f64;
        self.stats.avg_latency_ms = latency_ms.mul_add(
            count as f64,
            self.stats.avg_latency_ms * old_total,
        ) / self.stats.total_writes as f64;

        let per_task_ms = latency_ms / count as f64;
        for _ in 0..count {
            self.samples[self.sample_index] = per_task_ms;
            self.sample_index = (self.sample_index + 1) % SAMPLE_CAPACITY;
            self.sample_count += 1;
        }

        if self.sample_count % P99_REFRESH_EVERY == 0 || self.sample_count < P99_REFRESH_EVERY {
            self.stats.p99_latency_ms = self.p99();
        }
    }

    pub(crate) fn record_batch_commit(&mut self) {
        self.stats.batch_commits += 1;
    }

    fn p99(&self) -> f64 {
        let valid = usize::try_from(self.sample_count)
            .unwrap_or(usize::MAX)
            .min(SAMPLE_CAPACITY);
        if valid == 0 {
            return 0.0;
        }
        let mut sorted = self.samples[..valid].to_vec();
        sorted.sort_by(f64::total_cmp);
        let index = ((valid as f64 * 0.99) as usize).min(valid - 1);
        sorted[index]
    }

    pub(crate) const fn snapshot(&self) -> QueueStats {
        self.stats
    }
}
