//! # 熔断查询接口
//!
//! relay 只通过 [`CircuitBreaker`] 询问某个 provider 是否被拉黑、上报一次
//! 转发的成败，以及是否启用分级拉黑（严格模式）。升级与恢复算法不在本 crate 内。

mod config;
mod static_breaker;

pub use config::{BlacklistLevelConfig, FallbackMode};
pub use static_breaker::StaticBreaker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::provider::Platform;

/// 拉黑查询结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlacklistStatus {
    pub blocked: bool,
    /// 拉黑截止时间，未拉黑时为 None
    pub until: Option<DateTime<Utc>>,
}

impl BlacklistStatus {
    #[must_use]
    pub const fn open() -> Self {
        Self {
            blocked: false,
            until: None,
        }
    }

    #[must_use]
    pub const fn blocked_until(until: DateTime<Utc>) -> Self {
        Self {
            blocked: true,
            until: Some(until),
        }
    }
}

/// 熔断服务
#[async_trait]
pub trait CircuitBreaker: Send + Sync {
    async fn is_blacklisted(&self, platform: Platform, provider: &str) -> BlacklistStatus;

    /// 上报一次上游失败（客户端中断不会上报）
    async fn record_failure(&self, platform: Platform, provider: &str) -> Result<()>;

    async fn record_success(&self, platform: Platform, provider: &str) -> Result<()>;

    /// 是否启用分级拉黑；启用时 relay 进入严格模式
    fn is_level_blacklist_enabled(&self) -> bool;
}
