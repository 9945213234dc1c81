//! 不升级的默认熔断实现：从不拉黑，只记录上报。

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use super::{BlacklistLevelConfig, BlacklistStatus, CircuitBreaker};
use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::provider::Platform;
use crate::{ldebug, lwarn};

#[derive(Debug, Default)]
pub struct StaticBreaker {
    level_blacklist_enabled: AtomicBool,
    failures: AtomicU64,
    successes: AtomicU64,
}

impl StaticBreaker {
    #[must_use]
    pub fn new(config: &BlacklistLevelConfig) -> Self {
        Self {
            level_blacklist_enabled: AtomicBool::new(config.enable_level_blacklist),
            ..Self::default()
        }
    }

    /// 切换严格模式开关，下一次请求生效
    pub fn set_level_blacklist_enabled(&self, enabled: bool) {
        self.level_blacklist_enabled.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn failure_reports(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn success_reports(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CircuitBreaker for StaticBreaker {
    async fn is_blacklisted(&self, _platform: Platform, _provider: &str) -> BlacklistStatus {
        BlacklistStatus::open()
    }

    async fn record_failure(&self, platform: Platform, provider: &str) -> Result<()> {
        let total = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
        lwarn!(
            "system",
            LogStage::ResponseFailure,
            LogComponent::Breaker,
            "record_failure",
            "Provider failure reported",
            platform = platform.as_str(),
            provider = provider,
            total_failures = total
        );
        Ok(())
    }

    async fn record_success(&self, platform: Platform, provider: &str) -> Result<()> {
        self.successes.fetch_add(1, Ordering::Relaxed);
        ldebug!(
            "system",
            LogStage::Response,
            LogComponent::Breaker,
            "record_success",
            "Provider success reported",
            platform = platform.as_str(),
            provider = provider
        );
        Ok(())
    }

    fn is_level_blacklist_enabled(&self) -> bool {
        self.level_blacklist_enabled.load(Ordering::Relaxed)
    }
}
