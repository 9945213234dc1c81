//! # 分级拉黑配置

use serde::{Deserialize, Serialize};

/// 拉黑到期后的兜底策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// 固定时长拉黑
    #[default]
    Fixed,
    /// 不拉黑
    None,
}

/// 分级拉黑配置
///
/// 升级算法由外部熔断服务实现，这里只描述其配置和取值范围。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistLevelConfig {
    /// 总开关：开启后 relay 只尝试最高优先级的候选
    pub enable_level_blacklist: bool,
    /// 连续失败多少次触发拉黑
    pub failure_threshold: u32,
    /// 失败去重窗口（秒）
    pub dedupe_window_seconds: u32,
    /// 无失败时自动降一级的间隔（小时）
    pub normal_degrade_interval_hours: f64,
    /// 宽恕触发时间（小时）
    pub forgiveness_hours: f64,
    /// 跳级惩罚窗口（小时）
    pub jump_penalty_window_hours: f64,
    pub l1_duration_minutes: u32,
    pub l2_duration_minutes: u32,
    pub l3_duration_minutes: u32,
    pub l4_duration_minutes: u32,
    pub l5_duration_minutes: u32,
    pub fallback_mode: FallbackMode,
    pub fallback_duration_minutes: u32,
}

impl Default for BlacklistLevelConfig {
    fn default() -> Self {
        Self {
            enable_level_blacklist: false,
            failure_threshold: 3,
            dedupe_window_seconds: 2,
            normal_degrade_interval_hours: 1.0,
            forgiveness_hours: 3.0,
            jump_penalty_window_hours: 2.5,
            l1_duration_minutes: 5,
            l2_duration_minutes: 15,
            l3_duration_minutes: 60,
            l4_duration_minutes: 180,
            l5_duration_minutes: 720,
            fallback_mode: FallbackMode::Fixed,
            fallback_duration_minutes: 30,
        }
    }
}

impl BlacklistLevelConfig {
    /// 各级拉黑时长（分钟），L1 到 L5
    #[must_use]
    pub const fn tier_minutes(&self) -> [u32; 5] {
        [
            self.l1_duration_minutes,
            self.l2_duration_minutes,
            self.l3_duration_minutes,
            self.l4_duration_minutes,
            self.l5_duration_minutes,
        ]
    }

    /// 验证配置取值范围
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.failure_threshold) {
            return Err("失败阈值必须在 1-10 之间".to_string());
        }
        if !(1..=300).contains(&self.dedupe_window_seconds) {
            return Err("去重窗口必须在 1-300 秒之间".to_string());
        }
        if !(0.1..=24.0).contains(&self.normal_degrade_interval_hours) {
            return Err("正常降级间隔必须在 0.1-24 小时之间".to_string());
        }
        if !(0.5..=72.0).contains(&self.forgiveness_hours) {
            return Err("宽恕触发时间必须在 0.5-72 小时之间".to_string());
        }
        if !(0.1..=24.0).contains(&self.jump_penalty_window_hours) {
            return Err("跳级惩罚窗口必须在 0.1-24 小时之间".to_string());
        }

        let tiers = self.tier_minutes();
        if !(1..=10080).contains(&tiers[0]) {
            return Err("L1 拉黑时长必须在 1-10080 分钟之间".to_string());
        }
        for (index, pair) in tiers.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(format!("L{} 拉黑时长必须大于 L{}", index + 2, index + 1));
            }
        }

        if !(1..=10080).contains(&self.fallback_duration_minutes) {
            return Err("fallback 拉黑时长必须在 1-10080 分钟之间".to_string());
        }
        Ok(())
    }
}
