//! # 候选 provider 筛选
//!
//! 依次检查启用状态、配置自检、模型支持和拉黑状态，
//! 通过的 provider 按 level 升序分组，组内保持配置文件中的顺序。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::breaker::CircuitBreaker;
use crate::logging::{LogComponent, LogStage};
use crate::provider::{Platform, Provider, supports, validate_configuration};
use crate::{ldebug, linfo, lwarn};

/// provider 被跳过的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// 未启用或缺少地址/密钥
    Disabled,
    InvalidConfiguration { errors: Vec<String> },
    UnsupportedModel,
    CircuitBroken { until: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProvider {
    pub provider: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// 同一 level 的候选
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelGroup {
    pub level: i32,
    pub providers: Vec<Provider>,
}

/// 筛选结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePlan {
    /// 非空分组，level 升序
    pub levels: Vec<LevelGroup>,
    pub skipped: Vec<SkippedProvider>,
    /// 请求未携带模型时为 false，此时不做模型过滤
    pub model_filter_applied: bool,
}

impl CandidatePlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.levels.iter().map(|group| group.providers.len()).sum()
    }

    /// 按尝试顺序展开 `(level, provider)`
    pub fn candidates(&self) -> impl Iterator<Item = (i32, &Provider)> {
        self.levels
            .iter()
            .flat_map(|group| group.providers.iter().map(move |p| (group.level, p)))
    }
}

/// 从 provider 列表中筛选候选
pub async fn select_candidates(
    request_id: &str,
    platform: Platform,
    providers: Vec<Provider>,
    requested_model: &str,
    breaker: &dyn CircuitBreaker,
) -> CandidatePlan {
    let model_filter_applied = !requested_model.is_empty();
    if !model_filter_applied {
        lwarn!(
            request_id,
            LogStage::Routing,
            LogComponent::Selector,
            "model_missing",
            "请求未指定模型名，无法执行模型智能降级",
            platform = platform.as_str()
        );
    }

    let mut grouped: BTreeMap<i32, Vec<Provider>> = BTreeMap::new();
    let mut skipped = Vec::new();

    for provider in providers {
        let reason = if provider.is_usable() {
            skip_reason(platform, &provider, requested_model, breaker).await
        } else {
            Some(SkipReason::Disabled)
        };

        match reason {
            None => grouped
                .entry(provider.effective_level())
                .or_default()
                .push(provider),
            Some(reason) => {
                ldebug!(
                    request_id,
                    LogStage::Routing,
                    LogComponent::Selector,
                    "provider_skipped",
                    &format!("跳过 provider {}", provider.name),
                    reason = reason
                );
                skipped.push(SkippedProvider {
                    provider: provider.name,
                    reason,
                });
            }
        }
    }

    let plan = CandidatePlan {
        levels: grouped
            .into_iter()
            .map(|(level, providers)| LevelGroup { level, providers })
            .collect(),
        skipped,
        model_filter_applied,
    };

    linfo!(
        request_id,
        LogStage::Routing,
        LogComponent::Selector,
        "candidates_selected",
        &format!(
            "找到 {} 个可用的 provider（已过滤 {} 个）",
            plan.candidate_count(),
            plan.skipped.len()
        ),
        levels = plan.levels.iter().map(|g| g.level).collect::<Vec<_>>()
    );
    plan
}

async fn skip_reason(
    platform: Platform,
    provider: &Provider,
    requested_model: &str,
    breaker: &dyn CircuitBreaker,
) -> Option<SkipReason> {
    let errors = validate_configuration(provider);
    if !errors.is_empty() {
        return Some(SkipReason::InvalidConfiguration { errors });
    }

    if !requested_model.is_empty() && !supports(provider, requested_model) {
        return Some(SkipReason::UnsupportedModel);
    }

    let status = breaker.is_blacklisted(platform, &provider.name).await;
    status.blocked.then_some(SkipReason::CircuitBroken {
        until: status.until,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BlacklistStatus;
    use crate::error::Result;
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    struct BlockNamed(&'static str);

    #[async_trait]
    impl CircuitBreaker for BlockNamed {
        async fn is_blacklisted(&self, _platform: Platform, provider: &str) -> BlacklistStatus {
            if provider == self.0 {
                BlacklistStatus::blocked_until(Utc::now())
            } else {
                BlacklistStatus::open()
            }
        }

        async fn record_failure(&self, _platform: Platform, _provider: &str) -> Result<()> {
            Ok(())
        }

        async fn record_success(&self, _platform: Platform, _provider: &str) -> Result<()> {
            Ok(())
        }

        fn is_level_blacklist_enabled(&self) -> bool {
            false
        }
    }

    fn provider(name: &str, level: i32) -> Provider {
        Provider {
            name: name.to_string(),
            api_url: "https://api.example.com".to_string(),
            api_key: "sk-test".to_string(),
            enabled: true,
            level,
            ..Provider::default()
        }
    }

    fn names(plan: &CandidatePlan) -> Vec<(i32, &str)> {
        plan.candidates()
            .map(|(level, p)| (level, p.name.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn groups_by_level_and_keeps_source_order() {
        let providers = vec![
            provider("c", 2),
            provider("a", 1),
            provider("default-level", 0),
            provider("b", 1),
        ];
        let plan = select_candidates("t", Platform::Claude, providers, "m", &BlockNamed("")).await;

        assert_eq!(
            names(&plan),
            vec![(1, "a"), (1, "default-level"), (1, "b"), (2, "c")]
        );
        assert_eq!(plan.levels.len(), 2);
        assert!(plan.skipped.is_empty());
    }

    #[tokio::test]
    async fn records_every_skip_reason() {
        let mut disabled = provider("disabled", 1);
        disabled.enabled = false;

        let mut no_key = provider("no-key", 1);
        no_key.api_key = String::new();

        let mut invalid = provider("invalid", 1);
        invalid.model_mapping = IndexMap::from([("a".to_string(), "b".to_string())]);

        let mut unsupported = provider("unsupported", 1);
        unsupported.supported_models = IndexMap::from([("gpt-*".to_string(), true)]);

        let providers = vec![
            disabled,
            no_key,
            invalid,
            unsupported,
            provider("blocked", 1),
            provider("ok", 3),
        ];
        let plan = select_candidates(
            "t",
            Platform::Codex,
            providers,
            "claude-sonnet",
            &BlockNamed("blocked"),
        )
        .await;

        assert_eq!(names(&plan), vec![(3, "ok")]);
        let reasons: Vec<_> = plan
            .skipped
            .iter()
            .map(|s| (s.provider.as_str(), std::mem::discriminant(&s.reason)))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("disabled", std::mem::discriminant(&SkipReason::Disabled)),
                ("no-key", std::mem::discriminant(&SkipReason::Disabled)),
                (
                    "invalid",
                    std::mem::discriminant(&SkipReason::InvalidConfiguration { errors: vec![] })
                ),
                ("unsupported", std::mem::discriminant(&SkipReason::UnsupportedModel)),
                (
                    "blocked",
                    std::mem::discriminant(&SkipReason::CircuitBroken { until: None })
                ),
            ]
        );
    }

    #[tokio::test]
    async fn empty_model_skips_model_filter() {
        let mut narrow = provider("narrow", 1);
        narrow.supported_models = IndexMap::from([("gpt-5".to_string(), true)]);

        let plan = select_candidates("t", Platform::Codex, vec![narrow], "", &BlockNamed("")).await;
        assert!(!plan.model_filter_applied);
        assert_eq!(plan.candidate_count(), 1);
    }

    #[test]
    fn skipped_provider_serializes_flat() {
        let skipped = SkippedProvider {
            provider: "p".to_string(),
            reason: SkipReason::UnsupportedModel,
        };
        assert_eq!(
            serde_json::to_value(&skipped).unwrap(),
            serde_json::json!({"provider": "p", "reason": "unsupported_model"})
        );
    }
}
