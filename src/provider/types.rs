//! Provider 标识及通用类型

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 上游协议族
///
/// 每个协议族对应一组入口路径、一种用量字段布局和一份 provider 列表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Messages 协议（`/v1/messages`）
    Claude,
    /// Responses 协议（`/responses`）
    Codex,
    /// generateContent 协议（`/gemini/v1beta/*`）
    Gemini,
}

impl Platform {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
        }
    }

    /// provider 列表对应的文件名
    #[must_use]
    pub const fn store_file_name(self) -> &'static str {
        match self {
            Self::Claude => "claude-code.json",
            Self::Codex => "codex.json",
            Self::Gemini => "gemini.json",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" | "claude-code" | "claude_code" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("unknown provider platform: {other}")),
        }
    }
}

/// 一个上游 provider 配置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, rename = "officialSite", skip_serializing_if = "String::is_empty")]
    pub site: String,
    #[serde(default)]
    pub enabled: bool,
    /// 模型白名单（支持单个 `*` 通配符），值为 false 的条目视为未配置
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub supported_models: IndexMap<String, bool>,
    /// 模型映射表：请求模型 -> 上游模型，按声明顺序匹配通配符
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub model_mapping: IndexMap<String, String>,
    /// 降级优先级，越小越先尝试；0 或缺省视为 1
    #[serde(default, skip_serializing_if = "is_zero")]
    pub level: i32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(level: &i32) -> bool {
    *level == 0
}

impl Provider {
    /// 生效的优先级
    #[must_use]
    pub const fn effective_level(&self) -> i32 {
        if self.level <= 0 { 1 } else { self.level }
    }

    /// 基础可用性：启用且配置了地址与密钥
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.api_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }

    /// 白名单中启用的模型模式
    pub fn allowed_patterns(&self) -> impl Iterator<Item = &str> {
        self.supported_models
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(pattern, _)| pattern.as_str())
    }

    #[must_use]
    pub fn has_allow_set(&self) -> bool {
        self.allowed_patterns().next().is_some()
    }

    #[must_use]
    pub fn has_mapping(&self) -> bool {
        !self.model_mapping.is_empty()
    }
}
