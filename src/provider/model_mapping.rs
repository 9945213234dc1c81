//! # 模型映射
//!
//! 判断 provider 是否支持请求的模型、计算实际发往上游的模型名，
//! 以及在不做完整反序列化的前提下改写请求体 / 请求路径中的模型名。
//!
//! 模式语法只支持单个 `*`：`claude-*`（前缀）、`*-4`（后缀）、
//! `claude-*-4`（中间）。不含 `*` 的模式按精确匹配处理。

use bytes::Bytes;
use indexmap::IndexMap;
use serde_json::value::RawValue;
use thiserror::Error;

use super::types::Provider;

/// 模型改写错误
#[derive(Debug, Error)]
pub enum MappingError {
    /// 请求体中不存在需要改写的字段
    #[error("请求体中未找到 {field} 字段")]
    FieldMissing { field: &'static str },

    /// 请求体不是 JSON 对象
    #[error("请求体不是合法的 JSON 对象: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// 请求路径中没有 `models/{model}` 段
    #[error("请求路径中未找到模型段: {path}")]
    PathModelMissing { path: String },
}

/// 拆分出通配符前后缀；不含 `*` 时返回 None
fn split_pattern(pattern: &str) -> Option<(&str, &str)> {
    pattern.split_once('*')
}

/// 返回通配符 `*` 捕获的子串；不匹配时返回 None
///
/// 不含 `*` 的模式在精确相等时返回空串。
#[must_use]
pub fn capture_wildcard<'a>(pattern: &str, text: &'a str) -> Option<&'a str> {
    let Some((prefix, suffix)) = split_pattern(pattern) else {
        return (pattern == text).then_some("");
    };
    if text.len() < prefix.len() + suffix.len() {
        return None;
    }
    let rest = text.strip_prefix(prefix)?;
    rest.strip_suffix(suffix)
}

/// 通配符匹配
#[must_use]
pub fn match_wildcard(pattern: &str, text: &str) -> bool {
    capture_wildcard(pattern, text).is_some()
}

/// 按通配符映射生成目标模型名
///
/// 替换串不含 `*` 时原样返回；模式与输入不匹配时也返回替换串本身，
/// 调用方需先确认匹配。
#[must_use]
pub fn apply_wildcard_mapping(pattern: &str, replacement: &str, input: &str) -> String {
    if !pattern.contains('*') || !replacement.contains('*') {
        return replacement.to_string();
    }
    capture_wildcard(pattern, input).map_or_else(
        || replacement.to_string(),
        |captured| replacement.replacen('*', captured, 1),
    )
}

/// 查找映射结果：精确条目优先，其次按声明顺序匹配通配符条目
fn find_mapping(provider: &Provider, requested: &str) -> Option<String> {
    if let Some(target) = provider.model_mapping.get(requested) {
        return Some(target.clone());
    }
    provider
        .model_mapping
        .iter()
        .filter(|(pattern, _)| pattern.contains('*'))
        .find(|(pattern, _)| match_wildcard(pattern, requested))
        .map(|(pattern, replacement)| apply_wildcard_mapping(pattern, replacement, requested))
}

fn allow_set_matches(provider: &Provider, model: &str) -> bool {
    provider
        .allowed_patterns()
        .any(|pattern| pattern == model || match_wildcard(pattern, model))
}

/// provider 是否支持请求的模型
///
/// 白名单与映射表都未配置时视为支持所有模型；命中映射时以映射后的模型
/// 检查白名单。
#[must_use]
pub fn supports(provider: &Provider, model: &str) -> bool {
    let has_allow_set = provider.has_allow_set();
    if !has_allow_set && !provider.has_mapping() {
        return true;
    }
    if allow_set_matches(provider, model) {
        return true;
    }
    match find_mapping(provider, model) {
        Some(mapped) => !has_allow_set || allow_set_matches(provider, &mapped),
        None => false,
    }
}

/// 实际发往上游的模型名，无映射时原样返回
#[must_use]
pub fn effective_model(provider: &Provider, requested: &str) -> String {
    if requested.is_empty() {
        return String::new();
    }
    find_mapping(provider, requested).unwrap_or_else(|| requested.to_string())
}

/// provider 配置自检，返回所有问题描述；为空表示配置有效
#[must_use]
pub fn validate_configuration(provider: &Provider) -> Vec<String> {
    let mut errors = Vec::new();
    if !provider.has_mapping() {
        return errors;
    }
    if !provider.has_allow_set() {
        errors.push(format!(
            "provider '{}' 配置了 modelMapping 但未配置 supportedModels",
            provider.name
        ));
        return errors;
    }

    for (source, target) in &provider.model_mapping {
        if source.contains('*') || target.contains('*') {
            continue;
        }
        if source == target {
            errors.push(format!("模型 '{source}' 映射到自身，映射无意义"));
            continue;
        }
        if !allow_set_matches(provider, target) {
            errors.push(format!(
                "映射目标 '{target}'（来自 '{source}'）不在 supportedModels 中"
            ));
        }
    }
    errors
}

/// 替换 JSON 对象顶层的一个字符串字段
///
/// 其它字段以原始文本保留（字节不变、顺序不变），只有目标字段被重新序列化。
pub fn patch_top_level_string(
    body: &[u8],
    field: &'static str,
    value: &str,
) -> Result<Bytes, MappingError> {
    let mut object: IndexMap<String, Box<RawValue>> = serde_json::from_slice(body)?;
    let slot = object
        .get_mut(field)
        .ok_or(MappingError::FieldMissing { field })?;
    *slot = RawValue::from_string(serde_json::to_string(value)?)?;
    Ok(Bytes::from(serde_json::to_vec(&object)?))
}

/// 改写请求体中的 `model` 字段
pub fn rewrite_body(body: &[u8], new_model: &str) -> Result<Bytes, MappingError> {
    patch_top_level_string(body, "model", new_model)
}

/// 定位 `models/{model}` 段在路径中的字节范围
fn path_model_span(path: &str) -> Option<(usize, usize)> {
    let marker = "models/";
    let start = path.find(marker)? + marker.len();
    let tail = &path[start..];
    let len = tail.find([':', '/', '?']).unwrap_or(tail.len());
    (len > 0).then_some((start, start + len))
}

/// 从 generateContent 路径中提取模型名
#[must_use]
pub fn requested_model_from_path(path: &str) -> Option<&str> {
    path_model_span(path).map(|(start, end)| &path[start..end])
}

/// 改写 generateContent 路径中的模型名
pub fn rewrite_path_model(path: &str, new_model: &str) -> Result<String, MappingError> {
    let (start, end) = path_model_span(path).ok_or_else(|| MappingError::PathModelMissing {
        path: path.to_string(),
    })?;
    Ok(format!("{}{}{}", &path[..start], new_model, &path[end..]))
}
