//! # Token 用量解析
//!
//! 三个协议族的用量字段布局不同：
//! - claude：`message.usage.*` 与 `usage.*` 逐事件累加
//! - codex：`response.usage.*` 逐事件累加
//! - gemini：每个 chunk 携带截至当前的累计值，取最大值

use serde::Serialize;
use serde_json::Value;

use crate::provider::Platform;

/// 一次转发的 token 用量，只增不减
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
}

fn int_at(value: &Value, path: &[&str]) -> i64 {
    path.iter()
        .try_fold(value, |node, key| node.get(*key))
        .and_then(Value::as_i64)
        .unwrap_or(0)
        .max(0)
}

/// 累加到上限即停，不会溢出
fn accumulate(total: &mut i64, value: i64) {
    *total = total.saturating_add(value);
}

/// 按协议族提取用量
pub trait UsageParser: Send + Sync {
    /// 处理流式响应中的一个事件
    fn observe_event(&self, data: &Value, usage: &mut TokenUsage);

    /// 处理完整的非流式响应体
    fn observe_body(&self, body: &Value, usage: &mut TokenUsage);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeUsageParser;

impl UsageParser for ClaudeUsageParser {
    fn observe_event(&self, data: &Value, usage: &mut TokenUsage) {
        accumulate(&mut usage.input_tokens, int_at(data, &["message", "usage", "input_tokens"]));
        accumulate(&mut usage.output_tokens, int_at(data, &["message", "usage", "output_tokens"]));
        accumulate(
            &mut usage.cache_create_tokens,
            int_at(data, &["message", "usage", "cache_creation_input_tokens"]),
        );
        accumulate(
            &mut usage.cache_read_tokens,
            int_at(data, &["message", "usage", "cache_read_input_tokens"]),
        );

        accumulate(&mut usage.input_tokens, int_at(data, &["usage", "input_tokens"]));
        accumulate(&mut usage.output_tokens, int_at(data, &["usage", "output_tokens"]));
    }

    fn observe_body(&self, body: &Value, usage: &mut TokenUsage) {
        accumulate(&mut usage.input_tokens, int_at(body, &["usage", "input_tokens"]));
        accumulate(&mut usage.output_tokens, int_at(body, &["usage", "output_tokens"]));
        accumulate(
            &mut usage.cache_create_tokens,
            int_at(body, &["usage", "cache_creation_input_tokens"]),
        );
        accumulate(
            &mut usage.cache_read_tokens,
            int_at(body, &["usage", "cache_read_input_tokens"]),
        );
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CodexUsageParser;

impl CodexUsageParser {
    fn add_usage(usage_node: Option<&Value>, usage: &mut TokenUsage) {
        let Some(node) = usage_node else {
            return;
        };
        accumulate(&mut usage.input_tokens, int_at(node, &["input_tokens"]));
        accumulate(&mut usage.output_tokens, int_at(node, &["output_tokens"]));
        accumulate(
            &mut usage.cache_read_tokens,
            int_at(node, &["input_tokens_details", "cached_tokens"]),
        );
        accumulate(
            &mut usage.reasoning_tokens,
            int_at(node, &["output_tokens_details", "reasoning_tokens"]),
        );
    }
}

impl UsageParser for CodexUsageParser {
    fn observe_event(&self, data: &Value, usage: &mut TokenUsage) {
        Self::add_usage(data.get("response").and_then(|r| r.get("usage")), usage);
    }

    fn observe_body(&self, body: &Value, usage: &mut TokenUsage) {
        Self::add_usage(body.get("usage"), usage);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiUsageParser;

impl GeminiUsageParser {
    fn merge_max(metadata: &Value, usage: &mut TokenUsage) {
        usage.input_tokens = usage.input_tokens.max(int_at(metadata, &["promptTokenCount"]));
        usage.output_tokens = usage
            .output_tokens
            .max(int_at(metadata, &["candidatesTokenCount"]));
        usage.cache_read_tokens = usage
            .cache_read_tokens
            .max(int_at(metadata, &["cachedContentTokenCount"]));

        // 只给出 totalTokenCount 时按 total - input 估算输出
        let total = int_at(metadata, &["totalTokenCount"]);
        if usage.output_tokens == 0 && usage.input_tokens > 0 && usage.input_tokens < total {
            usage.output_tokens = total - usage.input_tokens;
        }
    }
}

impl UsageParser for GeminiUsageParser {
    fn observe_event(&self, data: &Value, usage: &mut TokenUsage) {
        if let Some(metadata) = data.get("usageMetadata") {
            Self::merge_max(metadata, usage);
        }
    }

    fn observe_body(&self, body: &Value, usage: &mut TokenUsage) {
        self.observe_event(body, usage);
    }
}

/// 协议族对应的解析器
#[must_use]
pub fn parser_for(platform: Platform) -> &'static dyn UsageParser {
    match platform {
        Platform::Claude => &ClaudeUsageParser,
        Platform::Codex => &CodexUsageParser,
        Platform::Gemini => &GeminiUsageParser,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn claude_stream_sums_message_and_delta_usage() {
        let parser = parser_for(Platform::Claude);
        let mut usage = TokenUsage::default();
        parser.observe_event(
            &json!({"type":"message_start","message":{"usage":{
                "input_tokens": 100, "output_tokens": 1,
                "cache_creation_input_tokens": 20, "cache_read_input_tokens": 30}}}),
            &mut usage,
        );
        parser.observe_event(&json!({"type":"content_block_delta","delta":{"text":"hi"}}), &mut usage);
        parser.observe_event(
            &json!({"type":"message_delta","usage":{"output_tokens": 41}}),
            &mut usage,
        );

        assert_eq!(
            usage,
            TokenUsage {
                input_tokens: 100,
                output_tokens: 42,
                cache_create_tokens: 20,
                cache_read_tokens: 30,
                reasoning_tokens: 0,
            }
        );
    }

    #[test]
    fn codex_reads_completed_response_usage() {
        let parser = parser_for(Platform::Codex);
        let mut usage = TokenUsage::default();
        parser.observe_event(&json!({"type":"response.created","response":{}}), &mut usage);
        parser.observe_event(
            &json!({"type":"response.completed","response":{"usage":{
                "input_tokens": 500, "output_tokens": 80,
                "input_tokens_details": {"cached_tokens": 200},
                "output_tokens_details": {"reasoning_tokens": 64}}}}),
            &mut usage,
        );
        assert_eq!(usage.input_tokens, 500);
        assert_eq!(usage.output_tokens, 80);
        assert_eq!(usage.cache_read_tokens, 200);
        assert_eq!(usage.reasoning_tokens, 64);
    }

    #[test]
    fn gemini_cumulative_counts_take_the_maximum() {
        let parser = parser_for(Platform::Gemini);
        let mut usage = TokenUsage::default();
        for candidates in [10, 25, 40] {
            parser.observe_event(
                &json!({"usageMetadata":{"promptTokenCount": 7, "candidatesTokenCount": candidates}}),
                &mut usage,
            );
        }
        assert_eq!(usage.output_tokens, 40);
        assert_eq!(usage.input_tokens, 7);
    }

    #[test]
    fn gemini_derives_output_from_total() {
        let mut usage = TokenUsage::default();
        parser_for(Platform::Gemini).observe_body(
            &json!({"usageMetadata":{"promptTokenCount": 12, "totalTokenCount": 30}}),
            &mut usage,
        );
        assert_eq!(usage.output_tokens, 18);
    }

    #[test]
    fn non_stream_bodies_use_root_usage() {
        let mut usage = TokenUsage::default();
        parser_for(Platform::Claude).observe_body(
            &json!({"usage":{"input_tokens": 9, "output_tokens": 4, "cache_read_input_tokens": 2}}),
            &mut usage,
        );
        assert_eq!((usage.input_tokens, usage.output_tokens, usage.cache_read_tokens), (9, 4, 2));

        let mut usage = TokenUsage::default();
        parser_for(Platform::Codex).observe_body(
            &json!({"usage":{"input_tokens": 3, "output_tokens": 5}}),
            &mut usage,
        );
        assert_eq!((usage.input_tokens, usage.output_tokens), (3, 5));
    }

    #[test]
    fn huge_counts_saturate_instead_of_overflowing() {
        let parser = parser_for(Platform::Claude);
        let mut usage = TokenUsage::default();
        for _ in 0..2 {
            parser.observe_event(
                &json!({
                    "message": {"usage": {"input_tokens": i64::MAX}},
                    "usage": {"output_tokens": i64::MAX}
                }),
                &mut usage,
            );
        }
        assert_eq!((usage.input_tokens, usage.output_tokens), (i64::MAX, i64::MAX));

        let mut usage = TokenUsage::default();
        let event = json!({"type":"response.completed","response":{"usage":{
            "input_tokens": i64::MAX,
            "output_tokens_details": {"reasoning_tokens": i64::MAX}}}});
        parser_for(Platform::Codex).observe_event(&event, &mut usage);
        parser_for(Platform::Codex).observe_event(&event, &mut usage);
        assert_eq!(usage.input_tokens, i64::MAX);
        assert_eq!(usage.reasoning_tokens, i64::MAX);
    }
}
