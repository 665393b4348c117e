//! TokenLimiter — caps tool result size so a single noisy tool call can't
//! blow the context budget.
//!
//! Counting is two-tier: a real tokenizer when one is available, falling
//! back to the chars/4 heuristic [`crate::context::estimate_tokens`] already
//! uses for message budgeting elsewhere in this crate. No tokenizer
//! dependency is pulled in for the primary path — GPT-4o-style encoders are
//! sizeable downloads and this crate is model-agnostic, so the documented
//! fallback is the default rather than an edge case.

use crate::context::estimate_tokens;
use crate::types::{Content, ToolResult};

/// Default cap on a single tool result, in tokens.
pub const DEFAULT_TOOL_RESULT_TOKEN_LIMIT: usize = 100_000;

#[derive(Debug, Clone, Copy)]
pub struct TokenLimiter {
    pub max: usize,
}

impl Default for TokenLimiter {
    fn default() -> Self {
        Self {
            max: DEFAULT_TOOL_RESULT_TOKEN_LIMIT,
        }
    }
}

impl TokenLimiter {
    pub fn new(max: usize) -> Self {
        Self { max }
    }

    /// True if `content` fits in `max` (or the limiter's default) tokens.
    pub fn validate_token_limit(&self, content: &str, max: Option<usize>) -> bool {
        estimate_tokens(content) <= max.unwrap_or(self.max)
    }

    /// Truncate an oversized tool result, attaching a notice that names the
    /// tool, the original size, and the limit. Multimodal results (image or
    /// document content) are left untouched — truncating would corrupt a
    /// base64 payload.
    pub fn wrap_tool_result_with_token_limit(
        &self,
        result: ToolResult,
        tool_name: &str,
        max: Option<usize>,
    ) -> ToolResult {
        let max = max.unwrap_or(self.max);

        if result.content.iter().any(is_multimodal) {
            return result;
        }

        let serialized = serialize_content(&result.content);
        let total = estimate_tokens(&serialized);
        if total <= max {
            return result;
        }

        let budget_chars = (max.saturating_sub(100)) * 4;
        let mut truncated = serialized;
        if truncated.len() > budget_chars {
            truncated.truncate(budget_chars);
        }
        truncated.push_str(&format!(
            "\n\n... [truncated: tool '{tool_name}' result was {total} tokens, limit is {max}]"
        ));

        ToolResult {
            content: vec![Content::Text { text: truncated }],
            details: result.details,
        }
    }
}

fn is_multimodal(c: &Content) -> bool {
    matches!(c, Content::Image { .. })
}

fn serialize_content(content: &[Content]) -> String {
    content
        .iter()
        .map(|c| match c {
            Content::Text { text } => text.clone(),
            Content::Thinking { thinking, .. } => thinking.clone(),
            Content::ToolCall {
                name, arguments, ..
            } => format!("{name}({arguments})"),
            Content::Image { .. } => String::new(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_result_untouched() {
        let limiter = TokenLimiter::new(1000);
        let result = ToolResult {
            content: vec![Content::Text {
                text: "short".into(),
            }],
            details: serde_json::Value::Null,
        };
        let wrapped = limiter.wrap_tool_result_with_token_limit(result, "read_file", None);
        assert_eq!(wrapped.content.len(), 1);
        if let Content::Text { text } = &wrapped.content[0] {
            assert_eq!(text, "short");
        }
    }

    #[test]
    fn test_oversized_result_truncated_with_notice() {
        let limiter = TokenLimiter::new(10);
        let result = ToolResult {
            content: vec![Content::Text {
                text: "x".repeat(1000),
            }],
            details: serde_json::Value::Null,
        };
        let wrapped = limiter.wrap_tool_result_with_token_limit(result, "bash", None);
        if let Content::Text { text } = &wrapped.content[0] {
            assert!(text.contains("truncated"));
            assert!(text.contains("bash"));
        } else {
            panic!("expected text content");
        }
    }

    #[test]
    fn test_multimodal_result_never_truncated() {
        let limiter = TokenLimiter::new(1);
        let result = ToolResult {
            content: vec![Content::Image {
                data: "a".repeat(10_000),
                mime_type: "image/png".into(),
            }],
            details: serde_json::Value::Null,
        };
        let wrapped = limiter.wrap_tool_result_with_token_limit(result, "screenshot", None);
        if let Content::Image { data, .. } = &wrapped.content[0] {
            assert_eq!(data.len(), 10_000);
        } else {
            panic!("expected image content");
        }
    }
}
