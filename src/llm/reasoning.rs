//! Reasoning layer: wraps an LLM provider with tool calling and JSON
//! extraction, and reports token usage for every call.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, ToolCall, ToolCompletionRequest, ToolDefinition,
};

/// Context for a reasoning operation.
pub struct ReasoningContext {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub metadata: HashMap<String, String>,
}

impl ReasoningContext {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            tools: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Default for ReasoningContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Token usage from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of a reasoning call: either text or tool calls.
#[derive(Debug, Clone)]
pub enum RespondResult {
    /// The model responded with text.
    Text(String),
    /// The model wants to call tools.
    ToolCalls {
        tool_calls: Vec<ToolCall>,
        /// Optional text content alongside tool calls.
        content: Option<String>,
    },
}

impl RespondResult {
    /// Visible text, empty if the model only called tools.
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::ToolCalls { content, .. } => content.as_deref().unwrap_or(""),
        }
    }

    pub fn first_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::Text(_) => None,
            Self::ToolCalls { tool_calls, .. } => tool_calls.first(),
        }
    }
}

/// Output from a respond_with_tools call.
#[derive(Debug, Clone)]
pub struct RespondOutput {
    pub result: RespondResult,
    pub usage: TokenUsage,
}

/// Parsed value from an extraction pass, with the usage it cost.
#[derive(Debug, Clone)]
pub struct Extracted<T> {
    pub value: Option<T>,
    pub usage: TokenUsage,
}

/// Reasoning layer that wraps an LLM provider.
pub struct Reasoning {
    llm: Arc<dyn LlmProvider>,
    max_tokens: u32,
    temperature: f32,
}

impl Reasoning {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_tokens: 1024,
            temperature: 0.3,
        }
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Call the LLM with tool definitions, returning either text or tool calls.
    pub async fn respond_with_tools(
        &self,
        context: &ReasoningContext,
    ) -> Result<RespondOutput, LlmError> {
        let messages = context.messages.clone();

        if context.tools.is_empty() {
            let request = CompletionRequest::new(messages)
                .with_max_tokens(self.max_tokens)
                .with_temperature(self.temperature);
            let response = self.llm.complete(request).await?;
            return Ok(RespondOutput {
                result: RespondResult::Text(response.content),
                usage: TokenUsage {
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                },
            });
        }

        let mut request = ToolCompletionRequest::new(messages, context.tools.clone())
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature);
        request.metadata = context.metadata.clone();

        let response = self.llm.complete_with_tools(request).await?;

        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        if response.tool_calls.is_empty() {
            Ok(RespondOutput {
                result: RespondResult::Text(response.content.unwrap_or_default()),
                usage,
            })
        } else {
            Ok(RespondOutput {
                result: RespondResult::ToolCalls {
                    tool_calls: response.tool_calls,
                    content: response.content,
                },
                usage,
            })
        }
    }

    /// Run a JSON extraction pass and decode it into `T`.
    ///
    /// A reply that does not decode yields `value: None` with the usage
    /// still reported; only transport failures are errors.
    pub async fn extract_json<T: DeserializeOwned>(
        &self,
        prompt: &str,
    ) -> Result<Extracted<T>, LlmError> {
        let messages = vec![
            ChatMessage::system("You are a data extraction assistant. Output only valid JSON."),
            ChatMessage::user(prompt),
        ];
        let request = CompletionRequest::new(messages)
            .with_max_tokens(1024)
            .with_temperature(0.0);
        let response = self.llm.complete(request).await?;
        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };

        let value = match serde_json::from_str::<T>(strip_code_fence(&response.content)) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse extraction JSON: {}; raw: {}",
                    e,
                    response.content
                );
                None
            }
        };
        Ok(Extracted { value, usage })
    }
}

/// Models like to wrap JSON in Markdown fences.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn tool_call_result_text_defaults_to_empty() {
        let result = RespondResult::ToolCalls {
            tool_calls: vec![ToolCall {
                id: "1".into(),
                name: "advance_to_locator".into(),
                arguments: serde_json::json!({}),
            }],
            content: None,
        };
        assert_eq!(result.text(), "");
        assert_eq!(result.first_tool_call().unwrap().name, "advance_to_locator");
    }
}
