//! Bridges rig-core completion models to [`LlmProvider`].
//!
//! System messages are folded into rig's preamble; the last user message
//! becomes the prompt and everything before it the chat history.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionModel, Message};
use rust_decimal::Decimal;

use super::costs;
use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role, ToolCall,
    ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};
use crate::error::LlmError;

/// Adapter from any rig `CompletionModel` to our provider trait.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Result<(Option<String>, Vec<ToolCall>, u32, u32), LlmError> {
        let (preamble, history, prompt) = split_messages(messages);

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if !tools.is_empty() {
            builder = builder.tools(
                tools
                    .iter()
                    .map(|t| rig::completion::ToolDefinition {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    })
                    .collect(),
            );
        }
        if let Some(max_tokens) = max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        if let Some(temperature) = temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.model_name.clone(),
            reason: e.to_string(),
        })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for content in response.choice.iter() {
            match content {
                AssistantContent::Text(t) => text.push_str(&t.text),
                AssistantContent::ToolCall(call) => tool_calls.push(ToolCall {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                }),
                _ => {}
            }
        }

        let input_tokens = u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX);
        let output_tokens = u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX);
        let text = (!text.trim().is_empty()).then_some(text);
        Ok((text, tool_calls, input_tokens, output_tokens))
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        costs::model_cost(&self.model_name).unwrap_or_else(costs::default_cost)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (text, _, input_tokens, output_tokens) = self
            .send(
                &request.messages,
                &[],
                request.max_tokens,
                request.temperature,
            )
            .await?;
        Ok(CompletionResponse {
            content: text.unwrap_or_default(),
            input_tokens,
            output_tokens,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let (content, tool_calls, input_tokens, output_tokens) = self
            .send(
                &request.messages,
                &request.tools,
                request.max_tokens,
                request.temperature,
            )
            .await?;
        let finish_reason = if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolUse
        };
        Ok(ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens,
            output_tokens,
            finish_reason,
            response_id: None,
        })
    }
}

/// Split into (preamble, history, prompt).
fn split_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Message>, Message) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));

    let mut dialogue: Vec<&ChatMessage> =
        messages.iter().filter(|m| m.role != Role::System).collect();
    let prompt = match dialogue.last() {
        Some(last) if last.role == Role::User => {
            let text = last.content.clone();
            dialogue.pop();
            Message::user(text)
        }
        _ => Message::user("(continúa)"),
    };

    let history = dialogue
        .into_iter()
        .map(|m| match m.role {
            Role::Assistant => Message::assistant(m.content.clone()),
            _ => Message::user(m.content.clone()),
        })
        .collect();

    (preamble, history, prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_folds_system_and_pops_prompt() {
        let messages = vec![
            ChatMessage::system("stage rules"),
            ChatMessage::user("hola"),
            ChatMessage::assistant("¿en qué te ayudo?"),
            ChatMessage::system("context"),
            ChatMessage::user("necesito un taxi"),
        ];
        let (preamble, history, _prompt) = split_messages(&messages);
        assert_eq!(preamble.as_deref(), Some("stage rules\n\ncontext"));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn split_without_trailing_user_message_uses_placeholder() {
        let (preamble, history, _prompt) = split_messages(&[ChatMessage::assistant("hola")]);
        assert!(preamble.is_none());
        assert_eq!(history.len(), 1);
    }
}
