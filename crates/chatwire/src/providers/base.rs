use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Build from input and output counts, deriving the total
    pub fn from_counts(input_tokens: Option<i32>, output_tokens: Option<i32>) -> Self {
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };
        Self::new(input_tokens, output_tokens, total_tokens)
    }

    /// `(input, output)`, zero where the vendor did not report a count
    pub fn tokens(&self) -> (i32, i32) {
        (
            self.input_tokens.unwrap_or(0),
            self.output_tokens.unwrap_or(0),
        )
    }
}

/// Base trait for AI providers (OpenAI, Anthropic, etc)
///
/// `send_message` takes `&mut self` because some providers keep session state
/// between calls; share an instance across tasks only behind a lock.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send the conversation and return the model's reply.
    ///
    /// Whether `messages` must already include `prompt` differs per provider:
    /// Google expects the new prompt as the last entry of `messages`, the
    /// others append `prompt` as a trailing user turn themselves.
    async fn send_message(
        &mut self,
        prompt: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Message>;

    /// Wrap the output of a tool call so it can be sent back to the model
    fn create_tool_response(&self, tool_call_id: &str, content: &Value) -> Result<Message>;

    /// Whether the configured model can call tools
    async fn supports_tools(&self) -> bool;

    fn name(&self) -> &'static str;
}
