use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::AnthropicProviderConfig;
use super::utils::{decode_response, normalize_base_url};
use crate::errors::ProviderError;
use crate::models::content::ToolResultBlock;
use crate::models::message::{ChatMessage, Message};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const ANTHROPIC_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_MAX_TOKENS: i32 = 4096;

/// A content block of the Messages API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        /// Only set on locally built tool responses; never sent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageParam {
    pub role: Role,
    pub content: Vec<AnthropicBlock>,
}

#[derive(Debug, Serialize)]
struct InputSchema<'a> {
    #[serde(rename = "type")]
    schema_type: &'a str,
    properties: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    required: &'a [String],
}

#[derive(Debug, Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: InputSchema<'a>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    model: &'a str,
    messages: Vec<MessageParam>,
    max_tokens: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    system: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AnthropicUsage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
}

/// A Messages API response, or a locally built tool response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnthropicMessage {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: Vec<AnthropicBlock>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

// Text recovered from one tool_result block: string content, then the `text`
// fields of an array of maps, then the block's own text.
fn tool_result_texts(content: Option<&Value>, text: Option<&str>) -> Vec<String> {
    let mut texts = Vec::new();
    match content {
        Some(Value::String(s)) => texts.push(s.clone()),
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::Object(map) => {
                        if let Some(text) = map.get("text") {
                            texts.push(display_value(text));
                        }
                    }
                    other => texts.push(display_value(other)),
                }
            }
        }
        _ => {}
    }

    if texts.is_empty() {
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            texts.push(text.to_string());
        }
    }
    texts
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ChatMessage for AnthropicMessage {
    fn role(&self) -> Role {
        self.role
    }

    fn content(&self) -> String {
        let mut parts = Vec::new();
        for block in &self.content {
            match block {
                AnthropicBlock::Text { text } => parts.push(text.clone()),
                AnthropicBlock::ToolResult { content, text, .. } => {
                    parts.extend(tool_result_texts(content.as_ref(), text.as_deref()))
                }
                _ => {}
            }
        }
        parts.join(" ").trim().to_string()
    }

    fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                AnthropicBlock::ToolUse { id, name, input } => {
                    Some(ToolCall::from_value(id, name, input.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn tool_response(&self) -> Option<String> {
        self.content.iter().find_map(|block| match block {
            AnthropicBlock::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        })
    }

    fn usage(&self) -> Usage {
        Usage::from_counts(self.usage.input_tokens, self.usage.output_tokens)
    }

    fn tool_results(&self) -> Vec<ToolResultBlock> {
        self.content
            .iter()
            .filter_map(|block| match block {
                AnthropicBlock::ToolResult {
                    tool_use_id,
                    content,
                    text,
                } => Some(ToolResultBlock::new(tool_use_id, text.clone(), content.clone())),
                _ => None,
            })
            .collect()
    }

    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                AnthropicBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }
}

pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;
        let base_url = normalize_base_url(&config.host, ANTHROPIC_BASE_URL, "/v1");

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, request: &CreateRequest<'_>) -> Result<AnthropicMessage> {
        let url = format!("{}/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await?;

        decode_response(response).await
    }
}

// Items of a tool_result content array must be typed blocks
fn is_typed_block(item: &Value) -> bool {
    item.get("type").is_some_and(Value::is_string)
}

// Structured content is forwarded when the API accepts it as-is
fn tool_result_content(block: &ToolResultBlock, fallback: &str) -> Value {
    match &block.content {
        Some(content @ Value::String(_)) => content.clone(),
        Some(content @ Value::Array(items)) if !items.is_empty() && items.iter().all(is_typed_block) => {
            content.clone()
        }
        _ => Value::String(
            block
                .payload_text()
                .unwrap_or_else(|| fallback.to_string()),
        ),
    }
}

/// Convert the conversation into Messages API turns.
///
/// Returns the turns and the text of any system messages, which the API takes
/// as a separate top-level field.
pub fn messages_to_anthropic_spec(messages: &[Message], prompt: &str) -> (Vec<MessageParam>, String) {
    let mut spec = Vec::with_capacity(messages.len() + 1);
    let mut system = Vec::new();

    for message in messages {
        tracing::debug!(
            role = %message.role(),
            is_tool_response = message.is_tool_response(),
            "converting message"
        );

        if message.role() == Role::System {
            let text = message.content();
            if !text.trim().is_empty() {
                system.push(text.trim().to_string());
            }
            continue;
        }

        let mut content = Vec::new();

        let text = message.text();
        let text = text.trim();
        if !text.is_empty() {
            content.push(AnthropicBlock::Text {
                text: text.to_string(),
            });
        }

        for call in message.tool_calls() {
            content.push(AnthropicBlock::ToolUse {
                id: call.id,
                name: call.name,
                input: Value::Object(call.arguments),
            });
        }

        if let Some(tool_call_id) = message.tool_response() {
            tracing::debug!(tool_call_id = %tool_call_id, "processing tool response");
            let fallback = message.content();
            for block in message.tool_results() {
                content.push(AnthropicBlock::ToolResult {
                    content: Some(tool_result_content(&block, &fallback)),
                    tool_use_id: block.tool_use_id,
                    text: None,
                });
            }
        }

        // Empty turns are kept so user/assistant alternation survives
        let role = match message.role() {
            Role::Assistant => Role::Assistant,
            _ => Role::User,
        };
        spec.push(MessageParam { role, content });
    }

    if !prompt.is_empty() {
        spec.push(MessageParam {
            role: Role::User,
            content: vec![AnthropicBlock::Text {
                text: prompt.to_string(),
            }],
        });
    }

    (spec, system.join("\n\n"))
}

fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<AnthropicTool<'_>> {
    tools
        .iter()
        .map(|tool| AnthropicTool {
            name: &tool.name,
            description: &tool.description,
            input_schema: InputSchema {
                schema_type: &tool.input_schema.schema_type,
                properties: &tool.input_schema.properties,
                required: &tool.input_schema.required,
            },
        })
        .collect()
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn send_message(
        &mut self,
        prompt: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<Message> {
        tracing::debug!(
            prompt,
            num_messages = messages.len(),
            num_tools = tools.len(),
            "creating message"
        );

        let (anthropic_messages, system) = messages_to_anthropic_spec(messages, prompt);
        let request = CreateRequest {
            model: &self.config.model,
            messages: anthropic_messages,
            max_tokens: self.config.max_tokens.unwrap_or(ANTHROPIC_MAX_TOKENS),
            system,
            tools: tools_to_anthropic_spec(tools),
            temperature: self.config.temperature,
        };

        tracing::debug!(
            num_messages = request.messages.len(),
            num_tools = request.tools.len(),
            "sending messages to Anthropic"
        );
        let message = self.post(&request).await?;

        Ok(Message::Anthropic(message))
    }

    fn create_tool_response(&self, tool_call_id: &str, content: &Value) -> Result<Message> {
        tracing::debug!(tool_call_id, %content, "creating tool response");

        let text = match content {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).map_err(ProviderError::Serialization)?,
        };

        Ok(Message::Anthropic(AnthropicMessage {
            id: String::new(),
            role: Role::Tool,
            content: vec![AnthropicBlock::ToolResult {
                tool_use_id: tool_call_id.to_string(),
                content: Some(content.clone()),
                text: Some(text),
            }],
            model: String::new(),
            stop_reason: None,
            usage: AnthropicUsage::default(),
        }))
    }

    async fn supports_tools(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}
