use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::OllamaProviderConfig;
use super::utils::decode_response;
use crate::errors::ProviderError;
use crate::models::message::{ChatMessage, Message};
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall};

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "qwen2.5";

/// Marker in a model's Modelfile template for tool support
const TOOLS_MARKER: &str = "<tools>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<OllamaToolCall>,
}

impl OllamaChatMessage {
    fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaProperty<'a> {
    #[serde(rename = "type")]
    property_type: &'a str,
    description: &'a str,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    enum_values: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct OllamaParameters<'a> {
    #[serde(rename = "type")]
    schema_type: &'a str,
    required: &'a [String],
    properties: BTreeMap<&'a str, OllamaProperty<'a>>,
}

#[derive(Debug, Serialize)]
struct OllamaToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: OllamaParameters<'a>,
}

#[derive(Debug, Serialize)]
struct OllamaTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OllamaToolFunction<'a>,
}

#[derive(Debug, Default, Serialize)]
struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Options>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: OllamaChatMessage,
    #[serde(default)]
    prompt_eval_count: Option<i32>,
    #[serde(default)]
    eval_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct ShowResponse {
    #[serde(default)]
    modelfile: String,
}

/// Mints `tc_<name>_<nanos>` ids for tool calls, which Ollama does not
/// identify itself. The suffix is strictly increasing per minter even when
/// the clock does not advance between calls.
#[derive(Debug, Default)]
pub struct ToolCallIdMinter {
    last: i64,
}

impl ToolCallIdMinter {
    pub fn mint(&mut self, function_name: &str) -> String {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(self.last.saturating_add(1));
        let nanos = now.max(self.last.saturating_add(1));
        self.last = nanos;
        format!("tc_{}_{}", function_name, nanos)
    }
}

/// A chat response, or a locally built tool response.
///
/// Tool call ids are minted when the response is decoded, so they are stable
/// across reads.
#[derive(Debug, Clone, PartialEq)]
pub struct OllamaMessage {
    pub message: OllamaChatMessage,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub usage: Usage,
}

impl ChatMessage for OllamaMessage {
    fn role(&self) -> Role {
        self.message.role
    }

    fn content(&self) -> String {
        self.message.content.trim().to_string()
    }

    fn tool_calls(&self) -> Vec<ToolCall> {
        self.tool_calls.clone()
    }

    fn tool_response(&self) -> Option<String> {
        if self.message.role == Role::Tool {
            self.tool_call_id.clone()
        } else {
            None
        }
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

pub struct OllamaProvider {
    client: Client,
    config: OllamaProviderConfig,
    minter: ToolCallIdMinter,
}

impl OllamaProvider {
    pub fn new(config: OllamaProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            config,
            minter: ToolCallIdMinter::default(),
        })
    }

    fn host(&self) -> &str {
        match self.config.host.trim() {
            "" => OLLAMA_HOST,
            host => host.trim_end_matches('/'),
        }
    }

    fn options(&self) -> Option<Options> {
        if self.config.temperature.is_none() && self.config.max_tokens.is_none() {
            return None;
        }
        Some(Options {
            temperature: self.config.temperature,
            num_predict: self.config.max_tokens,
        })
    }

    async fn post(&self, request: &ChatRequest<'_>) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.host());

        let response = self.client.post(&url).json(request).send().await?;

        decode_response(response).await
    }

    async fn show(&self) -> Result<ShowResponse> {
        let url = format!("{}/api/show", self.host());

        let response = self
            .client
            .post(&url)
            .json(&json!({ "model": self.config.model }))
            .send()
            .await?;

        decode_response(response).await
    }
}

// Stored tool_result payloads first, then the message's own content
fn tool_response_content(message: &Message) -> String {
    message
        .tool_results()
        .iter()
        .find_map(|block| block.payload_text().filter(|t| !t.is_empty()))
        .unwrap_or_else(|| message.content())
}

/// Convert the conversation into `/api/chat` messages.
///
/// Tool responses without content and turns with neither text nor tool calls
/// are dropped.
pub fn messages_to_ollama_spec(messages: &[Message], prompt: &str) -> Vec<OllamaChatMessage> {
    let mut spec = Vec::with_capacity(messages.len() + 1);

    for message in messages {
        tracing::debug!(
            role = %message.role(),
            is_tool_response = message.is_tool_response(),
            "converting message"
        );

        if message.is_tool_response() {
            let content = tool_response_content(message);
            if content.is_empty() {
                continue;
            }
            spec.push(OllamaChatMessage::new(Role::Tool, content));
            continue;
        }

        let content = message.content();
        let calls = message.tool_calls();
        if content.is_empty() && calls.is_empty() {
            continue;
        }

        let mut param = OllamaChatMessage::new(message.role(), content);
        if message.role() == Role::Assistant {
            param.tool_calls = calls
                .into_iter()
                .filter(|call| !call.name.is_empty())
                .map(|call| OllamaToolCall {
                    function: OllamaFunction {
                        name: call.name,
                        arguments: call.arguments,
                    },
                })
                .collect();
        }
        spec.push(param);
    }

    if !prompt.is_empty() {
        spec.push(OllamaChatMessage::new(Role::User, prompt));
    }

    spec
}

fn str_field<'a>(property: &'a Map<String, Value>, key: &str) -> &'a str {
    property.get(key).and_then(Value::as_str).unwrap_or_default()
}

// Only `type`, `description` and `enum` survive; nested schemas are flattened away
fn tools_to_ollama_spec(tools: &[Tool]) -> Vec<OllamaTool<'_>> {
    tools
        .iter()
        .map(|tool| {
            let properties = tool
                .input_schema
                .properties
                .iter()
                .filter_map(|(name, property)| {
                    let property = property.as_object()?;
                    let enum_values = property
                        .get("enum")
                        .and_then(Value::as_array)
                        .map(|values| values.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_default();
                    Some((
                        name.as_str(),
                        OllamaProperty {
                            property_type: str_field(property, "type"),
                            description: str_field(property, "description"),
                            enum_values,
                        },
                    ))
                })
                .collect();

            OllamaTool {
                tool_type: "function",
                function: OllamaToolFunction {
                    name: &tool.name,
                    description: &tool.description,
                    parameters: OllamaParameters {
                        schema_type: &tool.input_schema.schema_type,
                        required: &tool.input_schema.required,
                        properties,
                    },
                },
            }
        })
        .collect()
}

#[async_trait]
impl Provider for OllamaProvider {
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

        let response = {
            let request = ChatRequest {
                model: &self.config.model,
                messages: messages_to_ollama_spec(messages, prompt),
                tools: tools_to_ollama_spec(tools),
                stream: false,
                options: self.options(),
            };
            tracing::debug!(
                num_messages = request.messages.len(),
                num_tools = request.tools.len(),
                "sending messages to Ollama"
            );
            self.post(&request).await?
        };

        let tool_calls = response
            .message
            .tool_calls
            .iter()
            .map(|call| {
                let id = self.minter.mint(&call.function.name);
                ToolCall::new(id, &call.function.name, call.function.arguments.clone())
            })
            .collect();

        Ok(Message::Ollama(OllamaMessage {
            message: response.message,
            tool_calls,
            tool_call_id: None,
            usage: Usage::from_counts(response.prompt_eval_count, response.eval_count),
        }))
    }

    /// Ollama does not echo call ids, so `tool_call_id` must be the id minted
    /// for the originating call.
    fn create_tool_response(&self, tool_call_id: &str, content: &Value) -> Result<Message> {
        tracing::debug!(tool_call_id, %content, "creating tool response");

        let text = match content {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).map_err(ProviderError::Serialization)?,
        };

        Ok(Message::Ollama(OllamaMessage {
            message: OllamaChatMessage::new(Role::Tool, text),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.to_string()),
            usage: Usage::default(),
        }))
    }

    /// Best effort: looks for the tools marker in the model's Modelfile
    async fn supports_tools(&self) -> bool {
        match self.show().await {
            Ok(show) => show.modelfile.contains(TOOLS_MARKER),
            Err(e) => {
                tracing::debug!(model = %self.config.model, error = %e, "could not query model definition");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
