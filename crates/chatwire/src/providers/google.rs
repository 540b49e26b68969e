use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::GoogleProviderConfig;
use super::utils::decode_response;
use crate::errors::{ProviderError, ToolContentError};
use crate::history::HistoryMessage;
use crate::models::content::ToolContent;
use crate::models::message::{ChatMessage, Message};
use crate::models::role::Role;
use crate::models::tool::{Schema, Tool, ToolCall};

pub const GOOGLE_HOST: &str = "https://generativelanguage.googleapis.com";
pub const GOOGLE_DEFAULT_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeminiRole {
    #[default]
    User,
    Model,
}

impl From<Role> for GeminiRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Assistant => GeminiRole::Model,
            _ => GeminiRole::User,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn function_call(call: FunctionCall) -> Self {
        Self {
            function_call: Some(call),
            ..Default::default()
        }
    }
}

/// One turn of a Gemini conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: GeminiRole,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn new(role: GeminiRole, part: Part) -> Self {
        Self {
            role,
            parts: vec![part],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeminiType {
    TypeUnspecified,
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl GeminiType {
    /// Unknown type names map to `TYPE_UNSPECIFIED`
    pub fn from_schema_type(schema_type: &str) -> Self {
        match schema_type {
            "string" => GeminiType::String,
            "boolean" => GeminiType::Boolean,
            "object" => GeminiType::Object,
            "array" => GeminiType::Array,
            "integer" => GeminiType::Integer,
            "number" => GeminiType::Number,
            _ => GeminiType::TypeUnspecified,
        }
    }
}

/// Gemini's OpenAPI-subset schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiSchema {
    #[serde(rename = "type")]
    pub schema_type: GeminiType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, GeminiSchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<GeminiSchema>>,
}

impl GeminiSchema {
    fn of_type(schema_type: GeminiType) -> Self {
        Self {
            schema_type,
            description: String::new(),
            nullable: false,
            enum_values: Vec::new(),
            properties: BTreeMap::new(),
            required: Vec::new(),
            items: None,
        }
    }
}

/// Translate a tool's input schema.
///
/// Gemini rejects object schemas without properties, so a parameterless tool
/// gets a nullable schema with a single nullable `unused` integer property.
pub fn translate_schema(schema: &Schema) -> GeminiSchema {
    let mut translated = GeminiSchema::of_type(GeminiType::from_schema_type(&schema.schema_type));
    translated.required = schema.required.clone();
    translated.properties = schema
        .properties
        .iter()
        .map(|(name, property)| (name.clone(), translate_property(property)))
        .collect();

    if translated.properties.is_empty() {
        translated.nullable = true;
        let mut unused = GeminiSchema::of_type(GeminiType::Integer);
        unused.nullable = true;
        translated.properties.insert("unused".to_string(), unused);
    }
    translated
}

fn translate_property(property: &Value) -> GeminiSchema {
    let schema_type = property
        .get("type")
        .and_then(Value::as_str)
        .map(GeminiType::from_schema_type)
        .unwrap_or(GeminiType::TypeUnspecified);
    let mut translated = GeminiSchema::of_type(schema_type);

    if let Some(description) = property.get("description").and_then(Value::as_str) {
        translated.description = description.to_string();
    }
    if let Some(values) = property.get("enum").and_then(Value::as_array) {
        translated.enum_values = values
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect();
    }

    match schema_type {
        GeminiType::Object => {
            if let Some(properties) = property.get("properties").and_then(Value::as_object) {
                translated.properties = properties
                    .iter()
                    .map(|(name, nested)| (name.clone(), translate_property(nested)))
                    .collect();
            }
            if let Some(required) = property.get("required").and_then(Value::as_array) {
                translated.required = required
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect();
            }
        }
        GeminiType::Array => {
            translated.items = property
                .get("items")
                .filter(|items| items.is_object())
                .map(|items| Box::new(translate_property(items)));
        }
        _ => {}
    }

    translated
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDeclaration<'a> {
    name: &'a str,
    description: &'a str,
    parameters: GeminiSchema,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool<'a> {
    function_declarations: Vec<FunctionDeclaration<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    candidate_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: &'a [Content],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
    total_token_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

/// The first candidate of a response, numbered from the provider's tool-call
/// counter at the time it was decoded
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleMessage {
    pub candidate: Candidate,
    pub first_tool_call_id: usize,
    pub usage: Usage,
}

fn tool_call_id(n: usize) -> String {
    format!("Tool<{}>", n)
}

impl GoogleMessage {
    fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.candidate
            .content
            .parts
            .iter()
            .filter_map(|part| part.function_call.as_ref())
    }
}

impl ChatMessage for GoogleMessage {
    fn role(&self) -> Role {
        match self.candidate.content.role {
            GeminiRole::Model => Role::Assistant,
            GeminiRole::User => Role::User,
        }
    }

    fn content(&self) -> String {
        self.candidate
            .content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect()
    }

    fn tool_calls(&self) -> Vec<ToolCall> {
        self.function_calls()
            .enumerate()
            .map(|(i, call)| {
                ToolCall::new(
                    tool_call_id(self.first_tool_call_id + i),
                    &call.name,
                    call.args.clone(),
                )
            })
            .collect()
    }

    fn tool_response(&self) -> Option<String> {
        self.candidate
            .content
            .parts
            .iter()
            .any(|part| part.function_response.is_some())
            .then(|| tool_call_id(self.first_tool_call_id))
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

/// The conversation as last sent to the model, plus the model's reply
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    pub history: Vec<Content>,
}

pub struct GoogleProvider {
    client: Client,
    config: GoogleProviderConfig,
    session: ChatSession,
    tool_call_counter: usize,
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            config,
            session: ChatSession::default(),
            tool_call_counter: 0,
        })
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// The id the next decoded tool call will receive
    pub fn tool_call_counter(&self) -> usize {
        self.tool_call_counter
    }

    async fn post(&self, request: &GenerateContentRequest<'_>) -> Result<GenerateContentResponse> {
        let host = match self.config.host.trim() {
            "" => GOOGLE_HOST,
            host => host.trim_end_matches('/'),
        };
        let url = format!("{}/v1beta/models/{}:generateContent", host, self.config.model);

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.config.api_key)])
            .json(request)
            .send()
            .await?;

        decode_response(response).await
    }
}

/// Rebuild the session history from the conversation.
///
/// Per message: one function-call turn per tool call, one text turn per
/// tool result, then a text turn for any remaining text.
pub fn messages_to_google_history(messages: &[Message]) -> Vec<Content> {
    let mut history = Vec::new();

    for message in messages {
        tracing::debug!(
            role = %message.role(),
            is_tool_response = message.is_tool_response(),
            "converting message"
        );
        let role = GeminiRole::from(message.role());

        for call in message.tool_calls() {
            history.push(Content::new(
                role,
                Part::function_call(FunctionCall {
                    name: call.name,
                    args: call.arguments,
                }),
            ));
        }

        if message.is_tool_response() {
            for block in message.tool_results() {
                let text = block.payload_text().unwrap_or_default();
                history.push(Content::new(role, Part::text(text)));
            }
        }

        let text = message.text();
        let text = text.trim();
        if !text.is_empty() {
            history.push(Content::new(role, Part::text(text)));
        }
    }

    history
}

fn tools_to_google_spec(tools: &[Tool]) -> Vec<GeminiTool<'_>> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![GeminiTool {
        function_declarations: tools
            .iter()
            .map(|tool| FunctionDeclaration {
                name: &tool.name,
                description: &tool.description,
                parameters: translate_schema(&tool.input_schema),
            })
            .collect(),
    }]
}

#[async_trait]
impl Provider for GoogleProvider {
    /// `messages` must already end with the new prompt; `prompt` itself is
    /// only logged.
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

        // The last turn is already in the history, so the new turn is empty
        let mut contents = messages_to_google_history(messages);
        contents.push(Content::new(GeminiRole::User, Part::text("")));

        tracing::debug!(num_contents = contents.len(), "sending messages to Google");
        let response = {
            let request = GenerateContentRequest {
                contents: &contents,
                tools: tools_to_google_spec(tools),
                generation_config: GenerationConfig {
                    candidate_count: 1,
                    temperature: self.config.temperature,
                    max_output_tokens: self.config.max_tokens,
                },
            };
            self.post(&request).await?
        };

        let usage = response
            .usage_metadata
            .map(|u| {
                Usage::new(
                    u.prompt_token_count,
                    u.candidates_token_count,
                    u.total_token_count,
                )
            })
            .unwrap_or_default();
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or(ProviderError::NoResponse)?;

        let message = GoogleMessage {
            candidate,
            first_tool_call_id: self.tool_call_counter,
            usage,
        };
        self.tool_call_counter += message.function_calls().count();

        contents.push(message.candidate.content.clone());
        self.session.history = contents;

        Ok(Message::Google(message))
    }

    fn create_tool_response(&self, tool_call_id: &str, content: &Value) -> Result<Message> {
        tracing::debug!(tool_call_id, %content, "creating tool response");

        let text = match ToolContent::parse(content) {
            Ok(parsed) => Some(parsed.into_text()),
            Err(ToolContentError::Empty) => None,
            Err(e) => return Err(ProviderError::from(e).into()),
        };

        Ok(Message::History(
            HistoryMessage::new(Role::Tool, Vec::new()).with_tool_result(
                tool_call_id,
                text,
                Some(content.clone()),
            ),
        ))
    }

    async fn supports_tools(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "google"
    }
}
