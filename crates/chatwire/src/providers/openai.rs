use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;

use super::base::{Provider, Usage};
use super::configs::OpenAiProviderConfig;
use super::utils::{decode_response, normalize_base_url};
use crate::errors::{ProviderError, ToolContentError};
use crate::models::content::ToolContent;
use crate::models::message::{ChatMessage, Message};
use crate::models::role::Role;
use crate::models::tool::{Schema, Tool, ToolCall};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENAI_MAX_TOKENS: i32 = 4096;
pub const OPENAI_TEMPERATURE: f32 = 0.7;

/// A chat completion message as it appears on the wire, both in requests and
/// in `choices[].message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageParam {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageParam>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    max_tokens: i32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessageParam,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<i32>,
    completion_tokens: Option<i32>,
    total_tokens: Option<i32>,
}

/// The first choice of a chat completion, or a locally built tool response
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiMessage {
    pub message: ChatMessageParam,
    pub usage: Usage,
}

impl ChatMessage for OpenAiMessage {
    fn role(&self) -> Role {
        self.message.role
    }

    fn content(&self) -> String {
        self.message.content.clone().unwrap_or_default()
    }

    fn tool_calls(&self) -> Vec<ToolCall> {
        self.message
            .tool_calls
            .iter()
            .flatten()
            .map(|call| ToolCall::from_json(&call.id, &call.function.name, &call.function.arguments))
            .collect()
    }

    fn tool_response(&self) -> Option<String> {
        self.message
            .tool_call_id
            .clone()
            .filter(|id| !id.is_empty())
    }

    fn usage(&self) -> Usage {
        self.usage
    }
}

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;
        let base_url = normalize_base_url(&config.host, OPENAI_BASE_URL, "/v1");

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, request: &ChatRequest<'_>) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(request)
            .send()
            .await?;

        decode_response(response).await
    }
}

/// Convert the conversation into chat completion messages, appending `prompt`
/// as a trailing user turn when it is non-empty.
pub fn messages_to_openai_spec(messages: &[Message], prompt: &str) -> Result<Vec<ChatMessageParam>> {
    let mut spec = Vec::with_capacity(messages.len() + 1);

    for message in messages {
        tracing::debug!(
            role = %message.role(),
            is_tool_response = message.is_tool_response(),
            "converting message"
        );

        if let Some(tool_call_id) = message.tool_response() {
            spec.push(ChatMessageParam {
                role: Role::Tool,
                content: Some(tool_response_text(message)),
                tool_calls: None,
                tool_call_id: Some(tool_call_id),
            });
            continue;
        }

        let content = message.content();
        let mut param = ChatMessageParam {
            role: message.role(),
            content: (!content.is_empty()).then_some(content),
            tool_calls: None,
            tool_call_id: None,
        };

        if message.role() == Role::Assistant {
            let calls = message.tool_calls();
            if !calls.is_empty() {
                let mut wire_calls = Vec::with_capacity(calls.len());
                for call in calls {
                    let arguments = serde_json::to_string(&call.arguments)
                        .map_err(ProviderError::Serialization)?;
                    wire_calls.push(WireToolCall {
                        id: call.id,
                        call_type: function_type(),
                        function: FunctionCall {
                            name: call.name,
                            arguments,
                        },
                    });
                }
                param.tool_calls = Some(wire_calls);
            }
        }

        spec.push(param);
    }

    if !prompt.is_empty() {
        spec.push(ChatMessageParam {
            role: Role::User,
            content: Some(prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    Ok(spec)
}

// Structured tool_result blocks first, then the message's own content
fn tool_response_text(message: &Message) -> String {
    let texts: Vec<String> = message
        .tool_results()
        .into_iter()
        .filter_map(|block| match block.text.filter(|t| !t.is_empty()) {
            Some(text) => Some(text),
            None => block
                .content
                .as_ref()
                .and_then(|c| ToolContent::parse(c).ok())
                .map(|c| c.join("\n")),
        })
        .collect();

    let text = texts.join("\n");
    if !text.is_empty() {
        return text;
    }
    let content = message.content();
    if !content.is_empty() {
        return content;
    }
    "No content returned from function".to_string()
}

/// The function `parameters` object for a tool's input schema
pub fn convert_schema(schema: &Schema) -> Value {
    json!({
        "type": schema.schema_type,
        "properties": schema.properties,
        "required": schema.required,
    })
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": convert_schema(&tool.input_schema),
            }
        }));
    }

    Ok(result)
}

#[async_trait]
impl Provider for OpenAiProvider {
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

        let request = ChatRequest {
            model: &self.config.model,
            messages: messages_to_openai_spec(messages, prompt)?,
            tools: tools_to_openai_spec(tools)?,
            max_tokens: self.config.max_tokens.unwrap_or(OPENAI_MAX_TOKENS),
            temperature: self.config.temperature.unwrap_or(OPENAI_TEMPERATURE),
        };

        tracing::debug!(num_messages = request.messages.len(), "sending messages to OpenAI");
        let response = self.post(&request).await?;

        let usage = response
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens, u.total_tokens))
            .unwrap_or_default();
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(ProviderError::NoResponse)?;

        Ok(Message::OpenAi(OpenAiMessage {
            message: choice.message,
            usage,
        }))
    }

    fn create_tool_response(&self, tool_call_id: &str, content: &Value) -> Result<Message> {
        tracing::debug!(tool_call_id, %content, "creating tool response");

        let text = match ToolContent::parse(content) {
            Ok(parsed) => {
                if parsed.is_lossy() {
                    tracing::debug!(tool_call_id, "no text in tool response, sending JSON");
                }
                parsed.into_text()
            }
            Err(ToolContentError::Empty) => "No content returned from tool".to_string(),
            Err(e) => return Err(ProviderError::from(e).into()),
        };

        Ok(Message::OpenAi(OpenAiMessage {
            message: ChatMessageParam {
                role: Role::Tool,
                content: Some(text),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.to_string()),
            },
            usage: Usage::default(),
        }))
    }

    async fn supports_tools(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryMessage;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn weather_tool() -> Tool {
        Tool::new(
            "get_weather",
            "Gets the current weather for a location",
            Schema::object().with_property(
                "location",
                json!({"type": "string", "description": "The city, e.g. Paris"}),
                true,
            ),
        )
    }

    async fn setup_mock_server(response_body: Value) -> (MockServer, OpenAiProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response_body))
            .mount(&mock_server)
            .await;

        let config = OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
        };

        let provider = OpenAiProvider::new(config).unwrap();
        (mock_server, provider)
    }

    #[test]
    fn test_base_url_defaults() {
        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: String::new(),
            api_key: "key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
        })
        .unwrap();
        assert_eq!(provider.base_url(), OPENAI_BASE_URL);
    }

    #[test]
    fn test_messages_to_openai_spec_trailing_prompt() -> Result<()> {
        let messages = vec![Message::from(Message::user().with_text("Hello"))];
        let spec = messages_to_openai_spec(&messages, "How are you?")?;

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0].role, Role::User);
        assert_eq!(spec[0].content.as_deref(), Some("Hello"));
        assert_eq!(spec[1].role, Role::User);
        assert_eq!(spec[1].content.as_deref(), Some("How are you?"));
        Ok(())
    }

    #[test]
    fn test_messages_to_openai_spec_complex() -> Result<()> {
        let messages = vec![
            Message::from(Message::assistant().with_text("Hello!")),
            Message::from(Message::user().with_text("How are you?")),
            Message::from(
                Message::assistant().with_tool_use("tool1", "example", json!({"param1": "value1"})),
            ),
            Message::from(Message::user().with_tool_result(
                "tool1",
                None,
                Some(json!([{"type": "text", "text": "Result"}])),
            )),
        ];

        let spec = messages_to_openai_spec(&messages, "")?;

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0].role, Role::Assistant);
        assert_eq!(spec[0].content.as_deref(), Some("Hello!"));
        assert_eq!(spec[2].role, Role::Assistant);
        assert_eq!(spec[2].content, None);
        let calls = spec[2].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"param1":"value1"}"#);
        assert_eq!(spec[3].role, Role::Tool);
        assert_eq!(spec[3].content.as_deref(), Some("Result"));
        assert_eq!(spec[3].tool_call_id.as_deref(), Some(calls[0].id.as_str()));

        let wire = serde_json::to_value(&spec[2])?;
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert!(wire.get("content").is_none());
        Ok(())
    }

    #[test]
    fn test_tool_calls_only_sent_for_assistant() -> Result<()> {
        let message = HistoryMessage::new(Role::User, Vec::new())
            .with_text("odd")
            .with_tool_use("t1", "example", json!({}));
        let spec = messages_to_openai_spec(&[Message::from(message)], "")?;
        assert!(spec[0].tool_calls.is_none());
        Ok(())
    }

    #[test]
    fn test_empty_tool_response_placeholder() -> Result<()> {
        let message = Message::user().with_tool_result("t1", None, None);
        let spec = messages_to_openai_spec(&[Message::from(message)], "")?;
        assert_eq!(spec[0].content.as_deref(), Some("No content returned from function"));
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec() -> Result<()> {
        let spec = tools_to_openai_spec(&[weather_tool()])?;

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "get_weather");
        assert_eq!(spec[0]["function"]["parameters"]["required"], json!(["location"]));
        assert_eq!(
            spec[0]["function"]["parameters"]["properties"]["location"]["type"],
            "string"
        );
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_required_defaults_to_empty() -> Result<()> {
        let tool = Tool::new("noop", "Does nothing", Schema::object());
        let spec = tools_to_openai_spec(&[tool])?;
        assert_eq!(spec[0]["function"]["parameters"]["required"], json!([]));
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let result = tools_to_openai_spec(&[weather_tool(), weather_tool()]);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate tool name"));
    }

    #[test]
    fn test_decode_malformed_arguments() {
        let message = OpenAiMessage {
            message: serde_json::from_value(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "example_fn", "arguments": "invalid json {"}
                }]
            }))
            .unwrap(),
            usage: Usage::default(),
        };

        let calls = message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "example_fn");
        assert!(calls[0].arguments.is_empty());
        assert_eq!(message.content(), "");
    }

    #[test]
    fn test_create_tool_response() -> Result<()> {
        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: String::new(),
            api_key: "key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
        })?;

        let message = provider.create_tool_response("call_1", &json!("Sunny"))?;
        assert_eq!(message.role(), Role::Tool);
        assert_eq!(message.tool_response().as_deref(), Some("call_1"));
        assert_eq!(message.content(), "Sunny");

        let message = provider.create_tool_response(
            "call_2",
            &json!([{"type": "text", "text": "a"}, {"content": [{"text": "b"}]}]),
        )?;
        assert_eq!(message.content(), "a\nb");

        let message = provider.create_tool_response("call_3", &json!({"temp": 21}))?;
        assert_eq!(message.content(), r#"{"temp":21}"#);

        let message = provider.create_tool_response("call_4", &json!(""))?;
        assert_eq!(message.content(), "No content returned from tool");
        Ok(())
    }

    #[tokio::test]
    async fn test_send_message_basic() -> Result<()> {
        let response_body = json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello! How can I assist you today?",
                    "tool_calls": null
                },
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 15,
                "total_tokens": 27
            }
        });

        let (_, mut provider) = setup_mock_server(response_body).await;
        let message = provider.send_message("Hello?", &[], &[]).await?;

        assert_eq!(message.role(), Role::Assistant);
        assert_eq!(message.content(), "Hello! How can I assist you today?");
        assert!(message.tool_calls().is_empty());
        assert_eq!(message.tool_response(), None);
        assert_eq!(message.usage().tokens(), (12, 15));
        assert_eq!(message.usage().total_tokens, Some(27));
        Ok(())
    }

    #[tokio::test]
    async fn test_send_message_tool_request() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "model": "gpt-4o",
                "max_tokens": 4096,
                "messages": [{"role": "user", "content": "What's the weather in Paris?"}],
                "tools": [{
                    "type": "function",
                    "function": {
                        "name": "get_weather",
                        "parameters": {
                            "type": "object",
                            "properties": {"location": {"type": "string"}},
                            "required": ["location"]
                        }
                    }
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_123",
                            "type": "function",
                            "function": {
                                "name": "get_weather",
                                "arguments": "{\"location\":\"Paris\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 20, "completion_tokens": 15, "total_tokens": 35}
            })))
            .mount(&mock_server)
            .await;

        let mut provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "test_api_key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
        })?;

        let message = provider
            .send_message("What's the weather in Paris?", &[], &[weather_tool()])
            .await?;

        let calls = message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_123");
        assert_eq!(calls[0].name, "get_weather");
        assert_eq!(Value::Object(calls[0].arguments.clone()), json!({"location": "Paris"}));
        assert_eq!(message.content(), "");

        let response = provider.create_tool_response(&calls[0].id, &json!("Sunny, 21C"))?;
        assert_eq!(response.tool_response(), Some(calls[0].id.clone()));
        Ok(())
    }

    #[tokio::test]
    async fn test_send_message_no_choices() -> Result<()> {
        let (_, mut provider) = setup_mock_server(json!({"choices": []})).await;
        let err = provider.send_message("Hello?", &[], &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::NoResponse)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_send_message_api_error() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "message": "Incorrect API key provided",
                    "type": "invalid_request_error",
                    "code": "invalid_api_key"
                }
            })))
            .mount(&mock_server)
            .await;

        let mut provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: format!("{}/", mock_server.uri()),
            api_key: "bad".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
        })?;

        let err = provider.send_message("Hello?", &[], &[]).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid_request_error: Incorrect API key provided"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_send_message_server_error() -> Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let mut provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: mock_server.uri(),
            api_key: "key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
        })?;

        let result = provider.send_message("Hello?", &[], &[]).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("error response with status 500"));
        Ok(())
    }
}
