use super::content::ToolResultBlock;
use super::role::Role;
use super::tool::ToolCall;
use crate::history::HistoryMessage;
use crate::providers::anthropic::AnthropicMessage;
use crate::providers::base::Usage;
use crate::providers::google::GoogleMessage;
use crate::providers::ollama::OllamaMessage;
use crate::providers::openai::OpenAiMessage;

/// Read access shared by every message shape.
pub trait ChatMessage {
    /// The sender of the message
    fn role(&self) -> Role;

    /// Flattened text content
    fn content(&self) -> String;

    /// Tool calls made in this message, in order
    fn tool_calls(&self) -> Vec<ToolCall>;

    /// The originating tool call id when this message carries a tool result
    fn tool_response(&self) -> Option<String>;

    /// Token usage, when the vendor reported it
    fn usage(&self) -> Usage {
        Usage::default()
    }

    /// Structured tool results carried by the message.
    ///
    /// Shapes without native result blocks synthesize one from
    /// [`ChatMessage::tool_response`] and [`ChatMessage::content`].
    fn tool_results(&self) -> Vec<ToolResultBlock> {
        match self.tool_response() {
            Some(id) => vec![ToolResultBlock::new(id, Some(self.content()), None)],
            None => Vec::new(),
        }
    }

    /// Text that is not part of a tool result
    fn text(&self) -> String {
        if self.is_tool_response() {
            String::new()
        } else {
            self.content()
        }
    }

    fn is_tool_response(&self) -> bool {
        self.tool_response().is_some()
    }
}

/// A message to or from an LLM, tagged by where it came from
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    OpenAi(OpenAiMessage),
    Anthropic(AnthropicMessage),
    Google(GoogleMessage),
    Ollama(OllamaMessage),
    History(HistoryMessage),
}

impl Message {
    /// Start a stored user turn
    pub fn user() -> HistoryMessage {
        HistoryMessage::new(Role::User, Vec::new())
    }

    /// Start a stored assistant turn
    pub fn assistant() -> HistoryMessage {
        HistoryMessage::new(Role::Assistant, Vec::new())
    }

    /// Start a stored system turn
    pub fn system() -> HistoryMessage {
        HistoryMessage::new(Role::System, Vec::new())
    }

    fn inner(&self) -> &dyn ChatMessage {
        match self {
            Message::OpenAi(m) => m,
            Message::Anthropic(m) => m,
            Message::Google(m) => m,
            Message::Ollama(m) => m,
            Message::History(m) => m,
        }
    }

    pub fn as_history(&self) -> Option<&HistoryMessage> {
        match self {
            Message::History(m) => Some(m),
            _ => None,
        }
    }
}

impl ChatMessage for Message {
    fn role(&self) -> Role {
        self.inner().role()
    }

    fn content(&self) -> String {
        self.inner().content()
    }

    fn tool_calls(&self) -> Vec<ToolCall> {
        self.inner().tool_calls()
    }

    fn tool_response(&self) -> Option<String> {
        self.inner().tool_response()
    }

    fn usage(&self) -> Usage {
        self.inner().usage()
    }

    fn tool_results(&self) -> Vec<ToolResultBlock> {
        self.inner().tool_results()
    }

    fn text(&self) -> String {
        self.inner().text()
    }
}

impl From<HistoryMessage> for Message {
    fn from(message: HistoryMessage) -> Self {
        Message::History(message)
    }
}

impl From<OpenAiMessage> for Message {
    fn from(message: OpenAiMessage) -> Self {
        Message::OpenAi(message)
    }
}

impl From<AnthropicMessage> for Message {
    fn from(message: AnthropicMessage) -> Self {
        Message::Anthropic(message)
    }
}

impl From<GoogleMessage> for Message {
    fn from(message: GoogleMessage) -> Self {
        Message::Google(message)
    }
}

impl From<OllamaMessage> for Message {
    fn from(message: OllamaMessage) -> Self {
        Message::Ollama(message)
    }
}
