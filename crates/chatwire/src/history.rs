//! Stored conversation turns.
//!
//! A stored turn is a role plus an ordered list of [`ContentBlock`]s, the same
//! block vocabulary Anthropic uses on the wire. Any decoded [`Message`] can be
//! converted into this form and replayed into any provider later.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::content::{arguments_map, ContentBlock, ToolResultBlock};
use crate::models::message::{ChatMessage, Message};
use crate::models::role::Role;
use crate::models::tool::ToolCall;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl HistoryMessage {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Add any block to the turn
    pub fn with_content(mut self, block: ContentBlock) -> Self {
        self.content.push(block);
        self
    }

    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(ContentBlock::text(text))
    }

    pub fn with_tool_use<I: Into<String>, N: Into<String>>(self, id: I, name: N, input: Value) -> Self {
        self.with_content(ContentBlock::tool_use(id, name, input))
    }

    pub fn with_tool_result<S: Into<String>>(
        self,
        tool_use_id: S,
        text: Option<String>,
        content: Option<Value>,
    ) -> Self {
        self.with_content(ContentBlock::tool_result(tool_use_id, text, content))
    }

    fn text_blocks(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    fn result_blocks(&self) -> impl Iterator<Item = &ToolResultBlock> {
        self.content.iter().filter_map(ContentBlock::as_tool_result)
    }
}

impl ChatMessage for HistoryMessage {
    fn role(&self) -> Role {
        self.role
    }

    fn content(&self) -> String {
        let text = self.text_blocks();
        if !text.is_empty() {
            return text;
        }
        self.result_blocks()
            .filter_map(ToolResultBlock::payload_text)
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(ContentBlock::as_tool_use)
            .map(|block| ToolCall::new(&block.id, &block.name, arguments_map(&block.input)))
            .collect()
    }

    fn tool_response(&self) -> Option<String> {
        self.result_blocks().next().map(|b| b.tool_use_id.clone())
    }

    fn tool_results(&self) -> Vec<ToolResultBlock> {
        self.result_blocks().cloned().collect()
    }

    fn text(&self) -> String {
        self.text_blocks()
    }
}

impl From<&Message> for HistoryMessage {
    fn from(message: &Message) -> Self {
        if let Message::History(history) = message {
            return history.clone();
        }

        let mut content = Vec::new();
        let text = message.text();
        let text = text.trim();
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
        for call in message.tool_calls() {
            content.push(ContentBlock::tool_use(call.id, call.name, Value::Object(call.arguments)));
        }
        for result in message.tool_results() {
            content.push(ContentBlock::ToolResult(result));
        }

        HistoryMessage::new(message.role(), content)
    }
}

/// Turn stored turns back into messages, one per turn
pub fn reconstruct(turns: Vec<HistoryMessage>) -> Vec<Message> {
    turns.into_iter().map(Message::History).collect()
}

/// Parse a JSON array of stored turns
pub fn from_json(json: &str) -> Result<Vec<Message>> {
    let turns: Vec<HistoryMessage> = serde_json::from_str(json)?;
    Ok(reconstruct(turns))
}

/// Serialize a conversation into stored turns
pub fn to_json(messages: &[Message]) -> Result<String> {
    let turns: Vec<HistoryMessage> = messages.iter().map(HistoryMessage::from).collect();
    Ok(serde_json::to_string(&turns)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_blocks_join_with_single_space() {
        let message = Message::user().with_text("a").with_text("b");
        assert_eq!(message.content(), "a b");

        let message = Message::user().with_text("  padded ").with_text("");
        assert_eq!(message.content(), "padded");
    }

    #[test]
    fn test_empty_turn() {
        let message = HistoryMessage::new(Role::User, Vec::new());
        assert_eq!(message.content(), "");
        assert!(message.tool_calls().is_empty());
        assert_eq!(message.tool_response(), None);
    }

    #[test]
    fn test_thinking_out_loud_with_tool_use() {
        let message = Message::assistant()
            .with_text("I'll look that up.")
            .with_tool_use("toolu_1", "get_weather", json!({"location": "Paris"}))
            .with_tool_use("toolu_2", "get_time", json!("not an object"));

        let calls = message.tool_calls();
        assert_eq!(message.content(), "I'll look that up.");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments.get("location"), Some(&json!("Paris")));
        assert!(calls[1].arguments.is_empty());
    }

    #[test]
    fn test_tool_result_payload_becomes_content() {
        let message = Message::user().with_tool_result(
            "toolu_1",
            None,
            Some(json!([{"type": "text", "text": "18 degrees"}])),
        );
        assert_eq!(message.tool_response().as_deref(), Some("toolu_1"));
        assert_eq!(message.content(), "18 degrees");

        let message = Message::user().with_tool_result("toolu_2", Some("cloudy".to_string()), Some(json!("ignored")));
        assert_eq!(message.content(), "cloudy");

        let message = Message::user().with_tool_result("toolu_3", None, Some(json!([{"temp": 18}])));
        assert_eq!(message.content(), r#"[{"temp":18}]"#);
    }

    #[test]
    fn test_from_json() -> Result<()> {
        let messages = from_json(
            r#"[
                {"role": "user", "content": [{"type": "text", "text": "What's the weather in Paris?"}]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"location": "Paris"}}
                ]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "text": "Sunny"}]}
            ]"#,
        )?;

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content(), "What's the weather in Paris?");
        assert_eq!(messages[1].tool_calls()[0].name, "get_weather");
        assert_eq!(
            messages[2].tool_response(),
            Some(messages[1].tool_calls()[0].id.clone())
        );
        Ok(())
    }

    #[test]
    fn test_unknown_role_rejected() {
        assert!(from_json(r#"[{"role": "narrator", "content": []}]"#).is_err());
    }

    #[test]
    fn test_history_round_trip() -> Result<()> {
        let original = vec![
            Message::from(Message::user().with_text("hi")),
            Message::from(
                Message::assistant()
                    .with_text("calling")
                    .with_tool_use("t1", "lookup", json!({"q": "rust"})),
            ),
        ];
        let restored = from_json(&to_json(&original)?)?;
        assert_eq!(restored, original);
        Ok(())
    }
}
