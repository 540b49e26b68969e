use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ToolContentError;

/// A stored `tool_use` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments; decoded leniently into a map when read back
    #[serde(default)]
    pub input: Value,
}

/// A `tool_result` block: the outcome of a tool call, linked by `tool_use_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

impl ToolResultBlock {
    pub fn new<S: Into<String>>(tool_use_id: S, text: Option<String>, content: Option<Value>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            text,
            content,
        }
    }

    /// The visible payload: the `text` field when set, otherwise the
    /// flattened structured content.
    pub fn payload_text(&self) -> Option<String> {
        if let Some(text) = self.text.as_deref().filter(|t| !t.is_empty()) {
            return Some(text.to_string());
        }
        let content = self.content.as_ref()?;
        ToolContent::parse(content).ok().map(|c| c.join(" "))
    }
}

/// One typed unit of a stored turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

impl ContentBlock {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use<I: Into<String>, N: Into<String>>(id: I, name: N, input: Value) -> Self {
        ContentBlock::ToolUse(ToolUseBlock {
            id: id.into(),
            name: name.into(),
            input,
        })
    }

    pub fn tool_result<S: Into<String>>(tool_use_id: S, text: Option<String>, content: Option<Value>) -> Self {
        ContentBlock::ToolResult(ToolResultBlock::new(tool_use_id, text, content))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(block) => Some(block),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultBlock> {
        match self {
            ContentBlock::ToolResult(block) => Some(block),
            _ => None,
        }
    }
}

/// Arbitrary tool output, classified by how its text was recovered.
///
/// [`ToolContent::parse`] tries, in order: a plain string, an array of text
/// blocks (`text` as a string or an array of strings), nested `content`
/// arrays or objects, and finally JSON serialization. For arrays the first
/// two steps run per item, so mixed arrays keep every item's text. Only the
/// last step is lossy; see [`ToolContent::is_lossy`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolContent {
    Text(String),
    TextBlocks(Vec<String>),
    Nested(Vec<String>),
    Json(String),
}

impl ToolContent {
    pub fn parse(value: &Value) -> Result<Self, ToolContentError> {
        let parsed = match value {
            Value::Null => return Err(ToolContentError::Empty),
            Value::String(text) => ToolContent::Text(text.clone()),
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(ToolContentError::Empty);
                }
                let mut any_nested = false;
                let texts: Vec<String> = items
                    .iter()
                    .flat_map(|item| {
                        let direct = block_texts(item);
                        if direct.is_empty() {
                            let nested = nested_texts(item);
                            any_nested |= !nested.is_empty();
                            nested
                        } else {
                            direct
                        }
                    })
                    .collect();
                if texts.is_empty() {
                    ToolContent::Json(to_json(value)?)
                } else if any_nested {
                    ToolContent::Nested(texts)
                } else {
                    ToolContent::TextBlocks(texts)
                }
            }
            Value::Object(map) => match map.get("text") {
                Some(Value::String(text)) if !text.is_empty() => ToolContent::Text(text.clone()),
                _ => {
                    let nested = nested_texts(value);
                    if nested.is_empty() {
                        ToolContent::Json(to_json(value)?)
                    } else {
                        ToolContent::Nested(nested)
                    }
                }
            },
            other => ToolContent::Json(to_json(other)?),
        };

        if parsed.is_empty() {
            Err(ToolContentError::Empty)
        } else {
            Ok(parsed)
        }
    }

    /// Join the recovered pieces with `separator`
    pub fn join(&self, separator: &str) -> String {
        match self {
            ToolContent::Text(text) | ToolContent::Json(text) => text.clone(),
            ToolContent::TextBlocks(parts) | ToolContent::Nested(parts) => parts.join(separator),
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ToolContent::Text(text) | ToolContent::Json(text) => text,
            ToolContent::TextBlocks(parts) | ToolContent::Nested(parts) => parts.join("\n"),
        }
    }

    /// True when no text could be found and the value was serialized instead
    pub fn is_lossy(&self) -> bool {
        matches!(self, ToolContent::Json(_))
    }

    fn is_empty(&self) -> bool {
        match self {
            ToolContent::Text(text) | ToolContent::Json(text) => text.is_empty(),
            ToolContent::TextBlocks(parts) | ToolContent::Nested(parts) => {
                parts.iter().all(|p| p.is_empty())
            }
        }
    }
}

fn to_json(value: &Value) -> Result<String, ToolContentError> {
    serde_json::to_string(value).map_err(|e| ToolContentError::Serialization(e.to_string()))
}

// Text carried directly by one array item
fn block_texts(item: &Value) -> Vec<String> {
    match item {
        Value::String(text) => vec![text.clone()],
        Value::Object(map) => match map.get("text") {
            Some(Value::String(text)) => vec![text.clone()],
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|p| p.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

// Text found one level down, under a `content` field
fn nested_texts(item: &Value) -> Vec<String> {
    let Some(map) = item.as_object() else {
        return Vec::new();
    };
    match map.get("content") {
        Some(Value::String(text)) => vec![text.clone()],
        Some(Value::Array(inner)) => inner.iter().flat_map(block_texts).collect(),
        Some(inner @ Value::Object(_)) => block_texts(inner),
        _ => Vec::new(),
    }
}

/// Decode a raw `tool_use` input into an argument map, substituting an empty
/// map for anything that is not an object.
pub fn arguments_map(input: &Value) -> Map<String, Value> {
    input.as_object().cloned().unwrap_or_default()
}
