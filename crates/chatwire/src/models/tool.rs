use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The vendor-neutral description of a tool's input parameters.
///
/// `properties` maps each parameter name to a nested JSON-Schema-like object
/// (`{type, description?, properties?, items?, enum?}`); every adapter
/// translates it into its own native schema shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Schema {
    /// An object schema with no properties
    pub fn object() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: Map::new(),
            required: Vec::new(),
        }
    }

    /// Add a property, optionally marking it required
    pub fn with_property<S: Into<String>>(mut self, name: S, schema: Value, required: bool) -> Self {
        let name = name.into();
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::object()
    }
}

/// A tool that can be used by a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// Parameters that the tool accepts
    pub input_schema: Schema,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Schema) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A model-initiated request to invoke a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier echoed back in the matching tool result
    pub id: String,
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new<I: Into<String>, N: Into<String>>(id: I, name: N, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Build a call from loosely typed vendor arguments.
    ///
    /// Anything that is not a JSON object decodes to an empty argument map.
    pub fn from_value<I: Into<String>, N: Into<String>>(id: I, name: N, arguments: Value) -> Self {
        Self::new(id, name, arguments_from_value(arguments))
    }

    /// Build a call from a JSON-encoded argument string, recovering to an empty
    /// map when the vendor sent malformed JSON.
    pub fn from_json<I: Into<String>, N: Into<String>>(id: I, name: N, arguments: &str) -> Self {
        let id = id.into();
        let arguments = match serde_json::from_str::<Value>(arguments) {
            Ok(value) => arguments_from_value(value),
            Err(e) => {
                tracing::debug!(tool_call_id = %id, error = %e, "could not decode tool call arguments");
                Map::new()
            }
        };
        Self::new(id, name, arguments)
    }
}

fn arguments_from_value(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
