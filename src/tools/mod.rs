//! Tool arguments, tool executors and schema conversion.
//!
//! Tool calls arrive as a name plus a JSON string. The string is parsed once,
//! at the boundary, into [`ToolArguments`]; handlers then deserialize it into
//! their own argument type.

mod registry;

pub use registry::FunctionRegistry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::chat::Tool;
use crate::error::LLMError;

/// Parsed arguments of a tool call: always a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments(Map<String, Value>);

impl ToolArguments {
    /// Parses the raw argument string of a call to `tool`.
    ///
    /// An empty string is an empty object. Some models double-encode the
    /// arguments as a JSON string holding the object; that form is accepted
    /// too. Anything else that is not an object is an `ArgumentParseError`.
    pub fn from_json(tool: &str, raw: &str) -> Result<Self, LLMError> {
        let parse_error = |message: String| LLMError::ArgumentParseError {
            tool: tool.to_string(),
            message,
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(raw).map_err(|e| parse_error(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
                Ok(Value::Object(map)) => Ok(Self(map)),
                _ => Err(parse_error("expected a JSON object, got a string".to_string())),
            },
            other => Err(parse_error(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Deserializes the arguments into a typed structure.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(Value::Object(self.0.clone()))
    }

    /// String value of `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for ToolArguments {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Something able to run tools by name: local functions or an MCP server.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Schemas of the tools this executor can run.
    async fn tools(&self) -> Result<Vec<Tool>, LLMError>;

    /// Runs `name` with `arguments` and returns its text output.
    ///
    /// Failures, including unknown names, are `ToolInvocationError`s.
    async fn invoke(&self, name: &str, arguments: ToolArguments) -> Result<String, LLMError>;
}

/// Converts an MCP tool description into a function tool.
///
/// Only `type`, `properties` and `required` of the input schema are kept;
/// llama.cpp chat templates choke on the extra JSON-Schema keywords MCP
/// servers tend to emit (`$schema`, `additionalProperties`, ...).
pub fn convert_mcp_tool(
    name: &str,
    description: Option<&str>,
    input_schema: &Map<String, Value>,
) -> Tool {
    let mut parameters = Map::new();
    parameters.insert("type".to_string(), json!("object"));
    parameters.insert(
        "properties".to_string(),
        input_schema
            .get("properties")
            .cloned()
            .unwrap_or_else(|| json!({})),
    );
    if let Some(required) = input_schema.get("required") {
        parameters.insert("required".to_string(), required.clone());
    }
    Tool::function(name, description.unwrap_or_default(), Value::Object(parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Greeting {
        name: String,
    }

    #[test]
    fn parses_object_arguments() {
        let args = ToolArguments::from_json("say_hello", r#"{"name": "Jean-Luc Picard"}"#).unwrap();
        assert_eq!(args.get_str("name"), Some("Jean-Luc Picard"));
        let typed: Greeting = args.parse().unwrap();
        assert_eq!(typed.name, "Jean-Luc Picard");
    }

    #[test]
    fn empty_arguments_are_an_empty_object() {
        assert!(ToolArguments::from_json("list", "  ").unwrap().is_empty());
    }

    #[test]
    fn double_encoded_arguments_are_accepted() {
        let args = ToolArguments::from_json("say_hello", r#""{\"name\": \"Spock\"}""#).unwrap();
        assert_eq!(args.get_str("name"), Some("Spock"));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let err = ToolArguments::from_json("say_hello", r#"{"name": "Kirk""#).unwrap_err();
        assert!(matches!(err, LLMError::ArgumentParseError { ref tool, .. } if tool == "say_hello"));

        let err = ToolArguments::from_json("say_hello", "[1, 2]").unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn mcp_schema_keeps_properties_and_required() {
        let schema: Map<String, Value> = serde_json::from_value(json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {"query": {"type": "string"}, "count": {"type": "number"}},
            "required": ["query"]
        }))
        .unwrap();
        let tool = convert_mcp_tool("brave_web_search", Some("Search the web"), &schema);
        assert_eq!(tool.name(), "brave_web_search");
        assert_eq!(tool.function.description, "Search the web");
        assert_eq!(
            tool.function.parameters,
            json!({
                "type": "object",
                "properties": {"query": {"type": "string"}, "count": {"type": "number"}},
                "required": ["query"]
            })
        );
    }

    #[test]
    fn mcp_schema_without_properties() {
        let tool = convert_mcp_tool("now", None, &Map::new());
        assert_eq!(tool.function.description, "");
        assert_eq!(
            tool.function.parameters,
            json!({"type": "object", "properties": {}})
        );
    }
}
