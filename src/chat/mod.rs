use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::LLMError, FunctionCall, ToolCall};

/// Stream of content fragments produced by a streaming completion.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LLMError>> + Send>>;

/// Role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRole {
    /// Instructions for the model
    System,
    /// The user/human participant in the conversation
    User,
    /// The AI assistant participant in the conversation
    Assistant,
    /// The output of a tool call
    Tool,
}

/// The type of a message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MessageType {
    /// A text message
    #[default]
    Text,
    /// The tool calls requested by the assistant
    ToolUse(Vec<ToolCall>),
    /// Tool results; `function.arguments` holds the tool output
    ToolResult(Vec<ToolCall>),
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// The role of who sent this message
    pub role: ChatRole,
    /// The type of the message (text, tool use, tool result)
    pub message_type: MessageType,
    /// The text content of the message
    pub content: String,
}

/// Represents a parameter in a function tool
#[derive(Debug, Clone, Serialize)]
pub struct ParameterProperty {
    /// The type of the parameter (e.g. "string", "number", "array", etc)
    #[serde(rename = "type")]
    pub property_type: String,
    /// Description of what the parameter does
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// When type is "array", this defines the type of the array items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterProperty>>,
    /// When type is "enum", this defines the possible values for the parameter
    #[serde(skip_serializing_if = "Option::is_none", rename = "enum")]
    pub enum_list: Option<Vec<String>>,
}

/// Represents the parameters schema for a function tool
#[derive(Debug, Clone, Serialize)]
pub struct ParametersSchema {
    /// The type of the parameters object (usually "object")
    #[serde(rename = "type")]
    pub schema_type: String,
    /// Map of parameter names to their properties
    pub properties: HashMap<String, ParameterProperty>,
    /// List of required parameter names
    pub required: Vec<String>,
}

impl From<ParameterProperty> for Value {
    fn from(property: ParameterProperty) -> Self {
        let mut map = serde_json::Map::new();
        map.insert("type".into(), Value::String(property.property_type));
        if !property.description.is_empty() {
            map.insert("description".into(), Value::String(property.description));
        }
        if let Some(items) = property.items {
            map.insert("items".into(), Value::from(*items));
        }
        if let Some(values) = property.enum_list {
            map.insert("enum".into(), Value::from(values));
        }
        Value::Object(map)
    }
}

impl From<ParametersSchema> for Value {
    fn from(schema: ParametersSchema) -> Self {
        let properties = schema
            .properties
            .into_iter()
            .map(|(name, property)| (name, Value::from(property)))
            .collect();
        let mut map = serde_json::Map::new();
        map.insert("type".into(), Value::String(schema.schema_type));
        map.insert("properties".into(), Value::Object(properties));
        map.insert("required".into(), Value::from(schema.required));
        Value::Object(map)
    }
}

/// Represents a function definition for a tool.
///
/// The `parameters` field stores the JSON Schema describing the function
/// arguments. It is kept as a raw `serde_json::Value` so schemas coming from
/// MCP servers can be forwarded without a bespoke Rust structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionTool {
    /// Name of the function
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema describing the parameters
    pub parameters: Value,
}

/// Represents a tool that can be used in chat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The type of tool (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// The function definition
    pub function: FunctionTool,
}

impl Tool {
    /// Creates a function tool from its name, description and parameter schema.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionTool {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    /// Name of the function this tool declares.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Defines rules for structured output responses, following the
/// `response_format.json_schema` object of the OpenAI chat API.
///
/// ## Example
///
/// ```
/// use llm_runner::chat::StructuredOutputFormat;
///
/// let format: StructuredOutputFormat = serde_json::from_str(
///     r#"{
///         "name": "country_info",
///         "description": "Notable information about a country in the world",
///         "schema": {
///             "type": "object",
///             "properties": { "name": { "type": "string" } },
///             "required": ["name"]
///         },
///         "strict": true
///     }"#,
/// )
/// .unwrap();
/// assert_eq!(format.name, "country_info");
/// assert_eq!(format.strict, Some(true));
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StructuredOutputFormat {
    /// Name of the schema
    pub name: String,
    /// The description of the schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The JSON schema for the structured output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    /// Whether to enable strict schema adherence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// Per-request generation parameters.
///
/// The same endpoint is typically called with two settings: a tools model at
/// temperature 0 to detect calls, and a chat model at a higher temperature to
/// write the answer.
#[derive(Debug, Clone, Default)]
pub struct ChatParams {
    /// Model identifier, e.g. `ai/qwen2.5:latest`
    pub model: String,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum number of tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling seed
    pub seed: Option<u64>,
    /// Let the model request several tool calls at once
    pub parallel_tool_calls: Option<bool>,
    /// Constrain the answer to a JSON schema
    pub response_format: Option<StructuredOutputFormat>,
}

impl ChatParams {
    /// Parameters for the given model with every option unset.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Sets the sampling temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the maximum number of tokens to generate.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the sampling seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Allows or forbids several tool calls in one answer.
    pub fn parallel_tool_calls(mut self, enabled: bool) -> Self {
        self.parallel_tool_calls = Some(enabled);
        self
    }

    /// Requests a structured JSON answer.
    pub fn response_format(mut self, format: StructuredOutputFormat) -> Self {
        self.response_format = Some(format);
        self
    }
}

pub trait ChatResponse: std::fmt::Debug + std::fmt::Display + Send + Sync {
    fn text(&self) -> Option<String>;
    fn tool_calls(&self) -> Option<Vec<ToolCall>>;
}

/// Trait for providers that support chat-style interactions.
#[async_trait]
pub trait ChatProvider: Sync + Send {
    /// Sends a chat request to the provider with a sequence of messages.
    ///
    /// # Arguments
    ///
    /// * `messages` - The conversation history as a slice of chat messages
    /// * `params` - Model and sampling parameters for this request
    ///
    /// # Returns
    ///
    /// The provider's response or an error
    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<Box<dyn ChatResponse>, LLMError> {
        self.chat_with_tools(messages, None, params).await
    }

    /// Sends a chat request to the provider with a sequence of messages and tools.
    ///
    /// # Arguments
    ///
    /// * `messages` - The conversation history as a slice of chat messages
    /// * `tools` - Optional slice of tools the model may call
    /// * `params` - Model and sampling parameters for this request
    ///
    /// # Returns
    ///
    /// The provider's response or an error
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
        params: &ChatParams,
    ) -> Result<Box<dyn ChatResponse>, LLMError>;

    /// Sends a streaming chat request to the provider with a sequence of messages.
    ///
    /// # Returns
    ///
    /// A stream of text fragments or an error
    async fn chat_stream(
        &self,
        _messages: &[ChatMessage],
        _params: &ChatParams,
    ) -> Result<ChatStream, LLMError> {
        Err(LLMError::Generic(
            "Streaming not supported for this provider".to_string(),
        ))
    }
}

impl ChatMessage {
    /// Create a new builder for a system message
    pub fn system() -> ChatMessageBuilder {
        ChatMessageBuilder::new(ChatRole::System)
    }

    /// Create a new builder for a user message
    pub fn user() -> ChatMessageBuilder {
        ChatMessageBuilder::new(ChatRole::User)
    }

    /// Create a new builder for an assistant message
    pub fn assistant() -> ChatMessageBuilder {
        ChatMessageBuilder::new(ChatRole::Assistant)
    }

    /// Result message answering `call`, correlated through the call id.
    pub fn tool_output(call: &ToolCall, output: impl Into<String>) -> ChatMessage {
        ChatMessageBuilder::new(ChatRole::Tool)
            .tool_result(vec![ToolCall {
                id: call.id.clone(),
                call_type: call.call_type.clone(),
                function: FunctionCall {
                    name: call.function.name.clone(),
                    arguments: output.into(),
                },
            }])
            .build()
    }

    /// Identifiers of the tool calls this message answers.
    pub fn answered_call_ids(&self) -> Vec<&str> {
        match &self.message_type {
            MessageType::ToolResult(results) => results.iter().map(|r| r.id.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Builder for ChatMessage
#[derive(Debug)]
pub struct ChatMessageBuilder {
    role: ChatRole,
    message_type: MessageType,
    content: String,
}

impl ChatMessageBuilder {
    /// Create a new ChatMessageBuilder with specified role
    pub fn new(role: ChatRole) -> Self {
        Self {
            role,
            message_type: MessageType::default(),
            content: String::new(),
        }
    }

    /// Set the message content
    pub fn content<S: Into<String>>(mut self, content: S) -> Self {
        self.content = content.into();
        self
    }

    /// Set the message type as ToolUse
    pub fn tool_use(mut self, tools: Vec<ToolCall>) -> Self {
        self.message_type = MessageType::ToolUse(tools);
        self
    }

    /// Set the message type as ToolResult
    pub fn tool_result(mut self, tools: Vec<ToolCall>) -> Self {
        self.message_type = MessageType::ToolResult(tools);
        self
    }

    /// Build the ChatMessage
    pub fn build(self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            message_type: self.message_type,
            content: self.content,
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
            ChatRole::Tool => write!(f, "tool"),
        }
    }
}

/// Collects a content stream into a single string.
///
/// Used where the caller wants the final answer at once instead of printing
/// it fragment by fragment.
pub async fn collect_stream(mut stream: ChatStream) -> Result<String, LLMError> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_output_keeps_the_call_id() {
        let call = ToolCall {
            id: "call_42".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "say_hello".into(),
                arguments: r#"{"name":"Spock"}"#.into(),
            },
        };
        let msg = ChatMessage::tool_output(&call, "Hello Spock");
        assert_eq!(msg.role, ChatRole::Tool);
        assert_eq!(msg.answered_call_ids(), vec!["call_42"]);
        match msg.message_type {
            MessageType::ToolResult(results) => {
                assert_eq!(results[0].function.arguments, "Hello Spock")
            }
            other => panic!("unexpected message type {other:?}"),
        }
    }

    #[tokio::test]
    async fn collect_stream_stops_on_error() {
        let items: Vec<Result<String, LLMError>> = vec![
            Ok("Hello".into()),
            Err(LLMError::HttpError("reset".into())),
            Ok("never".into()),
        ];
        let stream: ChatStream = Box::pin(futures::stream::iter(items));
        assert!(matches!(
            collect_stream(stream).await,
            Err(LLMError::HttpError(_))
        ));
    }
}
