//! OpenAI-compatible API client base implementation
//!
//! Local model runners (Docker Model Runner's llama.cpp engine, Ollama, a bare
//! llama.cpp server) all expose the OpenAI chat and embeddings endpoints. This
//! module implements those endpoints once; each runner only supplies an
//! `OpenAICompatibleConfig`.

use std::marker::PhantomData;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::chat::{
    ChatMessage, ChatParams, ChatProvider, ChatResponse, ChatRole, ChatStream, MessageType,
    StructuredOutputFormat, Tool,
};
use crate::embedding::EmbeddingProvider;
use crate::error::LLMError;
use crate::ToolCall;

/// Generic OpenAI-compatible provider
///
/// Model and sampling settings travel with each request in `ChatParams`, so a
/// single provider serves both the tools model and the chat model.
pub struct OpenAICompatibleProvider<T: OpenAICompatibleConfig> {
    pub api_key: Option<String>,
    pub base_url: Url,
    pub system: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub client: Client,
    _phantom: PhantomData<T>,
}

/// Configuration trait for OpenAI-compatible runners
pub trait OpenAICompatibleConfig: Send + Sync {
    /// The name of the runner (e.g., "Docker Model Runner", "Ollama")
    const PROVIDER_NAME: &'static str;

    /// Default base URL, ending with a slash
    const DEFAULT_BASE_URL: &'static str;

    /// Chat completions endpoint path
    const CHAT_ENDPOINT: &'static str = "chat/completions";

    /// Embeddings endpoint path
    const EMBEDDINGS_ENDPOINT: &'static str = "embeddings";

    /// Whether this runner accepts `response_format`
    const SUPPORTS_STRUCTURED_OUTPUT: bool = true;

    /// Whether this runner accepts `parallel_tool_calls`
    const SUPPORTS_PARALLEL_TOOL_CALLS: bool = true;
}

/// Chat message in the OpenAI wire format
#[derive(Serialize, Debug, PartialEq)]
pub struct OpenAICompatibleChatMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Chat request in the OpenAI wire format
#[derive(Serialize, Debug)]
pub struct OpenAICompatibleChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<OpenAICompatibleChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<&'a [Tool]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

/// Chat response in the OpenAI wire format
#[derive(Deserialize, Debug)]
pub struct OpenAICompatibleChatResponse {
    pub choices: Vec<OpenAICompatibleChatChoice>,
}

#[derive(Deserialize, Debug)]
pub struct OpenAICompatibleChatChoice {
    pub message: OpenAICompatibleChatMsg,
}

#[derive(Deserialize, Debug)]
pub struct OpenAICompatibleChatMsg {
    pub role: String,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug, Serialize, PartialEq)]
pub enum ResponseType {
    #[serde(rename = "json_schema")]
    JsonSchema,
}

#[derive(Deserialize, Debug, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<StructuredOutputFormat>,
}

/// Streaming response structures
#[derive(Deserialize, Debug)]
pub struct ChatStreamChunk {
    #[serde(default)]
    pub choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize, Debug)]
pub struct ChatStreamChoice {
    pub delta: ChatStreamDelta,
}

#[derive(Deserialize, Debug)]
pub struct ChatStreamDelta {
    pub content: Option<String>,
}

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    encoding_format: &'static str,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f64>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

impl From<StructuredOutputFormat> for ResponseFormat {
    fn from(format: StructuredOutputFormat) -> Self {
        let schema = format.schema.map(|mut schema| {
            if schema.get("additionalProperties").is_none() {
                schema["additionalProperties"] = serde_json::json!(false);
            }
            schema
        });
        ResponseFormat {
            response_type: ResponseType::JsonSchema,
            json_schema: Some(StructuredOutputFormat { schema, ..format }),
        }
    }
}

impl ChatResponse for OpenAICompatibleChatResponse {
    fn text(&self) -> Option<String> {
        self.choices.first().and_then(|c| c.message.content.clone())
    }

    fn tool_calls(&self) -> Option<Vec<ToolCall>> {
        self.choices
            .first()
            .and_then(|c| c.message.tool_calls.clone())
            .filter(|calls| !calls.is_empty())
    }
}

impl std::fmt::Display for OpenAICompatibleChatResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(choice) = self.choices.first() else {
            return Ok(());
        };
        if let Some(tool_calls) = &choice.message.tool_calls {
            for tool_call in tool_calls {
                writeln!(f, "{tool_call}")?;
            }
        }
        if let Some(content) = &choice.message.content {
            write!(f, "{content}")?;
        }
        Ok(())
    }
}

impl<T: OpenAICompatibleConfig> OpenAICompatibleProvider<T> {
    /// Creates a provider; `base_url` falls back to the runner default.
    pub fn new(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout_seconds: Option<u64>,
        system: Option<String>,
    ) -> Result<Self, LLMError> {
        let mut builder = Client::builder();
        if let Some(sec) = timeout_seconds {
            builder = builder.timeout(std::time::Duration::from_secs(sec));
        }
        let raw_url = base_url.unwrap_or_else(|| T::DEFAULT_BASE_URL.to_owned());
        Ok(Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: parse_base_url(&raw_url)?,
            system,
            timeout_seconds,
            client: builder.build()?,
            _phantom: PhantomData,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, LLMError> {
        self.base_url
            .join(path)
            .map_err(|e| LLMError::HttpError(e.to_string()))
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        let mut request = self.client.post(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request
    }

    fn build_request<'a>(
        &'a self,
        messages: &[ChatMessage],
        tools: Option<&'a [Tool]>,
        params: &'a ChatParams,
        stream: bool,
    ) -> OpenAICompatibleChatRequest<'a> {
        let tools = tools.filter(|t| !t.is_empty());
        let response_format = if T::SUPPORTS_STRUCTURED_OUTPUT {
            params.response_format.clone().map(ResponseFormat::from)
        } else {
            None
        };
        let parallel_tool_calls = if T::SUPPORTS_PARALLEL_TOOL_CALLS && tools.is_some() {
            params.parallel_tool_calls
        } else {
            None
        };
        OpenAICompatibleChatRequest {
            model: &params.model,
            messages: to_api_messages(messages, self.system.as_deref()),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            seed: params.seed,
            stream,
            tools,
            response_format,
            parallel_tool_calls,
        }
    }

    async fn send_chat(
        &self,
        body: &OpenAICompatibleChatRequest<'_>,
    ) -> Result<reqwest::Response, LLMError> {
        if body.model.is_empty() {
            return Err(LLMError::InvalidRequest("No model specified".to_string()));
        }
        let url = self.endpoint(T::CHAT_ENDPOINT)?;

        if log::log_enabled!(log::Level::Trace) {
            if let Ok(json) = serde_json::to_string(body) {
                log::trace!("{} request payload: {}", T::PROVIDER_NAME, json);
            }
        }

        let response = self.post(url).json(body).send().await?;
        log::debug!("{} HTTP status: {}", T::PROVIDER_NAME, response.status());

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LLMError::AuthError(format!(
                "{} rejected the request: {status}",
                T::PROVIDER_NAME
            )));
        }
        if !status.is_success() {
            let error_text = response.text().await?;
            return Err(LLMError::CompletionError(format!(
                "{} API returned error status {status}: {error_text}",
                T::PROVIDER_NAME
            )));
        }
        Ok(response)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, LLMError> {
    // Url::join drops the last path segment unless the base ends with '/'
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized)
        .map_err(|e| LLMError::InvalidRequest(format!("Invalid base URL '{raw}': {e}")))
}

#[async_trait]
impl<T: OpenAICompatibleConfig> ChatProvider for OpenAICompatibleProvider<T> {
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Tool]>,
        params: &ChatParams,
    ) -> Result<Box<dyn ChatResponse>, LLMError> {
        let body = self.build_request(messages, tools, params, false);
        let response = self.send_chat(&body).await?;

        let resp_text = response.text().await?;
        match serde_json::from_str::<OpenAICompatibleChatResponse>(&resp_text) {
            Ok(response) if response.choices.is_empty() => Err(LLMError::CompletionError(
                format!("{} returned no choices", T::PROVIDER_NAME),
            )),
            Ok(response) => Ok(Box::new(response)),
            Err(e) => Err(LLMError::ResponseFormatError {
                message: format!("Failed to decode {} API response: {e}", T::PROVIDER_NAME),
                raw_response: resp_text,
            }),
        }
    }

    /// Stream chat responses as content fragments
    async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<ChatStream, LLMError> {
        let body = self.build_request(messages, None, params, true);
        let response = self.send_chat(&body).await?;
        Ok(create_sse_stream(response))
    }
}

#[async_trait]
impl<T: OpenAICompatibleConfig> EmbeddingProvider for OpenAICompatibleProvider<T> {
    async fn embed(&self, input: Vec<String>, model: &str) -> Result<Vec<Vec<f64>>, LLMError> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let expected = input.len();
        let body = EmbeddingRequest {
            model,
            input,
            encoding_format: "float",
        };
        let url = self.endpoint(T::EMBEDDINGS_ENDPOINT)?;
        let response = self
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::EmbeddingError(e.to_string()))?;
        log::debug!("{} embeddings HTTP status: {}", T::PROVIDER_NAME, response.status());

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::EmbeddingError(format!(
                "{} API returned error status {status}: {error_text}",
                T::PROVIDER_NAME
            )));
        }

        let mut json_resp: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LLMError::EmbeddingError(e.to_string()))?;
        if json_resp.data.len() != expected {
            return Err(LLMError::EmbeddingError(format!(
                "expected {expected} embeddings, got {}",
                json_resp.data.len()
            )));
        }
        json_resp.data.sort_by_key(|d| d.index);
        Ok(json_resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Converts chat messages to the wire format. A tool-result message holding
/// several results becomes one `tool` message per result.
pub fn to_api_messages(
    messages: &[ChatMessage],
    system: Option<&str>,
) -> Vec<OpenAICompatibleChatMessage> {
    let mut api_msgs = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system {
        api_msgs.push(OpenAICompatibleChatMessage {
            role: "system",
            content: Some(system.to_string()),
            tool_calls: None,
            tool_call_id: None,
        });
    }
    for msg in messages {
        match &msg.message_type {
            MessageType::ToolResult(results) => {
                for result in results {
                    api_msgs.push(OpenAICompatibleChatMessage {
                        role: "tool",
                        content: Some(result.function.arguments.clone()),
                        tool_calls: None,
                        tool_call_id: Some(result.id.clone()),
                    });
                }
            }
            MessageType::ToolUse(calls) => api_msgs.push(OpenAICompatibleChatMessage {
                role: "assistant",
                content: Some(msg.content.clone()).filter(|c| !c.is_empty()),
                tool_calls: Some(calls.clone()),
                tool_call_id: None,
            }),
            MessageType::Text => api_msgs.push(OpenAICompatibleChatMessage {
                role: role_name(&msg.role),
                content: Some(msg.content.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
        }
    }
    api_msgs
}

fn role_name(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
        ChatRole::Tool => "tool",
    }
}

/// Creates a content stream from a Server-Sent Events response.
pub fn create_sse_stream(response: reqwest::Response) -> ChatStream {
    sse_content_stream(response.bytes_stream())
}

/// Decodes SSE content fragments from a stream of byte chunks.
///
/// Bytes are buffered until a full line is available, so events split across
/// network chunks are decoded correctly. A last line without its newline is
/// decoded when the byte stream ends.
pub fn sse_content_stream<S, B, E>(bytes: S) -> ChatStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = bytes
        .map(Some)
        .chain(futures::stream::once(futures::future::ready(None)))
        .scan(Vec::<u8>::new(), |buffer, chunk| {
            let items = match chunk {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(bytes.as_ref());
                    drain_sse_lines(buffer)
                }
                Some(Err(e)) => vec![Err(LLMError::HttpError(e.to_string()))],
                None => {
                    if !buffer.is_empty() {
                        buffer.push(b'\n');
                    }
                    drain_sse_lines(buffer)
                }
            };
            futures::future::ready(Some(futures::stream::iter(items)))
        })
        .flatten();
    Box::pin(stream)
}

/// Removes every complete line from `buffer` and returns the content
/// fragments they carry.
pub fn drain_sse_lines(buffer: &mut Vec<u8>) -> Vec<Result<String, LLMError>> {
    let mut out = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        match parse_sse_line(line.trim()) {
            Ok(Some(content)) => out.push(Ok(content)),
            Ok(None) => {}
            Err(e) => out.push(Err(e)),
        }
    }
    out
}

/// Parses one SSE line. Returns `None` for comments, keep-alives, `[DONE]`
/// and deltas without content.
pub fn parse_sse_line(line: &str) -> Result<Option<String>, LLMError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    match serde_json::from_str::<ChatStreamChunk>(data) {
        Ok(chunk) => Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())),
        Err(_) => {
            // llama.cpp reports mid-stream failures as {"error": {...}}
            let value: serde_json::Value = serde_json::from_str(data)?;
            match value.get("error") {
                Some(err) => Err(LLMError::ProviderError(err.to_string())),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FunctionCall;

    #[test]
    fn sse_lines_are_buffered_across_chunks() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\ndata: {\"choi");
        let first = drain_sse_lines(&mut buffer);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].as_ref().unwrap(), "Hel");

        buffer.extend_from_slice(b"ces\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n");
        let second: Vec<String> = drain_sse_lines(&mut buffer)
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(second, vec!["lo".to_string()]);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn last_event_without_newline_is_flushed() {
        let chunks = vec![
            Ok::<_, std::io::Error>(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"Live long\"}}]}\n\n".to_vec(),
            ),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\" and prosper\"}}]}".to_vec()),
        ];
        let stream = sse_content_stream(futures::stream::iter(chunks));
        let text = crate::chat::collect_stream(stream).await.unwrap();
        assert_eq!(text, "Live long and prosper");
    }

    #[test]
    fn sse_error_payload_is_surfaced() {
        let result = parse_sse_line(r#"data: {"error":{"message":"context too long"}}"#);
        assert!(matches!(result, Err(LLMError::ProviderError(_))));
        assert!(parse_sse_line(": keep-alive").unwrap().is_none());
        assert!(parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#)
            .unwrap()
            .is_none());
    }

    #[test]
    fn tool_results_become_tool_messages() {
        let call = ToolCall {
            id: "call_1".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "say_hello".into(),
                arguments: r#"{"name":"Kirk"}"#.into(),
            },
        };
        let messages = vec![
            ChatMessage::user().content("Say hello to Kirk").build(),
            ChatMessage::assistant().tool_use(vec![call.clone()]).build(),
            ChatMessage::tool_output(&call, "Hello Kirk"),
        ];
        let api = to_api_messages(&messages, Some("You are a useful AI agent."));
        assert_eq!(api.len(), 4);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[2].role, "assistant");
        assert_eq!(api[2].content, None);
        assert_eq!(api[3].role, "tool");
        assert_eq!(api[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api[3].content.as_deref(), Some("Hello Kirk"));
    }

    #[test]
    fn structured_format_defaults_additional_properties() {
        let format = StructuredOutputFormat {
            name: "country_info".into(),
            description: None,
            schema: Some(serde_json::json!({"type": "object", "properties": {}})),
            strict: Some(true),
        };
        let response_format = ResponseFormat::from(format);
        assert_eq!(response_format.response_type, ResponseType::JsonSchema);
        let schema = response_format.json_schema.unwrap().schema.unwrap();
        assert_eq!(schema["additionalProperties"], serde_json::json!(false));
    }

    #[test]
    fn response_without_tool_calls() {
        let resp: OpenAICompatibleChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hi","tool_calls":[]}}]}"#,
        )
        .unwrap();
        assert_eq!(resp.text().as_deref(), Some("Hi"));
        assert!(resp.tool_calls().is_none());
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = parse_base_url("http://localhost:12434/engines/llama.cpp/v1").unwrap();
        assert_eq!(
            url.join("chat/completions").unwrap().as_str(),
            "http://localhost:12434/engines/llama.cpp/v1/chat/completions"
        );
    }
}
