use std::fmt;

/// Error types that can occur when talking to the model runner, the tool
/// servers or the vector store.
#[derive(Debug)]
pub enum LLMError {
    /// HTTP request/response errors
    HttpError(String),
    /// Authentication and authorization errors
    AuthError(String),
    /// Invalid request parameters or configuration
    InvalidRequest(String),
    /// Errors returned by the model runner
    ProviderError(String),
    /// The response body could not be decoded
    ResponseFormatError {
        message: String,
        raw_response: String,
    },
    /// JSON serialization/deserialization errors
    JsonError(String),
    /// The embedding endpoint could not produce a vector
    EmbeddingError(String),
    /// The completion endpoint failed or returned no usable choice
    CompletionError(String),
    /// A tool call carried arguments that are not a valid JSON object
    ArgumentParseError { tool: String, message: String },
    /// A tool server rejected or failed a call, or the tool is not registered
    ToolInvocationError { tool: String, message: String },
    /// A record identifier could not be generated
    IdentifierError(String),
    /// The operation was cancelled or its deadline passed
    Cancelled,
    /// Anything else
    Generic(String),
}

impl LLMError {
    /// Errors scoped to a single tool call. The tool loop logs and skips these
    /// instead of aborting the conversation.
    pub fn is_tool_scoped(&self) -> bool {
        matches!(
            self,
            LLMError::ArgumentParseError { .. } | LLMError::ToolInvocationError { .. }
        )
    }
}

impl fmt::Display for LLMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LLMError::HttpError(e) => write!(f, "HTTP Error: {e}"),
            LLMError::AuthError(e) => write!(f, "Auth Error: {e}"),
            LLMError::InvalidRequest(e) => write!(f, "Invalid Request: {e}"),
            LLMError::ProviderError(e) => write!(f, "Provider Error: {e}"),
            LLMError::ResponseFormatError {
                message,
                raw_response,
            } => write!(f, "Response Format Error: {message}. Raw response: {raw_response}"),
            LLMError::JsonError(e) => write!(f, "JSON Parse Error: {e}"),
            LLMError::EmbeddingError(e) => write!(f, "Embedding Error: {e}"),
            LLMError::CompletionError(e) => write!(f, "Completion Error: {e}"),
            LLMError::ArgumentParseError { tool, message } => {
                write!(f, "Invalid arguments for tool '{tool}': {message}")
            }
            LLMError::ToolInvocationError { tool, message } => {
                write!(f, "Tool '{tool}' failed: {message}")
            }
            LLMError::IdentifierError(e) => write!(f, "Identifier Error: {e}"),
            LLMError::Cancelled => write!(f, "Operation cancelled"),
            LLMError::Generic(e) => write!(f, "Generic Error: {e}"),
        }
    }
}

impl std::error::Error for LLMError {}

/// Converts reqwest HTTP errors into LLMErrors
impl From<reqwest::Error> for LLMError {
    fn from(err: reqwest::Error) -> Self {
        LLMError::HttpError(err.to_string())
    }
}

impl From<serde_json::Error> for LLMError {
    fn from(err: serde_json::Error) -> Self {
        LLMError::JsonError(err.to_string())
    }
}
