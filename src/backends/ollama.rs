//! Ollama client through its OpenAI-compatible `/v1` endpoints.

use crate::providers::openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleProvider};

/// Ollama configuration for the generic provider
pub struct OllamaConfig;

impl OpenAICompatibleConfig for OllamaConfig {
    const PROVIDER_NAME: &'static str = "Ollama";
    const DEFAULT_BASE_URL: &'static str = "http://localhost:11434/v1/";
    // Ollama ignores parallel_tool_calls and rejects it on older releases
    const SUPPORTS_PARALLEL_TOOL_CALLS: bool = false;
}

/// Type alias for the Ollama client
pub type Ollama = OpenAICompatibleProvider<OllamaConfig>;
