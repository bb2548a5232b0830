//! llm-runner talks to a local model runner (Docker Model Runner, Ollama, any
//! llama.cpp server) through its OpenAI-compatible REST API.
//!
//! # Overview
//! The crate covers the building blocks of a small local AI application:
//!
//! - Chat completion, streaming and structured JSON output
//! - Tool / function calling, with a bounded multi-pass tool loop
//! - Embeddings and an in-memory vector store for retrieval-augmented generation
//! - Tools discovered on MCP servers
//!
//! # Architecture
//! Providers implement [`chat::ChatProvider`] and [`embedding::EmbeddingProvider`].
//! The [`rag`] store and the [`agent::ToolCallLoop`] only depend on those traits,
//! so they can be driven by stub providers in tests.

// Re-export for convenience
pub use async_trait::async_trait;

use serde::{Deserialize, Serialize};

/// Backend configurations for supported model runners
pub mod backends;

/// Builder pattern for configuring the HTTP provider and tool schemas
pub mod builder;

/// Chat-based interactions with language models
pub mod chat;

/// Explicit runtime configuration
pub mod config;

/// Vector embeddings generation for text
pub mod embedding;

/// Error types and handling
pub mod error;

/// Generic OpenAI-compatible HTTP provider
pub mod providers;

/// In-memory vector store and retrieval helpers
pub mod rag;

/// Typed structured output
pub mod structured;

/// Tool arguments, executors and schema conversion
pub mod tools;

/// Tool-calling loop, MCP toolkit and agent
pub mod agent;

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
/// This is a no-op if the feature is not enabled.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::try_init();
    }
}

/// Core trait for providers that can both chat and embed.
pub trait LLMProvider: chat::ChatProvider + embedding::EmbeddingProvider {}

impl<T: chat::ChatProvider + embedding::EmbeddingProvider> LLMProvider for T {}

/// Tool call represents a function call that an LLM wants to make.
#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq)]
pub struct ToolCall {
    /// The ID of the tool call.
    pub id: String,
    /// The type of the tool call (usually "function").
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    /// The function to call.
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// FunctionCall contains details about which function to call and with what arguments.
#[derive(Debug, Deserialize, Serialize, Clone, Eq, PartialEq)]
pub struct FunctionCall {
    /// The name of the function to call.
    pub name: String,
    /// The arguments to pass to the function, serialized as a JSON string.
    #[serde(default)]
    pub arguments: String,
}

impl std::fmt::Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{\"name\": \"{}\", \"arguments\": {}}}",
            self.function.name, self.function.arguments
        )
    }
}
