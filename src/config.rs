//! Runtime configuration.
//!
//! Library code never reads the process environment; callers build a
//! [`RunnerConfig`] explicitly or, at the edge of a program, with
//! [`RunnerConfig::from_env`].

use serde::{Deserialize, Serialize};

use crate::backends::model_runner::engine_url;
use crate::chat::ChatParams;
use crate::error::LLMError;

/// Environment variable holding the model runner host URL.
pub const ENV_BASE_URL: &str = "MODEL_RUNNER_BASE_URL";
/// Environment variable holding the chat model.
pub const ENV_CHAT_MODEL: &str = "MODEL_RUNNER_LLM_CHAT";
/// Environment variable holding the tools model.
pub const ENV_TOOLS_MODEL: &str = "MODEL_RUNNER_LLM_TOOLS";
/// Environment variable holding the embeddings model.
pub const ENV_EMBEDDINGS_MODEL: &str = "MODEL_RUNNER_LLM_EMBEDDINGS";

/// Everything the chat, tool loop and retrieval code needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// OpenAI-compatible base URL, e.g. `http://localhost:12434/engines/llama.cpp/v1/`
    pub base_url: String,
    /// Optional bearer key; local runners don't need one
    pub api_key: Option<String>,
    /// Model writing the final answer
    pub chat_model: String,
    /// Model detecting tool calls
    pub tools_model: String,
    /// Model producing embeddings
    pub embeddings_model: String,
    /// Temperature of the final answer
    pub temperature: f32,
    /// Length limit of the final answer, in tokens
    pub max_tokens: Option<u32>,
    /// Temperature of tool detection; 0 keeps detection deterministic
    pub tools_temperature: f32,
    /// Maximum number of detect/execute passes of the tool loop
    pub max_passes: usize,
    /// Run the tool calls of one pass concurrently
    pub concurrent_tool_calls: bool,
    /// Inclusive lower bound of cosine similarity for retrieval
    pub min_similarity: f64,
    /// Maximum number of retrieved chunks
    pub max_results: usize,
    /// HTTP timeout in seconds
    pub timeout_seconds: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:12434/engines/llama.cpp/v1/".to_string(),
            api_key: None,
            chat_model: "ai/qwen2.5:latest".to_string(),
            tools_model: "ai/qwen2.5:latest".to_string(),
            embeddings_model: "ai/mxbai-embed-large".to_string(),
            temperature: 0.8,
            max_tokens: None,
            tools_temperature: 0.0,
            max_passes: 2,
            concurrent_tool_calls: false,
            min_similarity: 0.6,
            max_results: 2,
            timeout_seconds: None,
        }
    }
}

impl RunnerConfig {
    /// Reads the `MODEL_RUNNER_*` variables on top of the defaults.
    ///
    /// `MODEL_RUNNER_BASE_URL` is the runner host; the llama.cpp engine path is
    /// appended. The tools model falls back to the chat model.
    pub fn from_env() -> Result<Self, LLMError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RunnerConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LLMError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.is_empty()) {
            config.base_url = engine_url(&url);
        }
        if let Some(model) = lookup(ENV_CHAT_MODEL).filter(|m| !m.is_empty()) {
            config.tools_model = model.clone();
            config.chat_model = model;
        }
        if let Some(model) = lookup(ENV_TOOLS_MODEL).filter(|m| !m.is_empty()) {
            config.tools_model = model;
        }
        if let Some(model) = lookup(ENV_EMBEDDINGS_MODEL).filter(|m| !m.is_empty()) {
            config.embeddings_model = model;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the loop and the retrieval code cannot work with.
    pub fn validate(&self) -> Result<(), LLMError> {
        if self.max_passes == 0 {
            return Err(LLMError::InvalidRequest(
                "max_passes must be at least 1".to_string(),
            ));
        }
        if self.max_results == 0 {
            return Err(LLMError::InvalidRequest(
                "max_results must be at least 1".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.min_similarity) {
            return Err(LLMError::InvalidRequest(format!(
                "min_similarity {} is outside [-1, 1]",
                self.min_similarity
            )));
        }
        Ok(())
    }

    /// Parameters of tool-detection requests.
    pub fn tools_params(&self) -> ChatParams {
        ChatParams::new(&self.tools_model)
            .temperature(self.tools_temperature)
            .seed(0)
            .parallel_tool_calls(true)
    }

    /// Parameters of the final answer.
    pub fn chat_params(&self) -> ChatParams {
        let params = ChatParams::new(&self.chat_model).temperature(self.temperature);
        match self.max_tokens {
            Some(max_tokens) => params.max_tokens(max_tokens),
            None => params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_BASE_URL, "http://model-runner.docker.internal"),
            (ENV_CHAT_MODEL, "ai/qwen3:latest"),
            (ENV_TOOLS_MODEL, "ai/qwen2.5:latest"),
        ]);
        let config = RunnerConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(
            config.base_url,
            "http://model-runner.docker.internal/engines/llama.cpp/v1/"
        );
        assert_eq!(config.chat_model, "ai/qwen3:latest");
        assert_eq!(config.tools_model, "ai/qwen2.5:latest");
        assert_eq!(config.embeddings_model, "ai/mxbai-embed-large");
    }

    #[test]
    fn tools_model_falls_back_to_chat_model() {
        let config = RunnerConfig::from_lookup(|k| {
            (k == ENV_CHAT_MODEL).then(|| "ai/llama3.2".to_string())
        })
        .unwrap();
        assert_eq!(config.tools_model, "ai/llama3.2");
    }

    #[test]
    fn tools_params_are_deterministic() {
        let params = RunnerConfig::default().tools_params();
        assert_eq!(params.temperature, Some(0.0));
        assert_eq!(params.seed, Some(0));
    }

    #[test]
    fn zero_passes_is_rejected() {
        let config = RunnerConfig {
            max_passes: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LLMError::InvalidRequest(_))));
    }

    #[test]
    fn partial_json_config_keeps_defaults() {
        let config: RunnerConfig = serde_json::from_str(r#"{"max_passes": 3}"#).unwrap();
        assert_eq!(config.max_passes, 3);
        assert_eq!(config.min_similarity, 0.6);
    }

    #[test]
    fn max_tokens_only_limits_the_answer() {
        let config = RunnerConfig {
            max_tokens: Some(256),
            ..RunnerConfig::default()
        };
        assert_eq!(config.chat_params().max_tokens, Some(256));
        assert_eq!(config.tools_params().max_tokens, None);
        assert_eq!(RunnerConfig::default().chat_params().max_tokens, None);
    }
}
