//! Docker Model Runner client using the OpenAI-compatible base
//!
//! Docker Model Runner serves models through its llama.cpp engine under
//! `/engines/llama.cpp/v1/`. No API key is required.

use crate::providers::openai_compatible::{OpenAICompatibleConfig, OpenAICompatibleProvider};

/// Path of the llama.cpp engine below the runner base URL.
pub const ENGINE_PATH: &str = "engines/llama.cpp/v1/";

/// Docker Model Runner configuration for the generic provider
pub struct ModelRunnerConfig;

impl OpenAICompatibleConfig for ModelRunnerConfig {
    const PROVIDER_NAME: &'static str = "Docker Model Runner";
    const DEFAULT_BASE_URL: &'static str = "http://localhost:12434/engines/llama.cpp/v1/";
}

/// Type alias for the Docker Model Runner client
pub type ModelRunner = OpenAICompatibleProvider<ModelRunnerConfig>;

/// Builds the chat endpoint base from a runner host URL such as
/// `http://model-runner.docker.internal`.
pub fn engine_url(runner_url: &str) -> String {
    format!("{}/{}", runner_url.trim_end_matches('/'), ENGINE_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_url_joins_without_double_slash() {
        assert_eq!(
            engine_url("http://model-runner.docker.internal/"),
            "http://model-runner.docker.internal/engines/llama.cpp/v1/"
        );
        assert_eq!(
            engine_url("http://localhost:12434"),
            "http://localhost:12434/engines/llama.cpp/v1/"
        );
    }
}
