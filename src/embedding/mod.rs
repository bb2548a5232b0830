use async_trait::async_trait;

use crate::error::LLMError;

/// Trait for providers that turn text into embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Sync + Send {
    /// Embeds every input string with `model`, one vector per input, in input order.
    async fn embed(&self, input: Vec<String>, model: &str) -> Result<Vec<Vec<f64>>, LLMError>;

    /// Embeds a single text.
    async fn embed_one(&self, text: &str, model: &str) -> Result<Vec<f64>, LLMError> {
        self.embed(vec![text.to_string()], model)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::EmbeddingError("no embedding returned".to_string()))
    }
}
