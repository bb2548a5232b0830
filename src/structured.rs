//! Typed structured output.
//!
//! The model is constrained with a `json_schema` response format and its
//! answer is decoded straight into a Rust type.

use serde::de::DeserializeOwned;

use crate::chat::{ChatMessage, ChatParams, ChatProvider, StructuredOutputFormat};
use crate::error::LLMError;

/// Asks `question` and decodes the JSON answer into `T`.
///
/// The request runs at temperature 0 with `format` as response format,
/// whatever `params` says about either.
///
/// ```no_run
/// # async fn run(llm: &dyn llm_runner::chat::ChatProvider) -> Result<(), llm_runner::error::LLMError> {
/// use llm_runner::chat::{ChatParams, StructuredOutputFormat};
/// use llm_runner::structured::generate_structured;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Country {
///     name: String,
///     capital: String,
/// }
///
/// let format: StructuredOutputFormat = serde_json::from_str(
///     r#"{"name": "country_info", "schema": {"type": "object",
///         "properties": {"name": {"type": "string"}, "capital": {"type": "string"}},
///         "required": ["name", "capital"]}}"#,
/// )?;
/// let country: Country =
///     generate_structured(llm, &ChatParams::new("ai/qwen2.5:latest"), format, "Tell me about Canada.").await?;
/// println!("{} -> {}", country.name, country.capital);
/// # Ok(())
/// # }
/// ```
pub async fn generate_structured<T, C>(
    provider: &C,
    params: &ChatParams,
    format: StructuredOutputFormat,
    question: &str,
) -> Result<T, LLMError>
where
    T: DeserializeOwned,
    C: ChatProvider + ?Sized,
{
    let params = params.clone().temperature(0.0).response_format(format);
    let messages = [ChatMessage::user().content(question).build()];
    let response = provider.chat(&messages, &params).await?;
    let content = response
        .text()
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| LLMError::CompletionError("no content returned".to_string()))?;
    log::debug!("structured answer: {content}");
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatResponse, Tool};
    use crate::ToolCall;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Answer(Option<String>);

    impl std::fmt::Display for Answer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0.as_deref().unwrap_or_default())
        }
    }

    impl ChatResponse for Answer {
        fn text(&self) -> Option<String> {
            self.0.clone()
        }

        fn tool_calls(&self) -> Option<Vec<ToolCall>> {
            None
        }
    }

    struct Canned {
        answer: Option<String>,
        seen: Mutex<Option<ChatParams>>,
    }

    impl Canned {
        fn new(answer: Option<&str>) -> Self {
            Self {
                answer: answer.map(str::to_string),
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for Canned {
        async fn chat_with_tools(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[Tool]>,
            params: &ChatParams,
        ) -> Result<Box<dyn ChatResponse>, LLMError> {
            *self.seen.lock().unwrap() = Some(params.clone());
            Ok(Box::new(Answer(self.answer.clone())))
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Country {
        name: String,
        capital: String,
        languages: Vec<String>,
    }

    fn country_format() -> StructuredOutputFormat {
        StructuredOutputFormat {
            name: "country_info".into(),
            description: None,
            schema: Some(serde_json::json!({"type": "object"})),
            strict: Some(true),
        }
    }

    #[tokio::test]
    async fn decodes_the_answer() {
        let llm = Canned::new(Some(
            r#"{"name":"Canada","capital":"Ottawa","languages":["English","French"]}"#,
        ));
        let params = ChatParams::new("ai/qwen2.5:latest").temperature(0.8);
        let country: Country = generate_structured(&llm, &params, country_format(), "Canada?")
            .await
            .unwrap();
        assert_eq!(country.capital, "Ottawa");

        let seen = llm.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.temperature, Some(0.0));
        assert_eq!(seen.response_format, Some(country_format()));
    }

    #[tokio::test]
    async fn empty_content_is_a_completion_error() {
        let llm = Canned::new(Some("  "));
        let params = ChatParams::new("ai/qwen2.5:latest");
        let err = generate_structured::<Country, _>(&llm, &params, country_format(), "?")
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Completion Error: no content returned");

        let llm = Canned::new(None);
        assert!(matches!(
            generate_structured::<Country, _>(&llm, &params, country_format(), "?").await,
            Err(LLMError::CompletionError(_))
        ));
    }

    #[tokio::test]
    async fn invalid_json_is_a_json_error() {
        let llm = Canned::new(Some(r#"{"name":"Canada"}"#));
        let params = ChatParams::new("ai/qwen2.5:latest");
        assert!(matches!(
            generate_structured::<Country, _>(&llm, &params, country_format(), "?").await,
            Err(LLMError::JsonError(_))
        ));
    }
}
