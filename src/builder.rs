//! Builder module for configuring providers and declaring tool schemas.

use crate::{
    backends::{model_runner::ModelRunner, ollama::Ollama},
    chat::{ParameterProperty, ParametersSchema, Tool},
    config::RunnerConfig,
    error::LLMError,
    LLMProvider,
};
use std::collections::HashMap;

/// Supported model runners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LLMBackend {
    /// Docker Model Runner (llama.cpp engine)
    #[default]
    ModelRunner,
    /// Ollama local LLM server
    Ollama,
}

/// Implements string parsing for LLMBackend enum.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use llm_runner::builder::LLMBackend;
///
/// let backend = LLMBackend::from_str("docker").unwrap();
/// assert_eq!(backend, LLMBackend::ModelRunner);
///
/// let err = LLMBackend::from_str("invalid").unwrap_err();
/// assert!(err.to_string().contains("Unknown LLM backend"));
/// ```
impl std::str::FromStr for LLMBackend {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "model-runner" | "modelrunner" | "docker" | "dmr" => Ok(LLMBackend::ModelRunner),
            "ollama" => Ok(LLMBackend::Ollama),
            _ => Err(LLMError::InvalidRequest(format!("Unknown LLM backend: {s}"))),
        }
    }
}

/// Builder for configuring and instantiating providers.
#[derive(Debug, Default)]
pub struct LLMBuilder {
    /// Selected backend
    backend: LLMBackend,
    /// Optional bearer key
    api_key: Option<String>,
    /// Base URL of the OpenAI-compatible endpoints
    base_url: Option<String>,
    /// System prompt prepended to every request
    system: Option<String>,
    /// Request timeout duration in seconds
    timeout_seconds: Option<u64>,
}

impl LLMBuilder {
    /// Creates a new empty builder instance with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefills the builder from a runtime configuration.
    pub fn from_config(config: &RunnerConfig) -> Self {
        let mut builder = Self::new().base_url(&config.base_url);
        if let Some(key) = &config.api_key {
            builder = builder.api_key(key);
        }
        if let Some(timeout) = config.timeout_seconds {
            builder = builder.timeout_seconds(timeout);
        }
        builder
    }

    /// Sets the backend to use.
    pub fn backend(mut self, backend: LLMBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the API key for authentication.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL for API requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the system prompt.
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the request timeout in seconds.
    pub fn timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    /// Builds the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be created.
    pub fn build(self) -> Result<Box<dyn LLMProvider>, LLMError> {
        let provider: Box<dyn LLMProvider> = match self.backend {
            LLMBackend::ModelRunner => Box::new(ModelRunner::new(
                self.api_key,
                self.base_url,
                self.timeout_seconds,
                self.system,
            )?),
            LLMBackend::Ollama => Box::new(Ollama::new(
                self.api_key,
                self.base_url,
                self.timeout_seconds,
                self.system,
            )?),
        };
        Ok(provider)
    }
}

/// Builder for function parameters
pub struct ParamBuilder {
    name: String,
    property_type: String,
    description: String,
    items: Option<Box<ParameterProperty>>,
    enum_list: Option<Vec<String>>,
}

impl ParamBuilder {
    /// Creates a new parameter builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            property_type: "string".to_string(),
            description: String::new(),
            items: None,
            enum_list: None,
        }
    }

    /// Sets the parameter type
    pub fn type_of(mut self, type_str: impl Into<String>) -> Self {
        self.property_type = type_str.into();
        self
    }

    /// Sets the parameter description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Sets the array item type for array parameters
    pub fn items(mut self, item_property: ParameterProperty) -> Self {
        self.items = Some(Box::new(item_property));
        self
    }

    /// Sets the enum values for enum parameters
    pub fn enum_values(mut self, values: Vec<String>) -> Self {
        self.enum_list = Some(values);
        self
    }

    fn build(self) -> (String, ParameterProperty) {
        (
            self.name,
            ParameterProperty {
                property_type: self.property_type,
                description: self.description,
                items: self.items,
                enum_list: self.enum_list,
            },
        )
    }
}

/// Builder for function tools
///
/// ```
/// use llm_runner::builder::{FunctionBuilder, ParamBuilder};
///
/// let tool = FunctionBuilder::new("say_hello")
///     .description("Say hello to the given person name")
///     .param(ParamBuilder::new("name"))
///     .required(vec!["name".to_string()])
///     .build();
/// assert_eq!(tool.name(), "say_hello");
/// assert_eq!(tool.function.parameters["required"][0], "name");
/// ```
pub struct FunctionBuilder {
    name: String,
    description: String,
    parameters: Vec<ParamBuilder>,
    required: Vec<String>,
}

impl FunctionBuilder {
    /// Creates a new function builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            required: Vec::new(),
        }
    }

    /// Sets the function description
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Adds a parameter to the function
    pub fn param(mut self, param: ParamBuilder) -> Self {
        self.parameters.push(param);
        self
    }

    /// Marks parameters as required
    pub fn required(mut self, param_names: Vec<String>) -> Self {
        self.required = param_names;
        self
    }

    /// Builds the function tool
    pub fn build(self) -> Tool {
        let mut properties = HashMap::new();
        for param in self.parameters {
            let (name, prop) = param.build();
            properties.insert(name, prop);
        }
        let schema = ParametersSchema {
            schema_type: "object".to_string(),
            properties,
            required: self.required,
        };
        Tool::function(self.name, self.description, schema.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_builder_produces_json_schema() {
        let tool = FunctionBuilder::new("vulcan_salute")
            .description("Give a vulcan salute to the given person name")
            .param(ParamBuilder::new("name").description("person to salute"))
            .required(vec!["name".to_string()])
            .build();
        assert_eq!(tool.tool_type, "function");
        assert_eq!(
            tool.function.parameters,
            json!({
                "type": "object",
                "properties": {"name": {"type": "string", "description": "person to salute"}},
                "required": ["name"]
            })
        );
    }

    #[test]
    fn nested_and_enum_params_are_kept() {
        let tool = FunctionBuilder::new("fetch")
            .param(ParamBuilder::new("format").enum_values(vec!["text".into(), "html".into()]))
            .param(
                ParamBuilder::new("urls")
                    .type_of("array")
                    .items(ParamBuilder::new("url").build().1),
            )
            .build();
        let properties = &tool.function.parameters["properties"];
        assert_eq!(properties["format"]["enum"], json!(["text", "html"]));
        assert_eq!(properties["urls"]["items"], json!({"type": "string"}));
        assert_eq!(tool.function.parameters["required"], json!([]));
    }

    #[test]
    fn builder_rejects_bad_url() {
        let result = LLMBuilder::new().base_url("not a url").build();
        assert!(matches!(result, Err(LLMError::InvalidRequest(_))));
    }
}
