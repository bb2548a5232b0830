use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;

use super::{ToolArguments, ToolExecutor};
use crate::chat::Tool;
use crate::error::LLMError;

type Handler =
    Arc<dyn Fn(ToolArguments) -> BoxFuture<'static, Result<String, LLMError>> + Send + Sync>;

/// Tools implemented by local Rust functions.
///
/// ```
/// use llm_runner::builder::{FunctionBuilder, ParamBuilder};
/// use llm_runner::tools::FunctionRegistry;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Person {
///     name: String,
/// }
///
/// let registry = FunctionRegistry::new().register_typed(
///     FunctionBuilder::new("say_hello")
///         .description("Say hello to the given person name")
///         .param(ParamBuilder::new("name"))
///         .required(vec!["name".to_string()])
///         .build(),
///     |person: Person| Ok(format!("Hello {}", person.name)),
/// );
/// assert!(registry.contains("say_hello"));
/// ```
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    tools: Vec<Tool>,
    handlers: HashMap<String, Handler>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a synchronous handler receiving the raw arguments.
    pub fn register<F>(self, tool: Tool, handler: F) -> Self
    where
        F: Fn(ToolArguments) -> Result<String, LLMError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.insert(
            tool,
            Arc::new(move |args| {
                let result = handler(args);
                async move { result }.boxed()
            }),
        )
    }

    /// Registers an asynchronous handler receiving the raw arguments.
    pub fn register_async<F, Fut>(self, tool: Tool, handler: F) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, LLMError>> + Send + 'static,
    {
        self.insert(tool, Arc::new(move |args| handler(args).boxed()))
    }

    /// Registers a handler taking typed arguments. Arguments that do not
    /// deserialize into `A` fail with `ArgumentParseError`.
    pub fn register_typed<A, F>(self, tool: Tool, handler: F) -> Self
    where
        A: DeserializeOwned + 'static,
        F: Fn(A) -> Result<String, LLMError> + Send + Sync + 'static,
    {
        let name = tool.name().to_string();
        self.register(tool, move |args| {
            let typed = args.parse::<A>().map_err(|e| LLMError::ArgumentParseError {
                tool: name.clone(),
                message: e.to_string(),
            })?;
            handler(typed)
        })
    }

    fn insert(mut self, tool: Tool, handler: Handler) -> Self {
        let name = tool.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            log::warn!("tool '{name}' registered twice, keeping the last handler");
            self.tools.retain(|t| t.name() != name);
        }
        self.tools.push(tool);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Declared schemas, in registration order.
    pub fn declared(&self) -> &[Tool] {
        &self.tools
    }
}

#[async_trait]
impl ToolExecutor for FunctionRegistry {
    async fn tools(&self) -> Result<Vec<Tool>, LLMError> {
        Ok(self.tools.clone())
    }

    async fn invoke(&self, name: &str, arguments: ToolArguments) -> Result<String, LLMError> {
        let handler = self
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| LLMError::ToolInvocationError {
                tool: name.to_string(),
                message: "unknown tool".to_string(),
            })?;
        handler(arguments).await.map_err(|e| match e {
            LLMError::ArgumentParseError { .. } | LLMError::ToolInvocationError { .. } => e,
            other => LLMError::ToolInvocationError {
                tool: name.to_string(),
                message: other.to_string(),
            },
        })
    }
}
