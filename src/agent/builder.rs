//! Agent: a tool loop followed by a streamed answer.

use super::cancel::CancellationToken;
use super::tool_loop::{LoopConfig, ToolCallLoop, ToolLoopOutcome};
use crate::{
    builder::LLMBuilder,
    chat::{collect_stream, ChatMessage, ChatProvider, ChatStream, Tool},
    config::RunnerConfig,
    error::LLMError,
    tools::{FunctionRegistry, ToolExecutor},
    LLMProvider,
};

/// Builder for [`Agent`].
///
/// Without an explicit provider the agent talks to the runner configured by
/// [`RunnerConfig`]; without an executor it has no tools and simply answers.
pub struct AgentBuilder {
    config: RunnerConfig,
    llm_builder: Option<LLMBuilder>,
    provider: Option<Box<dyn LLMProvider>>,
    executor: Option<Box<dyn ToolExecutor>>,
    instructions: Option<String>,
}

impl AgentBuilder {
    /// Creates a new AgentBuilder instance.
    pub fn new() -> Self {
        Self {
            config: RunnerConfig::default(),
            llm_builder: None,
            provider: None,
            executor: None,
            instructions: None,
        }
    }

    /// Sets models, temperatures and pass budget.
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP provider configuration.
    pub fn llm(mut self, llm_builder: LLMBuilder) -> Self {
        self.llm_builder = Some(llm_builder);
        self
    }

    /// Uses an already built provider.
    pub fn provider(mut self, provider: Box<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets where tool calls are executed.
    pub fn tools(mut self, executor: impl ToolExecutor + 'static) -> Self {
        self.executor = Some(Box::new(executor));
        self
    }

    /// System message put in front of every conversation.
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Builds the agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the provider
    /// cannot be built.
    pub fn build(self) -> Result<Agent, LLMError> {
        self.config.validate()?;
        let provider = match self.provider {
            Some(provider) => provider,
            None => self
                .llm_builder
                .unwrap_or_else(|| LLMBuilder::from_config(&self.config))
                .build()?,
        };
        Ok(Agent {
            provider,
            executor: self
                .executor
                .unwrap_or_else(|| Box::new(FunctionRegistry::new())),
            config: self.config,
            instructions: self.instructions,
        })
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Answers questions, calling tools first when the model asks for them.
pub struct Agent {
    provider: Box<dyn LLMProvider>,
    executor: Box<dyn ToolExecutor>,
    config: RunnerConfig,
    instructions: Option<String>,
}

impl Agent {
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn provider(&self) -> &dyn LLMProvider {
        &*self.provider
    }

    /// Tools available to the model.
    pub async fn tools(&self) -> Result<Vec<Tool>, LLMError> {
        self.executor.tools().await
    }

    /// `messages` with the instructions in front, if any.
    pub fn conversation(&self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        match &self.instructions {
            Some(instructions) => {
                let system = ChatMessage::system().content(instructions).build();
                std::iter::once(system).chain(messages).collect()
            }
            None => messages,
        }
    }

    /// Runs the tool loop over `messages`.
    pub async fn run_tools(
        &self,
        messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<ToolLoopOutcome, LLMError> {
        let tools = cancel.run(self.executor.tools()).await??;
        let mut tool_loop = ToolCallLoop::new(
            &*self.provider,
            &*self.executor,
            LoopConfig::from(&self.config),
        );
        tool_loop.run(messages, &tools, cancel).await
    }

    /// Streams the final answer to `messages`, without tools, at the chat
    /// temperature. Dropping the stream stops the generation.
    pub async fn answer_stream(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<ChatStream, LLMError> {
        let params = self.config.chat_params();
        let stream = cancel
            .run(self.provider.chat_stream(messages, &params))
            .await??;
        Ok(cancel.guard(stream))
    }

    /// Final answer to `messages` as a single string.
    pub async fn answer(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<String, LLMError> {
        collect_stream(self.answer_stream(messages, cancel).await?).await
    }

    /// Asks `question`: runs the tools, then streams the answer built on
    /// their results.
    pub async fn ask(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<(ToolLoopOutcome, ChatStream), LLMError> {
        let messages = self.conversation(vec![ChatMessage::user().content(question).build()]);
        let outcome = self.run_tools(messages, cancel).await?;
        let stream = self.answer_stream(&outcome.messages, cancel).await?;
        Ok((outcome, stream))
    }
}
