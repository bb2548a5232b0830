//! Bounded tool-calling loop.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! Idle -> Requesting -> Done                          (no tool calls)
//!         Requesting -> Executing -> Appending -> Requesting
//!         Requesting -> PassLimitReached -> Done      (max_passes spent)
//!         any state  -> Cancelled
//! ```
//!
//! Detection requests run with the tools parameters (temperature 0). A failed
//! completion aborts the run; a failed tool call is logged and skipped.

use std::collections::HashSet;

use futures::future::join_all;

use super::cancel::CancellationToken;
use crate::chat::{ChatMessage, ChatParams, ChatProvider, Tool};
use crate::config::RunnerConfig;
use crate::error::LLMError;
use crate::tools::{ToolArguments, ToolExecutor};
use crate::ToolCall;

/// States of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Requesting,
    Executing,
    Appending,
    PassLimitReached,
    Done,
    Cancelled,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model asked for no more tool calls, or no tools were declared
    NoToolCalls,
    /// `max_passes` detection passes were spent
    PassLimitReached,
}

/// Settings of one loop run.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Parameters of detection requests
    pub params: ChatParams,
    /// Maximum number of request/execute cycles
    pub max_passes: usize,
    /// Run the calls of one pass concurrently
    pub concurrent: bool,
}

impl LoopConfig {
    pub fn new(params: ChatParams, max_passes: usize) -> Self {
        Self {
            params,
            max_passes,
            concurrent: false,
        }
    }

    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }
}

impl From<&RunnerConfig> for LoopConfig {
    fn from(config: &RunnerConfig) -> Self {
        Self::new(config.tools_params(), config.max_passes)
            .concurrent(config.concurrent_tool_calls)
    }
}

/// A tool call that ran, with its output.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    pub call: ToolCall,
    pub output: String,
}

/// A tool call that was skipped.
#[derive(Debug)]
pub struct ToolFailure {
    pub call: ToolCall,
    pub error: LLMError,
}

/// Result of a loop run.
#[derive(Debug)]
pub struct ToolLoopOutcome {
    /// Input conversation plus every tool-use and tool-result message
    pub messages: Vec<ChatMessage>,
    /// Successful calls, in request order
    pub executions: Vec<ToolExecution>,
    /// Skipped calls, in request order
    pub failures: Vec<ToolFailure>,
    /// Number of detection requests sent
    pub passes: usize,
    pub stop: StopReason,
}

/// Drives detection, execution and appending until the model stops calling
/// tools or the pass budget is spent.
pub struct ToolCallLoop<'a, C, E>
where
    C: ChatProvider + ?Sized,
    E: ToolExecutor + ?Sized,
{
    provider: &'a C,
    executor: &'a E,
    config: LoopConfig,
    history: Vec<LoopState>,
}

impl<'a, C, E> ToolCallLoop<'a, C, E>
where
    C: ChatProvider + ?Sized,
    E: ToolExecutor + ?Sized,
{
    pub fn new(provider: &'a C, executor: &'a E, config: LoopConfig) -> Self {
        Self {
            provider,
            executor,
            config,
            history: vec![LoopState::Idle],
        }
    }

    /// Current state.
    pub fn state(&self) -> LoopState {
        self.history.last().copied().unwrap_or(LoopState::Idle)
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[LoopState] {
        &self.history
    }

    fn enter(&mut self, state: LoopState) {
        log::trace!("tool loop: {:?} -> {:?}", self.state(), state);
        self.history.push(state);
    }

    /// Runs the loop over `messages` with the declared `tools`.
    pub async fn run(
        &mut self,
        messages: Vec<ChatMessage>,
        tools: &[Tool],
        cancel: &CancellationToken,
    ) -> Result<ToolLoopOutcome, LLMError> {
        let result = self.drive(messages, tools, cancel).await;
        if matches!(result, Err(LLMError::Cancelled)) {
            self.enter(LoopState::Cancelled);
        }
        result
    }

    async fn drive(
        &mut self,
        mut messages: Vec<ChatMessage>,
        tools: &[Tool],
        cancel: &CancellationToken,
    ) -> Result<ToolLoopOutcome, LLMError> {
        if cancel.is_cancelled() {
            return Err(LLMError::Cancelled);
        }
        let mut outcome = ToolLoopOutcome {
            messages: Vec::new(),
            executions: Vec::new(),
            failures: Vec::new(),
            passes: 0,
            stop: StopReason::NoToolCalls,
        };
        if tools.is_empty() {
            log::debug!("no tools declared, skipping detection");
            self.enter(LoopState::Done);
            outcome.messages = messages;
            return Ok(outcome);
        }
        let declared: HashSet<&str> = tools.iter().map(Tool::name).collect();

        loop {
            if outcome.passes >= self.config.max_passes {
                log::debug!("pass limit of {} reached", self.config.max_passes);
                self.enter(LoopState::PassLimitReached);
                outcome.stop = StopReason::PassLimitReached;
                break;
            }

            self.enter(LoopState::Requesting);
            outcome.passes += 1;
            let response = cancel
                .run(
                    self.provider
                        .chat_with_tools(&messages, Some(tools), &self.config.params),
                )
                .await??;
            let pending = response.tool_calls().unwrap_or_default();
            if pending.is_empty() {
                break;
            }
            log::debug!("pass {}: {} tool call(s)", outcome.passes, pending.len());

            self.enter(LoopState::Executing);
            let results = self.execute(&pending, &declared, cancel).await?;

            self.enter(LoopState::Appending);
            let mut answered = Vec::new();
            for (call, result) in pending.into_iter().zip(results) {
                match result {
                    Ok(output) => answered.push(ToolExecution { call, output }),
                    Err(error) => {
                        log::warn!("skipping tool call {}: {error}", call.id);
                        outcome.failures.push(ToolFailure { call, error });
                    }
                }
            }
            // Every advertised call id must be answered by a tool message
            if !answered.is_empty() {
                messages.push(
                    ChatMessage::assistant()
                        .tool_use(answered.iter().map(|e| e.call.clone()).collect())
                        .content(response.text().unwrap_or_default())
                        .build(),
                );
                for execution in &answered {
                    messages.push(ChatMessage::tool_output(
                        &execution.call,
                        execution.output.as_str(),
                    ));
                }
                outcome.executions.extend(answered);
            }
        }

        self.enter(LoopState::Done);
        outcome.messages = messages;
        Ok(outcome)
    }

    /// Runs a batch. Results follow the order of `pending`; the outer error is
    /// only ever `Cancelled`.
    async fn execute(
        &self,
        pending: &[ToolCall],
        declared: &HashSet<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<String, LLMError>>, LLMError> {
        if self.config.concurrent {
            join_all(
                pending
                    .iter()
                    .map(|call| self.execute_one(call, declared, cancel)),
            )
            .await
            .into_iter()
            .collect()
        } else {
            let mut results = Vec::with_capacity(pending.len());
            for call in pending {
                results.push(self.execute_one(call, declared, cancel).await?);
            }
            Ok(results)
        }
    }

    async fn execute_one(
        &self,
        call: &ToolCall,
        declared: &HashSet<&str>,
        cancel: &CancellationToken,
    ) -> Result<Result<String, LLMError>, LLMError> {
        let name = call.function.name.as_str();
        if !declared.contains(name) {
            return Ok(Err(LLMError::ToolInvocationError {
                tool: name.to_string(),
                message: "tool is not declared".to_string(),
            }));
        }
        let arguments = match ToolArguments::from_json(name, &call.function.arguments) {
            Ok(arguments) => arguments,
            Err(e) => return Ok(Err(e)),
        };
        log::debug!("calling {call}");
        let result = cancel.run(self.executor.invoke(name, arguments)).await?;
        Ok(result.map_err(|e| {
            if e.is_tool_scoped() {
                e
            } else {
                LLMError::ToolInvocationError {
                    tool: name.to_string(),
                    message: e.to_string(),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatResponse, MessageType};
    use crate::tools::FunctionRegistry;
    use crate::FunctionCall;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Calls(Vec<ToolCall>);

    impl std::fmt::Display for Calls {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{} call(s)", self.0.len())
        }
    }

    impl ChatResponse for Calls {
        fn text(&self) -> Option<String> {
            None
        }

        fn tool_calls(&self) -> Option<Vec<ToolCall>> {
            (!self.0.is_empty()).then(|| self.0.clone())
        }
    }

    /// Replays scripted batches, then answers without calls.
    struct Scripted {
        batches: Mutex<VecDeque<Vec<ToolCall>>>,
        requests: Mutex<usize>,
    }

    impl Scripted {
        fn new(batches: Vec<Vec<ToolCall>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                requests: Mutex::new(0),
            }
        }

        fn requests(&self) -> usize {
            *self.requests.lock().unwrap()
        }
    }

    #[async_trait]
    impl ChatProvider for Scripted {
        async fn chat_with_tools(
            &self,
            _messages: &[ChatMessage],
            _tools: Option<&[Tool]>,
            params: &ChatParams,
        ) -> Result<Box<dyn ChatResponse>, LLMError> {
            assert_eq!(params.temperature, Some(0.0));
            *self.requests.lock().unwrap() += 1;
            let batch = self.batches.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::new(Calls(batch)))
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    fn hello_tool() -> Tool {
        Tool::function(
            "say_hello",
            "Say hello to the given person name",
            json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}),
        )
    }

    fn registry() -> FunctionRegistry {
        FunctionRegistry::new().register(hello_tool(), |args| {
            Ok(format!("Hello {}", args.get_str("name").unwrap_or_default()))
        })
    }

    fn config(max_passes: usize) -> LoopConfig {
        LoopConfig::new(RunnerConfig::default().tools_params(), max_passes)
    }

    fn question() -> Vec<ChatMessage> {
        vec![ChatMessage::user().content("Say hello to Jean-Luc Picard").build()]
    }

    #[tokio::test]
    async fn stops_when_no_calls_are_returned() {
        let llm = Scripted::new(vec![vec![call("c1", "say_hello", r#"{"name":"Jean-Luc Picard"}"#)]]);
        let tools = registry();
        let mut tool_loop = ToolCallLoop::new(&llm, &tools, config(5));
        let outcome = tool_loop
            .run(question(), &[hello_tool()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::NoToolCalls);
        assert_eq!(outcome.passes, 2);
        assert_eq!(llm.requests(), 2);
        assert_eq!(outcome.executions[0].output, "Hello Jean-Luc Picard");
        assert_eq!(outcome.messages.len(), 3);
        assert!(matches!(outcome.messages[1].message_type, MessageType::ToolUse(_)));
        assert_eq!(outcome.messages[2].answered_call_ids(), vec!["c1"]);
        assert_eq!(
            tool_loop.history(),
            &[
                LoopState::Idle,
                LoopState::Requesting,
                LoopState::Executing,
                LoopState::Appending,
                LoopState::Requesting,
                LoopState::Done
            ]
        );
    }

    #[tokio::test]
    async fn zero_tools_never_executes() {
        let llm = Scripted::new(vec![vec![call("c1", "say_hello", "{}")]]);
        let tools = FunctionRegistry::new();
        let mut tool_loop = ToolCallLoop::new(&llm, &tools, config(2));
        let outcome = tool_loop
            .run(question(), &[], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::NoToolCalls);
        assert_eq!(outcome.passes, 0);
        assert_eq!(llm.requests(), 0);
        assert!(!tool_loop.history().contains(&LoopState::Executing));
        assert_eq!(tool_loop.state(), LoopState::Done);
        assert_eq!(outcome.messages, question());
    }

    #[tokio::test]
    async fn cancelled_before_start_does_not_call_the_provider() {
        let llm = Scripted::new(vec![]);
        let tools = registry();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut tool_loop = ToolCallLoop::new(&llm, &tools, config(2));
        let err = tool_loop.run(question(), &[hello_tool()], &cancel).await.unwrap_err();
        assert!(matches!(err, LLMError::Cancelled));
        assert_eq!(llm.requests(), 0);
        assert_eq!(tool_loop.state(), LoopState::Cancelled);
    }

    #[tokio::test]
    async fn failed_call_is_skipped_and_siblings_run() {
        let llm = Scripted::new(vec![vec![
            call("c1", "say_hello", r#"{"name": "Kirk""#),
            call("c2", "say_hello", r#"{"name":"Spock"}"#),
        ]]);
        let tools = registry();
        let mut tool_loop = ToolCallLoop::new(&llm, &tools, config(2).concurrent(true));
        let outcome = tool_loop
            .run(question(), &[hello_tool()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].call.id, "c1");
        assert!(matches!(outcome.failures[0].error, LLMError::ArgumentParseError { .. }));
        assert_eq!(outcome.executions.len(), 1);
        assert_eq!(outcome.executions[0].output, "Hello Spock");
        let answered: Vec<&str> = outcome
            .messages
            .iter()
            .flat_map(|m| m.answered_call_ids())
            .collect();
        assert_eq!(answered, vec!["c2"]);
    }

    #[tokio::test]
    async fn only_answered_calls_are_advertised() {
        let llm = Scripted::new(vec![vec![
            call("c1", "say_hello", r#"{"name": "Kirk""#),
            call("c2", "unregistered_tool", "{}"),
            call("c3", "say_hello", r#"{"name":"Spock"}"#),
        ]]);
        let tools = registry();
        let mut tool_loop = ToolCallLoop::new(&llm, &tools, config(2));
        let outcome = tool_loop
            .run(question(), &[hello_tool()], &CancellationToken::new())
            .await
            .unwrap();

        let advertised: Vec<&str> = outcome
            .messages
            .iter()
            .filter_map(|m| match &m.message_type {
                MessageType::ToolUse(calls) => Some(calls),
                _ => None,
            })
            .flatten()
            .map(|c| c.id.as_str())
            .collect();
        let answered: Vec<&str> = outcome
            .messages
            .iter()
            .flat_map(|m| m.answered_call_ids())
            .collect();
        assert_eq!(advertised, vec!["c3"]);
        assert_eq!(advertised, answered);
        assert_eq!(outcome.failures.len(), 2);
    }

    #[tokio::test]
    async fn pass_without_results_appends_nothing() {
        let llm = Scripted::new(vec![vec![call("c1", "say_hello", "not json")]]);
        let tools = registry();
        let mut tool_loop = ToolCallLoop::new(&llm, &tools, config(3));
        let outcome = tool_loop
            .run(question(), &[hello_tool()], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.passes, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.messages, question());
    }
}
