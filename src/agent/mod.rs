//! Tool-calling agent: cancellation, the bounded tool loop, MCP tools and the
//! agent tying them to a provider.

pub mod builder;
pub mod cancel;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod tool_loop;

pub use builder::{Agent, AgentBuilder};
pub use cancel::CancellationToken;
#[cfg(feature = "mcp")]
pub use mcp::McpToolkit;
pub use tool_loop::{
    LoopConfig, LoopState, StopReason, ToolCallLoop, ToolExecution, ToolFailure, ToolLoopOutcome,
};
