//! Tools served by an MCP (Model Context Protocol) server.
//!
//! [`McpToolkit`] connects over the streamable HTTP transport or over the
//! stdio of a spawned command (e.g. `socat` bridging to the Docker MCP
//! gateway), lists the server tools once and exposes them through
//! [`ToolExecutor`], so the tool loop runs them like local functions.

use async_trait::async_trait;
use rmcp::{
    model::{
        CallToolRequestParam, ClientCapabilities, ClientInfo, Content, Implementation, RawContent,
    },
    service::RunningService,
    transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess},
    RoleClient, ServiceExt as _,
};
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::chat::Tool;
use crate::error::LLMError;
use crate::tools::{convert_mcp_tool, ToolArguments, ToolExecutor};

/// Client of one MCP server.
pub struct McpToolkit {
    endpoint: String,
    client: RunningService<RoleClient, ClientInfo>,
    filter: Option<Vec<String>>,
    cached_tools: RwLock<Option<Vec<Tool>>>,
}

fn client_info(name: impl Into<String>, version: impl Into<String>) -> ClientInfo {
    ClientInfo {
        protocol_version: Default::default(),
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: name.into(),
            version: version.into(),
        },
    }
}

impl McpToolkit {
    /// Connects to the MCP server at `url`, e.g. `http://localhost:9011/mcp`.
    pub async fn connect(url: impl Into<String>) -> Result<Self, LLMError> {
        Self::connect_as(url, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")).await
    }

    /// Connects over HTTP with an explicit client identification.
    pub async fn connect_as(
        url: impl Into<String>,
        client_name: impl Into<String>,
        client_version: impl Into<String>,
    ) -> Result<Self, LLMError> {
        let url = url.into();
        let transport = StreamableHttpClientTransport::from_uri(url.clone());
        let client = client_info(client_name, client_version)
            .serve(transport)
            .await
            .map_err(|e| {
                LLMError::HttpError(format!("MCP client initialization failed for {url}: {e}"))
            })?;
        log::debug!("connected to MCP server {url}");
        Ok(Self::new(url, client))
    }

    /// Spawns `program` and talks MCP over its stdin/stdout.
    ///
    /// ```no_run
    /// # async fn demo() -> Result<(), llm_runner::error::LLMError> {
    /// use llm_runner::agent::McpToolkit;
    ///
    /// let toolkit = McpToolkit::connect_command(
    ///     "socat",
    ///     ["STDIO", "TCP:host.docker.internal:8811"],
    /// )
    /// .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect_command<I, S>(program: &str, args: I) -> Result<Self, LLMError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let endpoint = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        let transport = TokioChildProcess::new(Command::new(program).configure(|cmd| {
            cmd.args(&args);
        }))
        .map_err(|e| LLMError::Generic(format!("Failed to spawn `{endpoint}`: {e}")))?;
        let client = client_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            .serve(transport)
            .await
            .map_err(|e| {
                LLMError::Generic(format!("MCP client initialization failed for `{endpoint}`: {e}"))
            })?;
        log::debug!("connected to MCP command `{endpoint}`");
        Ok(Self::new(endpoint, client))
    }

    fn new(endpoint: String, client: RunningService<RoleClient, ClientInfo>) -> Self {
        Self {
            endpoint,
            client,
            filter: None,
            cached_tools: RwLock::new(None),
        }
    }

    /// Keeps only the named tools, e.g. `["brave_web_search", "fetch"]`.
    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// URL or command line of the server.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Forgets the cached tool list.
    pub async fn refresh_tools(&self) {
        *self.cached_tools.write().await = None;
    }

    /// Closes the connection.
    pub async fn close(self) -> Result<(), LLMError> {
        self.client
            .cancel()
            .await
            .map(|_| ())
            .map_err(|e| LLMError::Generic(format!("MCP client shutdown failed: {e}")))
    }

    fn is_selected(&self, name: &str) -> bool {
        is_selected(self.filter.as_deref(), name)
    }
}

fn is_selected(filter: Option<&[String]>, name: &str) -> bool {
    filter.map_or(true, |names| names.iter().any(|n| n == name))
}

/// Joins the text blocks of a tool result; other content types are dropped.
fn text_content(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|annotated| match &annotated.raw {
            RawContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ToolExecutor for McpToolkit {
    async fn tools(&self) -> Result<Vec<Tool>, LLMError> {
        if let Some(tools) = self.cached_tools.read().await.as_ref() {
            return Ok(tools.clone());
        }
        let listed = self
            .client
            .list_tools(Default::default())
            .await
            .map_err(|e| LLMError::HttpError(format!("Failed to list MCP tools: {e}")))?;
        let tools: Vec<Tool> = listed
            .tools
            .iter()
            .filter(|tool| self.is_selected(&tool.name))
            .map(|tool| {
                convert_mcp_tool(&tool.name, tool.description.as_deref(), &tool.input_schema)
            })
            .collect();
        log::debug!("{} MCP tool(s) selected on {}", tools.len(), self.endpoint);
        *self.cached_tools.write().await = Some(tools.clone());
        Ok(tools)
    }

    async fn invoke(&self, name: &str, arguments: ToolArguments) -> Result<String, LLMError> {
        let failure = |message: String| LLMError::ToolInvocationError {
            tool: name.to_string(),
            message,
        };
        if !self.is_selected(name) {
            return Err(failure("tool is filtered out".to_string()));
        }
        let result = self
            .client
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: Some(arguments.into_map()),
            })
            .await
            .map_err(|e| failure(e.to_string()))?;
        let text = text_content(&result.content);
        if result.is_error.unwrap_or(false) {
            return Err(failure(text));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_selects_named_tools() {
        let names = vec!["brave_web_search".to_string(), "fetch".to_string()];
        assert!(is_selected(Some(&names), "fetch"));
        assert!(!is_selected(Some(&names), "brave_local_search"));
        assert!(is_selected(None, "brave_local_search"));
    }

    #[test]
    fn text_blocks_are_joined() {
        let content = vec![Content::text("first result"), Content::text("second result")];
        assert_eq!(text_content(&content), "first result\nsecond result");
        assert_eq!(text_content(&[]), "");
    }

    #[tokio::test]
    async fn missing_command_fails_to_connect() {
        let err = McpToolkit::connect_command("llm-runner-no-such-mcp-server", ["--stdio"])
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("llm-runner-no-such-mcp-server --stdio"));
    }
}
