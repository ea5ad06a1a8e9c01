//! Standard MCP commands
//!
//! The fixed method set served by the dispatcher: `initialize`,
//! `notifications/initialized`, `ping`, `tools/list` and `tools/call`.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::core::dispatcher::invoke_tool;
use crate::core::jsonrpc::{Request, RpcError};
use crate::core::registry::{Command, CommandRegistry, ToolRegistry};

/// MCP protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name and version as reported in `initialize` responses.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Handle MCP initialize method.
///
/// The initialize method is the first method called by MCP clients to establish
/// a connection. It returns the protocol version, server capabilities, and
/// server information. The tool list is fixed after startup, so
/// `listChanged` is always false.
pub struct InitializeCommand {
    info: ServerInfo,
}

impl InitializeCommand {
    pub fn new(info: ServerInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl Command for InitializeCommand {
    fn name(&self) -> &str {
        "initialize"
    }

    async fn execute(&self, _request: &Request) -> Result<Value, RpcError> {
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "serverInfo": self.info
        }))
    }
}

/// `notifications/initialized`: acknowledged with an empty object. Sent as a
/// true notification it never produces a response.
pub struct InitializedNotificationCommand;

#[async_trait]
impl Command for InitializedNotificationCommand {
    fn name(&self) -> &str {
        "notifications/initialized"
    }

    async fn execute(&self, _request: &Request) -> Result<Value, RpcError> {
        tracing::debug!("client reported initialized");
        Ok(json!({}))
    }
}

pub struct PingCommand;

#[async_trait]
impl Command for PingCommand {
    fn name(&self) -> &str {
        "ping"
    }

    async fn execute(&self, _request: &Request) -> Result<Value, RpcError> {
        Ok(json!({}))
    }
}

/// Handle MCP tools/list method with cursor pagination.
pub struct ToolsListCommand {
    tools: Arc<ToolRegistry>,
    page_size: usize,
}

impl ToolsListCommand {
    pub fn new(tools: Arc<ToolRegistry>, page_size: usize) -> Self {
        Self { tools, page_size }
    }
}

#[async_trait]
impl Command for ToolsListCommand {
    fn name(&self) -> &str {
        "tools/list"
    }

    async fn execute(&self, request: &Request) -> Result<Value, RpcError> {
        let cursor = match request.params_object().and_then(|p| p.get("cursor")) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                return Err(RpcError::invalid_params(format!(
                    "cursor must be a string, got {other}"
                )));
            }
        };
        let page = self.tools.page(cursor, self.page_size)?;
        serde_json::to_value(page).map_err(|e| RpcError::internal(e.to_string()))
    }
}

/// Handle MCP tools/call method.
///
/// Extracts the tool name and arguments, resolves the tool, and runs it under
/// the call timeout. An unknown tool is InvalidParams: the `tools/call`
/// method itself exists.
pub struct ToolsCallCommand {
    tools: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolsCallCommand {
    pub fn new(tools: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self { tools, timeout }
    }
}

#[async_trait]
impl Command for ToolsCallCommand {
    fn name(&self) -> &str {
        "tools/call"
    }

    async fn execute(&self, request: &Request) -> Result<Value, RpcError> {
        let params = request
            .params_object()
            .ok_or_else(|| RpcError::invalid_params("Missing params object"))?;

        let tool_name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("Missing tool name"))?;

        // Arguments default to an empty object when absent or null
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args @ Value::Object(_)) => args.clone(),
            Some(_) => return Err(RpcError::invalid_params("arguments must be an object")),
        };

        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| RpcError::invalid_params(format!("Tool not found: {tool_name}")))?;

        tracing::debug!(tool = %tool_name, "invoking tool");
        let result = invoke_tool(tool, arguments, self.timeout).await?;
        serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
    }
}

/// Build the command registry with every standard MCP method.
pub fn standard_commands(
    info: ServerInfo,
    tools: Arc<ToolRegistry>,
    page_size: usize,
    call_timeout: Duration,
) -> CommandRegistry {
    let mut commands = CommandRegistry::new();
    commands.register(Arc::new(InitializeCommand::new(info)));
    commands.register(Arc::new(InitializedNotificationCommand));
    commands.register(Arc::new(PingCommand));
    commands.register(Arc::new(ToolsListCommand::new(Arc::clone(&tools), page_size)));
    commands.register(Arc::new(ToolsCallCommand::new(tools, call_timeout)));
    commands
}
