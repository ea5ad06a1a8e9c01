//! Command and Tool Registries
//!
//! Two name-keyed maps:
//! - commands: the fixed protocol methods (`initialize`, `tools/list`, ...)
//! - tools: host capabilities invoked through `tools/call`
//!
//! Both are last-registration-wins. Tools are listed sorted by name so cursor
//! pagination is stable across pages.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::jsonrpc::{Request, RpcError};

/// MCP tool definition structure.
///
/// Each tool must have a unique name, description, and JSON schema defining
/// its input parameters. This structure is serialized when listing tools.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    /// Unique tool identifier (e.g., "echo", "host.ping")
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema defining the tool's input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// One item of a tool result's `content` array.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

/// Result of a successful `tools/call`, shaped per the MCP protocol.
///
/// `is_error` lets a tool report a domain-level failure while the JSON-RPC
/// call itself succeeds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CallToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl CallToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Serializes an arbitrary JSON value as the text of a single content item.
    pub fn json(value: &Value) -> Self {
        Self::text(value.to_string())
    }
}

/// Failure reported by a tool. Surfaces to the client as an InternalError.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Owner(#[from] crate::core::owner::OwnerError),
}

/// A named, schema-described host capability.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema `{type:"object", properties, required}` for the arguments.
    fn input_schema(&self) -> Value;

    /// Run the tool. The dispatcher applies the call timeout; a tool that
    /// outlives it keeps running but its result is discarded.
    ///
    /// Implementations run on the HTTP worker's runtime and must not block
    /// it: blocking work belongs in `tokio::task::spawn_blocking` or behind
    /// an [`OwnerHandle`](crate::core::owner::OwnerHandle).
    async fn execute(&self, arguments: Value) -> Result<CallToolResult, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Tool handler function type definition.
///
/// Synchronous handlers are boxed closures that take JSON arguments and
/// return a tool result. They run on the blocking thread pool, so a handler
/// may block without stalling the HTTP worker or the call timeout.
pub type ToolHandler = Box<dyn Fn(Value) -> Result<CallToolResult, ToolError> + Send + Sync>;

/// Adapts a [`ToolDescriptor`] plus a synchronous [`ToolHandler`] into a [`Tool`].
pub struct FnTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn Fn(Value) -> Result<CallToolResult, ToolError> + Send + Sync>,
}

impl FnTool {
    pub fn new(descriptor: ToolDescriptor, handler: ToolHandler) -> Self {
        Self {
            descriptor,
            handler: Arc::from(handler),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn input_schema(&self) -> Value {
        self.descriptor.input_schema.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<CallToolResult, ToolError> {
        let handler = Arc::clone(&self.handler);
        match tokio::task::spawn_blocking(move || handler(arguments)).await {
            Ok(outcome) => outcome,
            // Re-raised so the dispatcher reports it like any other tool panic
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(ToolError::Failed(format!(
                "tool {} was cancelled",
                self.descriptor.name
            ))),
        }
    }

    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }
}

/// One page of `tools/list`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolPage {
    pub tools: Vec<ToolDescriptor>,
    #[serde(rename = "nextCursor", skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Registry of available MCP tools.
///
/// Interior locking lets tools be registered or cleared while the server is
/// running. Pagination is best-effort under such changes: a registration
/// between two page requests can shift an item across the page boundary, so
/// a client may see it twice or miss it until the next full listing.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool of the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.write().insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "tool re-registered, previous handler replaced");
        }
    }

    /// Register a descriptor with a synchronous handler.
    pub fn register_fn(&self, descriptor: ToolDescriptor, handler: ToolHandler) {
        self.register(Arc::new(FnTool::new(descriptor, handler)));
    }

    /// Look up a tool by name. Empty names never match.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        if name.is_empty() {
            return None;
        }
        self.tools.read().get(name).cloned()
    }

    pub fn clear(&self) {
        self.tools.write().clear();
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// All descriptors, sorted by name.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.read().values().map(|t| t.descriptor()).collect()
    }

    /// Returns the page starting at `cursor` (a stringified offset, default 0).
    ///
    /// A cursor past the end yields an empty final page.
    pub fn page(&self, cursor: Option<&str>, page_size: usize) -> Result<ToolPage, RpcError> {
        let offset = match cursor {
            None => 0,
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| RpcError::invalid_params(format!("Invalid cursor: {raw}")))?,
        };
        let page_size = page_size.max(1);

        let tools = self.tools.read();
        let total = tools.len();
        let page: Vec<ToolDescriptor> = tools
            .values()
            .skip(offset)
            .take(page_size)
            .map(|t| t.descriptor())
            .collect();
        let end = offset.saturating_add(page.len());
        let next_cursor = (end < total).then(|| end.to_string());

        Ok(ToolPage {
            tools: page,
            next_cursor,
        })
    }
}

/// A fixed protocol method.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the `result` payload for `request`, or a JSON-RPC error.
    async fn execute(&self, request: &Request) -> Result<Value, RpcError>;
}

/// Name → command map consulted by the dispatcher.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name().to_string(), command);
    }

    pub fn get(&self, method: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(method).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn fn_tool(name: &str, reply: &'static str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor {
                name: name.to_string(),
                description: format!("{name} tool"),
                input_schema: json!({"type": "object", "properties": {}}),
            },
            Box::new(move |_| Ok(CallToolResult::text(reply))),
        ))
    }

    fn registry_with(count: usize) -> ToolRegistry {
        let registry = ToolRegistry::new();
        for i in 0..count {
            registry.register(fn_tool(&format!("tool_{i:03}"), "ok"));
        }
        registry
    }

    #[tokio::test]
    async fn duplicate_name_overwrites() {
        let registry = ToolRegistry::new();
        registry.register(fn_tool("dup", "first"));
        registry.register(fn_tool("dup", "second"));
        assert_eq!(registry.len(), 1);

        let result = registry.get("dup").unwrap().execute(json!({})).await.unwrap();
        assert_eq!(result, CallToolResult::text("second"));
    }

    #[test]
    fn empty_name_never_resolves() {
        let registry = registry_with(1);
        assert!(registry.get("").is_none());
    }

    #[test]
    fn pages_are_exhaustive_and_bounded() {
        let registry = registry_with(45);
        let mut seen = HashSet::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = registry.page(cursor.as_deref(), 20).unwrap();
            assert!(page.tools.len() <= 20);
            for tool in &page.tools {
                assert!(seen.insert(tool.name.clone()), "duplicate {}", tool.name);
            }
            pages += 1;
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 45);
    }

    #[test]
    fn next_cursor_is_offset_of_first_unserved_item() {
        let registry = registry_with(25);
        let first = registry.page(None, 20).unwrap();
        assert_eq!(first.next_cursor.as_deref(), Some("20"));
        let second = registry.page(Some("20"), 20).unwrap();
        assert_eq!(second.tools.len(), 5);
        assert!(second.next_cursor.is_none());
        assert_ne!(first.tools[0].name, second.tools[0].name);
    }

    #[test]
    fn exact_fit_has_no_next_cursor() {
        let registry = registry_with(20);
        assert!(registry.page(None, 20).unwrap().next_cursor.is_none());
    }

    #[test]
    fn cursor_past_end_is_empty_final_page() {
        let registry = registry_with(3);
        let page = registry.page(Some("10"), 20).unwrap();
        assert!(page.tools.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn malformed_cursor_is_invalid_params() {
        let registry = registry_with(3);
        let err = registry.page(Some("abc"), 20).unwrap_err();
        assert_eq!(err.code, crate::core::jsonrpc::INVALID_PARAMS);
        assert!(registry.page(Some("-1"), 20).is_err());
    }

    #[test]
    fn descriptor_serializes_input_schema_in_camel_case() {
        let value = serde_json::to_value(fn_tool("x", "y").descriptor()).unwrap();
        assert!(value.get("inputSchema").is_some());
        assert!(value.get("input_schema").is_none());
    }

    #[test]
    fn call_result_omits_is_error_when_false() {
        let ok = serde_json::to_value(CallToolResult::text("hi")).unwrap();
        assert_eq!(ok, json!({"content": [{"type": "text", "text": "hi"}]}));
        let failed = serde_json::to_value(CallToolResult::error_text("no")).unwrap();
        assert_eq!(failed["isError"], true);
    }
}
