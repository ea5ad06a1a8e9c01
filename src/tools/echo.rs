//! Echo Tool Implementation
//!
//! The echo tool takes a message parameter and returns it, optionally with a
//! configurable prefix from the tool settings.

use crate::core::registry::{CallToolResult, ToolDescriptor, ToolError, ToolHandler, ToolRegistry};
use crate::core::utils::ToolSettings;
use serde_json::Value;

pub const NAME: &str = "echo";

/// Register the echo tool with the tool registry.
///
/// The prefix is read once here; the handler only captures the resolved string.
///
/// # Arguments
/// * `registry` - The tool registry where the tool will be registered
/// * `settings` - Tool settings; `tools.echo.prefix` is honoured
pub fn register(registry: &ToolRegistry, settings: &ToolSettings) {
    let descriptor = ToolDescriptor {
        name: NAME.to_string(),
        description: "Echo a message back to the client.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to echo"
                }
            },
            "required": ["message"]
        }),
    };

    let prefix = settings
        .for_tool(NAME)
        .get("prefix")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let handler: ToolHandler = Box::new(move |args: Value| {
        let message = args
            .get("message")
            .ok_or(ToolError::MissingParameter("message"))?
            .as_str()
            .ok_or_else(|| ToolError::InvalidParameter {
                name: "message",
                reason: "expected a string".to_string(),
            })?;
        Ok(CallToolResult::text(format!("{prefix}{message}")))
    });

    registry.register_fn(descriptor, handler);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with(settings: &ToolSettings) -> ToolRegistry {
        let registry = ToolRegistry::new();
        register(&registry, settings);
        registry
    }

    #[tokio::test]
    async fn echoes_message() {
        let tool = registry_with(&ToolSettings::default()).get(NAME).unwrap();
        let result = tool.execute(json!({"message": "hi"})).await.unwrap();
        assert_eq!(result, CallToolResult::text("hi"));
    }

    #[tokio::test]
    async fn applies_configured_prefix() {
        let settings = ToolSettings::from_value(&json!({"tools": {"echo": {"prefix": "Echo: "}}}));
        let tool = registry_with(&settings).get(NAME).unwrap();
        let result = tool.execute(json!({"message": "hi"})).await.unwrap();
        assert_eq!(result, CallToolResult::text("Echo: hi"));
    }

    #[tokio::test]
    async fn rejects_missing_or_non_string_message() {
        let tool = registry_with(&ToolSettings::default()).get(NAME).unwrap();
        assert!(matches!(
            tool.execute(json!({})).await,
            Err(ToolError::MissingParameter("message"))
        ));
        assert!(matches!(
            tool.execute(json!({"message": 5})).await,
            Err(ToolError::InvalidParameter { .. })
        ));
    }
}
