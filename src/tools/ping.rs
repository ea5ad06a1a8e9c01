//! Host Ping Tool
//!
//! Round-trips through the owner context and reports which thread served the
//! call. Useful for checking that the owner loop is alive.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

use crate::core::owner::OwnerHandle;
use crate::core::registry::{CallToolResult, Tool, ToolError, ToolRegistry};

pub const NAME: &str = "host.ping";

pub struct HostPingTool {
    owner: OwnerHandle,
    started: Instant,
}

impl HostPingTool {
    pub fn new(owner: OwnerHandle) -> Self {
        Self {
            owner,
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl Tool for HostPingTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Check that the host is responsive and report process information."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note": {
                    "type": "string",
                    "description": "Optional text returned unchanged"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: Value) -> Result<CallToolResult, ToolError> {
        let note = match arguments.get("note") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                return Err(ToolError::InvalidParameter {
                    name: "note",
                    reason: "expected a string".to_string(),
                });
            }
        };

        let sent = Instant::now();
        let owner_thread = self
            .owner
            .invoke(|| {
                std::thread::current()
                    .name()
                    .unwrap_or("unnamed")
                    .to_string()
            })
            .await?;

        Ok(CallToolResult::json(&json!({
            "pid": std::process::id(),
            "ownerThread": owner_thread,
            "roundTripMicros": sent.elapsed().as_micros() as u64,
            "uptimeSecs": self.started.elapsed().as_secs(),
            "note": note,
        })))
    }
}

pub fn register(registry: &ToolRegistry, owner: OwnerHandle) {
    registry.register(Arc::new(HostPingTool::new(owner)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::owner::{OwnerError, owner_channel};
    use crate::core::registry::Content;

    #[tokio::test]
    async fn reports_owner_thread() {
        let (handle, queue) = owner_channel();
        let _owner = queue.spawn_thread("host-owner").unwrap();

        let result = HostPingTool::new(handle)
            .execute(json!({"note": "hello"}))
            .await
            .unwrap();
        let Content::Text { text } = &result.content[0];
        let report: Value = serde_json::from_str(text).unwrap();
        assert_eq!(report["ownerThread"], "host-owner");
        assert_eq!(report["pid"], std::process::id());
        assert_eq!(report["note"], "hello");
    }

    #[tokio::test]
    async fn closed_owner_is_an_error() {
        let (handle, queue) = owner_channel();
        drop(queue);
        let err = HostPingTool::new(handle).execute(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Owner(OwnerError::Closed)));
    }
}
