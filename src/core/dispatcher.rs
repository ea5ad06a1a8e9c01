//! Dispatcher
//!
//! Resolves a request's method against the [`CommandRegistry`] and turns the
//! outcome into at most one [`Response`]. Tool invocation goes through
//! [`invoke_tool`], which races the tool against the call timeout behind a
//! [`PendingCall`] completion guard.

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::core::jsonrpc::{Request, Response, RpcError, validate};
use crate::core::registry::{CallToolResult, CommandRegistry, Tool};

type CallOutcome = Result<CallToolResult, RpcError>;

/// Completion guard for one `tools/call`.
///
/// Whichever of the tool task and the timeout calls [`complete`](Self::complete)
/// first delivers its outcome; every later call is a silent no-op.
pub struct PendingCall {
    slot: Mutex<Option<oneshot::Sender<CallOutcome>>>,
}

impl PendingCall {
    fn new() -> (Arc<Self>, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                slot: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Deliver `outcome` if nothing has been delivered yet. Returns whether
    /// this call won.
    pub fn complete(&self, outcome: CallOutcome) -> bool {
        match self.slot.lock().take() {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Run `tool` on its own task and wait for its result or the timeout.
///
/// Tool failures and panics become InternalError. On timeout the tool keeps
/// running in the background; its eventual result is dropped by the guard.
pub async fn invoke_tool(tool: Arc<dyn Tool>, arguments: Value, timeout: Duration) -> CallOutcome {
    let (pending, mut outcome) = PendingCall::new();
    let tool_name = tool.name().to_string();

    let worker = Arc::clone(&pending);
    let name = tool_name.clone();
    tokio::spawn(async move {
        let result = match AssertUnwindSafe(tool.execute(arguments)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, error = %e, "tool reported failure");
                Err(RpcError::internal(e.to_string()))
            }
            Err(_) => {
                tracing::error!(tool = %name, "tool panicked during execution");
                Err(RpcError::internal(format!("Error executing tool {name}: handler panicked")))
            }
        };
        if !worker.complete(result) {
            tracing::debug!(tool = %name, "late tool completion discarded");
        }
    });

    match tokio::time::timeout(timeout, &mut outcome).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(RpcError::internal(format!("Tool {tool_name} dropped its response"))),
        Err(_) => {
            let message = format!(
                "Tool {tool_name} timed out after {}ms",
                timeout.as_millis()
            );
            if pending.complete(Err(RpcError::internal(message))) {
                tracing::warn!(tool = %tool_name, timeout_ms = timeout.as_millis() as u64, "tool call timed out");
            }
            // Either the timeout or a completion that slipped in just before it.
            outcome
                .await
                .unwrap_or_else(|_| Err(RpcError::internal("tool call abandoned")))
        }
    }
}

/// Per-request context handed down from the transport.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Session the request is scoped to, if any. Advisory only.
    pub session_id: Option<String>,
}

/// Routes requests to commands. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    commands: Arc<CommandRegistry>,
}

impl Dispatcher {
    pub fn new(commands: CommandRegistry) -> Self {
        Self {
            commands: Arc::new(commands),
        }
    }

    /// Handle one validated request. Returns `None` for notifications, even
    /// when the command failed.
    pub async fn dispatch(&self, request: Request, ctx: &RequestContext) -> Option<Response> {
        let outcome = self.execute(&request, ctx).await;
        if request.is_notification() {
            if let Err(e) = &outcome {
                tracing::debug!(method = %request.method, error = %e, "notification failed, no response sent");
            }
            return None;
        }
        Response::for_request(&request, outcome)
    }

    /// Validate and dispatch one raw message. Invalid notifications are dropped.
    pub async fn dispatch_value(&self, value: Value, ctx: &RequestContext) -> Option<Response> {
        match validate(value) {
            Ok(request) => self.dispatch(request, ctx).await,
            Err((_, true)) => None,
            Err((response, false)) => Some(response),
        }
    }

    /// Process a batch as independent sub-requests, concurrently. The result
    /// holds only the non-notification replies, in request order.
    pub async fn dispatch_batch(&self, items: Vec<Value>, ctx: &RequestContext) -> Vec<Response> {
        let replies =
            futures_util::future::join_all(items.into_iter().map(|item| self.dispatch_value(item, ctx)))
                .await;
        replies.into_iter().flatten().collect()
    }

    async fn execute(&self, request: &Request, ctx: &RequestContext) -> Result<Value, RpcError> {
        let Some(command) = self.commands.get(&request.method) else {
            tracing::debug!(method = %request.method, "method not found");
            return Err(RpcError::method_not_found(&request.method));
        };

        match AssertUnwindSafe(command.execute(request)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(
                    method = %request.method,
                    session_id = ctx.session_id.as_deref().unwrap_or("-"),
                    "command panicked"
                );
                Err(RpcError::internal(format!(
                    "Internal Server Error: command {} panicked",
                    request.method
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jsonrpc::{INTERNAL_ERROR, METHOD_NOT_FOUND};
    use crate::core::registry::{Command, FnTool, ToolDescriptor, ToolError, ToolHandler};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Slow {
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<CallToolResult, ToolError> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(CallToolResult::text("late"))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<CallToolResult, ToolError> {
            panic!("tool blew up")
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "reports an error"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value) -> Result<CallToolResult, ToolError> {
            Err(ToolError::Failed("disk full".to_string()))
        }
    }

    struct Echo;

    #[async_trait]
    impl Command for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn execute(&self, request: &Request) -> Result<Value, RpcError> {
            Ok(request.params.clone().unwrap_or(Value::Null))
        }
    }

    struct Exploding;

    #[async_trait]
    impl Command for Exploding {
        fn name(&self) -> &str {
            "explode"
        }
        async fn execute(&self, _request: &Request) -> Result<Value, RpcError> {
            panic!("command blew up")
        }
    }

    fn dispatcher() -> Dispatcher {
        let mut commands = CommandRegistry::new();
        commands.register(Arc::new(Echo));
        commands.register(Arc::new(Exploding));
        Dispatcher::new(commands)
    }

    #[test]
    fn only_first_completion_wins() {
        let (pending, mut rx) = PendingCall::new();
        assert!(pending.complete(Ok(CallToolResult::text("first"))));
        assert!(!pending.complete(Ok(CallToolResult::text("second"))));
        assert_eq!(rx.try_recv().unwrap().unwrap(), CallToolResult::text("first"));
    }

    #[tokio::test]
    async fn fast_tool_returns_its_result() {
        let finished = Arc::new(AtomicBool::new(false));
        let tool = Arc::new(Slow {
            delay: Duration::from_millis(1),
            finished: finished.clone(),
        });
        let result = invoke_tool(tool, json!({}), Duration::from_secs(5)).await.unwrap();
        assert_eq!(result, CallToolResult::text("late"));
    }

    #[tokio::test]
    async fn stuck_tool_times_out_once_and_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let tool = Arc::new(Slow {
            delay: Duration::from_millis(200),
            finished: finished.clone(),
        });
        let err = invoke_tool(tool, json!({}), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert!(err.message.contains("timed out"));
        assert!(!finished.load(Ordering::SeqCst));

        // The background task completes later; its result goes nowhere.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    fn blocking_fn_tool(name: &str, handler: ToolHandler) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolDescriptor {
                name: name.to_string(),
                description: "closure tool".to_string(),
                input_schema: json!({"type": "object"}),
            },
            handler,
        ))
    }

    // Current-thread runtime: the timer must still fire while the handler blocks.
    #[tokio::test]
    async fn blocking_closure_tool_still_times_out() {
        let tool = blocking_fn_tool(
            "sleepy",
            Box::new(|_| {
                std::thread::sleep(Duration::from_millis(600));
                Ok(CallToolResult::text("finished"))
            }),
        );
        let started = std::time::Instant::now();
        let err = invoke_tool(tool, json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.message.contains("timed out"));
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn panicking_closure_tool_becomes_internal_error() {
        let tool = blocking_fn_tool("bad", Box::new(|_| panic!("closure blew up")));
        let err = invoke_tool(tool, json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert!(err.message.contains("bad"));
    }

    #[tokio::test]
    async fn panicking_tool_becomes_internal_error() {
        let err = invoke_tool(Arc::new(Panicky), json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR);
        assert!(err.message.contains("panicky"));
    }

    #[tokio::test]
    async fn tool_failure_message_is_forwarded() {
        let err = invoke_tool(Arc::new(Failing), json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::internal("disk full"));
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let response = dispatcher()
            .dispatch(Request::new(1, "nope", None), &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_never_get_a_response() {
        let d = dispatcher();
        let ctx = RequestContext::default();
        assert!(d.dispatch(Request::notification("echo", None), &ctx).await.is_none());
        assert!(d.dispatch(Request::notification("nope", None), &ctx).await.is_none());
        assert!(d.dispatch(Request::notification("explode", None), &ctx).await.is_none());
    }

    #[tokio::test]
    async fn panicking_command_is_isolated() {
        let response = dispatcher()
            .dispatch(Request::new(9, "explode", None), &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(response.id, json!(9));
        assert_eq!(response.error.unwrap().code, INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn batch_collects_only_replies_in_order() {
        let batch = vec![
            json!({"jsonrpc": "2.0", "id": 1, "method": "echo", "params": {"n": 1}}),
            json!({"jsonrpc": "2.0", "method": "echo"}),
            json!({"jsonrpc": "2.0", "id": 2}),
            json!({"jsonrpc": "2.0", "id": "three", "method": "nope"}),
        ];
        let replies = dispatcher().dispatch_batch(batch, &RequestContext::default()).await;
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0].id, json!(1));
        assert_eq!(replies[0].result, Some(json!({"n": 1})));
        assert_eq!(replies[1].id, json!(2));
        assert!(replies[1].is_error());
        assert_eq!(replies[2].id, json!("three"));
    }

    #[tokio::test]
    async fn notification_only_batch_is_empty() {
        let batch = vec![
            json!({"jsonrpc": "2.0", "method": "echo"}),
            json!({"jsonrpc": "2.0", "method": "nope"}),
        ];
        assert!(dispatcher()
            .dispatch_batch(batch, &RequestContext::default())
            .await
            .is_empty());
    }
}
