//! JSON-RPC 2.0 Message Envelope
//!
//! Request, response, error and notification structures for the MCP protocol,
//! the standard error codes, and the rules for turning a raw HTTP body into
//! either a single message or a batch.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received by the server.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;
/// The `Mcp-Session-Id` supplied by the client is unknown or expired.
pub const INVALID_SESSION: i32 = -32001;

/// JSON-RPC 2.0 request structure for MCP protocol.
///
/// `id` distinguishes three cases: absent (`None`, a notification), explicit
/// `null` (`Some(Value::Null)`), and a string or number.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Request {
    /// JSON-RPC version identifier, must be "2.0"
    pub jsonrpc: String,
    /// Request ID for correlating responses. None indicates a notification.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    /// MCP method name (e.g., "initialize", "tools/list", "tools/call")
    pub method: String,
    /// Method-specific parameters as JSON value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Keeps an explicit `"id": null` as `Some(Value::Null)`; only a missing
/// field becomes `None`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// A request without an `id` must never be answered.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Returns `params` when it is a JSON object.
    pub fn params_object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.params.as_ref().and_then(Value::as_object)
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, thiserror::Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct RpcError {
    /// JSON-RPC error code (e.g., -32601 for method not found)
    pub code: i32,
    /// Human-readable error message
    pub message: String,
    /// Optional free-form diagnostic payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }

    pub fn invalid_session(session_id: &str) -> Self {
        Self::new(INVALID_SESSION, "Invalid or expired session")
            .with_data(serde_json::json!({ "sessionId": session_id }))
    }
}

/// JSON-RPC 2.0 response structure for MCP protocol.
///
/// Exactly one of `result` and `error` is set; the constructors are the only
/// way to build one.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Response {
    /// JSON-RPC version identifier, always "2.0"
    pub jsonrpc: String,
    /// Request ID from the original request, `null` when it could not be read
    pub id: Value,
    /// Response result, present when request succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error information, present when request failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Builds the reply to `request`, or `None` when the request is a
    /// notification.
    pub fn for_request(request: &Request, outcome: Result<Value, RpcError>) -> Option<Self> {
        let id = request.id.clone()?;
        Some(match outcome {
            Ok(result) => Self::success(id, result),
            Err(error) => Self::error(id, error),
        })
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Server-initiated JSON-RPC notification, pushed over SSE.
#[derive(Serialize, Debug, Clone)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A POST body after JSON parsing, before per-message validation.
#[derive(Debug)]
pub enum Incoming {
    Single(Value),
    Batch(Vec<Value>),
}

/// Parses a raw body into a single message or a batch.
///
/// Malformed JSON yields a ParseError response with `id: null`.
pub fn parse_body(body: &[u8]) -> Result<Incoming, Response> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Array(items)) => Ok(Incoming::Batch(items)),
        Ok(value) => Ok(Incoming::Single(value)),
        Err(e) => Err(Response::error(
            Value::Null,
            RpcError::parse_error().with_data(Value::String(e.to_string())),
        )),
    }
}

/// Validates one message value into a [`Request`].
///
/// On failure returns the InvalidRequest response, carrying the message's
/// `id` when one could be read, and whether that message was a notification
/// (in which case the caller must drop the error rather than send it).
pub fn validate(value: Value) -> Result<Request, (Response, bool)> {
    let Some(object) = value.as_object() else {
        return Err((
            Response::error(Value::Null, RpcError::invalid_request("Request must be an object")),
            false,
        ));
    };

    let id = object.get("id").cloned();
    let reply_id = id.clone().unwrap_or(Value::Null);
    let is_notification = id.is_none();

    if let Some(id) = &id {
        if !(id.is_string() || id.is_number() || id.is_null()) {
            return Err((
                Response::error(Value::Null, RpcError::invalid_request("Invalid id")),
                false,
            ));
        }
    }

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err((
            Response::error(reply_id, RpcError::invalid_request("jsonrpc must be \"2.0\"")),
            is_notification,
        ));
    }

    match object.get("method") {
        Some(Value::String(m)) if !m.is_empty() => {}
        _ => {
            return Err((
                Response::error(reply_id, RpcError::invalid_request("Missing method")),
                is_notification,
            ));
        }
    }

    if let Some(params) = object.get("params") {
        if !(params.is_object() || params.is_array() || params.is_null()) {
            return Err((
                Response::error(reply_id, RpcError::invalid_request("params must be structured")),
                is_notification,
            ));
        }
    }

    serde_json::from_value::<Request>(value).map_err(|e| {
        (
            Response::error(reply_id, RpcError::invalid_request(e.to_string())),
            is_notification,
        )
    })
}

/// Whether the raw message names the given method, used before validation to
/// decide if an `initialize` call should mint a session.
pub fn names_method(value: &Value, method: &str) -> bool {
    value.get("method").and_then(Value::as_str) == Some(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_id_is_notification_but_null_id_is_not() {
        let notification: Request =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        assert!(notification.is_notification());

        let null_id: Request =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": null, "method": "ping"}))
                .unwrap();
        assert_eq!(null_id.id, Some(Value::Null));
        assert!(!null_id.is_notification());
    }

    #[test]
    fn response_has_result_xor_error() {
        let ok = serde_json::to_value(Response::success(json!(1), json!({}))).unwrap();
        assert!(ok.get("result").is_some());
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(Response::error(json!(1), RpcError::internal("boom")))
            .unwrap();
        assert!(err.get("result").is_none());
        assert_eq!(err["error"]["code"], INTERNAL_ERROR);
        assert_eq!(err["error"]["message"], "boom");
        assert!(err["error"].get("data").is_none());
    }

    #[test]
    fn for_request_skips_notifications() {
        let notification = Request::notification("notifications/initialized", None);
        assert!(Response::for_request(&notification, Ok(json!({}))).is_none());
        assert!(Response::for_request(&notification, Err(RpcError::internal("x"))).is_none());

        let request = Request::new("abc", "ping", None);
        let response = Response::for_request(&request, Ok(json!({}))).unwrap();
        assert_eq!(response.id, json!("abc"));
    }

    #[test]
    fn malformed_body_is_parse_error_with_null_id() {
        let response = parse_body(b"{not json").unwrap_err();
        assert_eq!(response.id, Value::Null);
        assert_eq!(response.error.unwrap().code, PARSE_ERROR);
    }

    #[test]
    fn array_body_is_a_batch() {
        match parse_body(br#"[{"jsonrpc":"2.0","method":"ping"}]"#).unwrap() {
            Incoming::Batch(items) => assert_eq!(items.len(), 1),
            Incoming::Single(_) => panic!("expected batch"),
        }
    }

    #[test]
    fn missing_method_keeps_the_request_id() {
        let (response, notification) =
            validate(json!({"jsonrpc": "2.0", "id": 2})).unwrap_err();
        assert!(!notification);
        assert_eq!(response.id, json!(2));
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn wrong_version_is_invalid_request() {
        let (response, _) =
            validate(json!({"jsonrpc": "1.0", "id": 7, "method": "ping"})).unwrap_err();
        assert_eq!(response.error.unwrap().code, INVALID_REQUEST);
    }

    #[test]
    fn non_object_element_is_invalid_request() {
        let (response, notification) = validate(json!(42)).unwrap_err();
        assert!(!notification);
        assert_eq!(response.id, Value::Null);
    }

    #[test]
    fn invalid_session_error_carries_session_id() {
        let error = RpcError::invalid_session("abc");
        assert_eq!(error.code, INVALID_SESSION);
        assert_eq!(error.data, Some(json!({"sessionId": "abc"})));
    }
}
