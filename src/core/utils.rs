//! Configuration and Environment Management
//!
//! Server settings come from environment variables; per-tool settings come
//! from an optional JSON file named by `MCP_TOOL_CONFIG`, organised with a
//! `tools` section keyed by tool name.

use serde_json::Value;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::core::error::ConfigError;

pub const DEFAULT_PORT: u16 = 18008;
pub const DEFAULT_ENDPOINT_PATH: &str = "/mcp";
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(5);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Runtime configuration for the MCP bridge.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name as reported in MCP initialize responses
    pub server_name: String,
    /// Server version string as reported in MCP initialize responses
    pub server_version: String,
    /// Loopback address to bind
    pub host: IpAddr,
    /// Port to bind; 0 picks an ephemeral port
    pub port: u16,
    /// Number of actix worker threads
    pub workers: usize,
    /// Single endpoint path, always starting with `/` and without a trailing slash
    pub endpoint_path: String,
    pub keep_alive_interval: Duration,
    pub call_timeout: Duration,
    pub page_size: usize,
    pub log_format: LogFormat,
    pub tool_config_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "mcp-bridge".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            workers: default_workers(),
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            keep_alive_interval: DEFAULT_KEEP_ALIVE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            page_size: DEFAULT_PAGE_SIZE,
            log_format: LogFormat::Pretty,
            tool_config_path: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup; unset keys keep
    /// their defaults, malformed values are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("SERVER_NAME") {
            config.server_name = name;
        }
        if let Some(version) = lookup("SERVER_VERSION") {
            config.server_version = version;
        }
        if let Some(host) = lookup("HOST") {
            config.host = parse_loopback_host(&host)?;
        }
        if let Some(port) = lookup("PORT") {
            config.port = parse_value("PORT", &port)?;
        }
        if let Some(workers) = lookup("WORKER_THREADS") {
            config.workers = parse_value("WORKER_THREADS", &workers)?;
            if config.workers == 0 {
                return Err(invalid("WORKER_THREADS", &workers, "must be at least 1"));
            }
        }
        if let Some(path) = lookup("MCP_ENDPOINT_PATH") {
            config.endpoint_path = normalize_path(&path);
        }
        if let Some(secs) = lookup("MCP_KEEP_ALIVE_SECS") {
            config.keep_alive_interval = parse_secs("MCP_KEEP_ALIVE_SECS", &secs)?;
        }
        if let Some(secs) = lookup("MCP_CALL_TIMEOUT_SECS") {
            config.call_timeout = parse_secs("MCP_CALL_TIMEOUT_SECS", &secs)?;
        }
        if let Some(size) = lookup("MCP_PAGE_SIZE") {
            config.page_size = parse_value("MCP_PAGE_SIZE", &size)?;
            if config.page_size == 0 {
                return Err(invalid("MCP_PAGE_SIZE", &size, "must be at least 1"));
            }
        }
        if let Some(format) = lookup("MCP_LOG_FORMAT") {
            config.log_format = match format.to_ascii_lowercase().as_str() {
                "pretty" | "text" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => return Err(invalid("MCP_LOG_FORMAT", &format, "expected pretty or json")),
            };
        }
        config.tool_config_path = lookup("MCP_TOOL_CONFIG").filter(|p| !p.is_empty());

        Ok(config)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Defaults to CPU count but capped at 16 to avoid excessive context switching
fn default_workers() -> usize {
    num_cpus::get().clamp(1, 16)
}

fn parse_loopback_host(raw: &str) -> Result<IpAddr, ConfigError> {
    let ip = if raw.eq_ignore_ascii_case("localhost") {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        raw.parse::<IpAddr>()
            .map_err(|e| invalid("HOST", raw, &e.to_string()))?
    };
    if !ip.is_loopback() {
        return Err(ConfigError::NonLoopbackHost(raw.to_string()));
    }
    Ok(ip)
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| invalid(key, raw, &e.to_string()))
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_value(key, raw)?;
    if secs == 0 {
        return Err(invalid(key, raw, "must be at least 1 second"));
    }
    Ok(Duration::from_secs(secs))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Leading slash added, trailing slashes removed; the root path stays `/`.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Per-tool configuration loaded from the tool config file.
///
/// If the file contains:
/// ```json
/// { "tools": { "echo": { "prefix": "Echo: " } } }
/// ```
/// then `settings.for_tool("echo")` returns `{"prefix": "Echo: "}`.
#[derive(Debug, Clone, Default)]
pub struct ToolSettings {
    tools: HashMap<String, HashMap<String, Value>>,
}

impl ToolSettings {
    /// Read settings from `path`, or empty settings when no path is configured.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ToolConfigIo {
            path: path.to_string(),
            source,
        })?;
        let value: Value =
            serde_json::from_str(&raw).map_err(|source| ConfigError::ToolConfigParse {
                path: path.to_string(),
                source,
            })?;
        Ok(Self::from_value(&value))
    }

    /// Navigate the configuration hierarchy: config -> tools -> tool_name
    pub fn from_value(config: &Value) -> Self {
        let tools = config
            .get("tools")
            .and_then(Value::as_object)
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|(name, settings)| {
                        let settings = settings.as_object()?;
                        Some((
                            name.clone(),
                            settings.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { tools }
    }

    /// Settings for one tool; empty when the tool has none.
    pub fn for_tool(&self, tool_name: &str) -> HashMap<String, Value> {
        self.tools.get(tool_name).cloned().unwrap_or_default()
    }
}
