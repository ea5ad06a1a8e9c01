//! MCP Bridge Entry Point
//!
//! Loads configuration from environment variables, registers the built-in
//! tools, and serves the MCP HTTP+SSE transport until Ctrl-C.
//!
//! Environment Variables:
//! - SERVER_NAME: Name of the server (default: "mcp-bridge")
//! - SERVER_VERSION: Version string (default: crate version)
//! - HOST: Loopback bind address (default: "127.0.0.1")
//! - PORT: Port number (default: 18008)
//! - MCP_TOOL_CONFIG: Path to the per-tool JSON settings file
//! - RUST_LOG: Log filter (default: "info")

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use mcp_bridge::core::commands::{ServerInfo, standard_commands};
use mcp_bridge::core::dispatcher::Dispatcher;
use mcp_bridge::core::owner::owner_channel;
use mcp_bridge::core::registry::ToolRegistry;
use mcp_bridge::core::server::McpServer;
use mcp_bridge::core::utils::{LogFormat, ServerConfig, ToolSettings};
use mcp_bridge::tools;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    let settings = ToolSettings::load(config.tool_config_path.as_deref())
        .context("failed to load tool settings")?;

    // Host resources are owned by this thread; tools reach it through the handle.
    let (owner, queue) = owner_channel();
    let owner_thread = queue
        .spawn_thread("mcp-owner")
        .context("failed to start owner thread")?;

    let registry = Arc::new(ToolRegistry::new());
    tools::register_all(&registry, &settings, owner);

    let commands = standard_commands(
        ServerInfo {
            name: config.server_name.clone(),
            version: config.server_version.clone(),
        },
        Arc::clone(&registry),
        config.page_size,
        config.call_timeout,
    );
    let server = McpServer::new(config, Dispatcher::new(commands));
    let addr = server.start().context("failed to start transport")?;
    tracing::info!(%addr, "MCP bridge listening; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");

    server.stop().await;
    drop(server);
    // Dropping the registry releases the last owner handles so the owner thread exits.
    registry.clear();
    drop(registry);
    if owner_thread.join().is_err() {
        tracing::error!("owner thread panicked");
    }
    Ok(())
}
