//! Tools Module
//!
//! This module contains all MCP tool implementations. Each tool is implemented
//! as a separate module that exports a `register` function to add the tool to
//! the registry during server initialization.

use crate::core::owner::OwnerHandle;
use crate::core::registry::ToolRegistry;
use crate::core::utils::ToolSettings;

pub mod echo;
pub mod ping;

/// Register every built-in tool.
///
/// # Arguments
/// * `registry` - The tool registry shared with the dispatcher
/// * `settings` - Per-tool settings from the tool config file
/// * `owner` - Handle onto the context that owns host resources
pub fn register_all(registry: &ToolRegistry, settings: &ToolSettings, owner: OwnerHandle) {
    echo::register(registry, settings);
    ping::register(registry, owner);
    tracing::info!(tools = registry.len(), "tools registered");
}
