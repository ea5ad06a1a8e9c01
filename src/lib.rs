//! MCP bridge: exposes host tools to MCP clients over a loopback-only
//! Streamable HTTP transport with Server-Sent Events.

pub mod core;
pub mod tools;
