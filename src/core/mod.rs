//! Core Server Framework Module
//!
//! This module contains the transport and protocol core:
//! - jsonrpc.rs: JSON-RPC 2.0 message model, parsing and validation
//! - registry.rs: tool and command registries
//! - commands.rs: the standard MCP method set
//! - dispatcher.rs: request routing, tool timeouts and panic isolation
//! - session.rs / sse.rs: session ids and per-session event streams
//! - server.rs: the HTTP+SSE transport
//! - owner.rs: running work on the context that owns host resources
//! - utils.rs: configuration

pub mod commands;
pub mod dispatcher;
pub mod error;
pub mod jsonrpc;
pub mod owner;
pub mod registry;
pub mod server;
pub mod session;
pub mod sse;
pub mod utils;
