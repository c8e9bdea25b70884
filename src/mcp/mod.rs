//! MCP (Model Context Protocol) server implementation
//!
//! Exposes one search tool per source or group over stdio. stdout carries
//! protocol messages only; everything else logs to stderr.

mod server;
mod tools;
mod types;

pub use server::McpServer;
pub use tools::{ToolRegistry, ToolScope};
pub use types::{McpError, McpRequest, McpResponse};
