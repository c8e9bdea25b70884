//! MCP stdio server implementation

use super::tools::ToolRegistry;
use super::types::{ErrorCode, McpError, McpMessage, McpNotification, McpRequest, McpResponse};
use crate::search::SearchService;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use tracing::{debug, error, info};

/// MCP server: newline-delimited JSON-RPC on stdin/stdout
pub struct McpServer {
    registry: ToolRegistry,
    search: SearchService,
}

impl McpServer {
    pub fn new(registry: ToolRegistry, search: SearchService) -> Self {
        Self { registry, search }
    }

    /// Run the server loop until stdin closes
    pub async fn run(&self) -> std::result::Result<(), McpError> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        info!(
            tools = self.registry.list_tools().len(),
            "MCP server starting on stdio"
        );

        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("Failed to read line: {}", e);
                    continue;
                }
            };

            if line.is_empty() {
                continue;
            }

            let message: McpMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(e) => {
                    error!("Failed to parse message: {}", e);
                    let response = McpResponse::error_with_code(
                        None,
                        ErrorCode::ParseError as i32,
                        format!("Parse error: {}", e),
                    );
                    writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
                    stdout.flush()?;
                    continue;
                }
            };

            match message {
                McpMessage::Request(req) => {
                    let response = self.handle_request(req).await;
                    writeln!(stdout, "{}", serde_json::to_string(&response)?)?;
                    stdout.flush()?;
                }
                McpMessage::Notification(notif) => {
                    self.handle_notification(notif);
                }
            }
        }

        info!("MCP server shutting down");
        Ok(())
    }

    async fn handle_request(&self, request: McpRequest) -> McpResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "tools/list" => McpResponse::success(id, json!({ "tools": self.registry.list_tools() })),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            _ => McpResponse::error_with_code(
                id,
                ErrorCode::MethodNotFound as i32,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_notification(&self, notification: McpNotification) {
        match notification.method.as_str() {
            "notifications/initialized" => info!("Client initialized"),
            other => debug!("Ignoring notification: {}", other),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> McpResponse {
        McpResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": "mcp-docs",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> McpResponse {
        let Some(params) = params else {
            return McpResponse::error_with_code(id, ErrorCode::InvalidParams as i32, "Missing params");
        };

        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return McpResponse::error_with_code(
                id,
                ErrorCode::InvalidParams as i32,
                "Missing tool name",
            );
        };

        let arguments: HashMap<String, Value> = params
            .get("arguments")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        debug!(tool = %name, "Calling tool");
        let result = self.registry.handle(name, &arguments, &self.search).await;

        McpResponse::success(
            id,
            json!({
                "content": result.content,
                "isError": result.is_error
            }),
        )
    }
}
