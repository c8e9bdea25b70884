//! Dynamic search tool registry
//!
//! One tool per standalone source (`search_<name>_docs`) and one per group
//! (`search_<group>_docs`), indexed at startup from the store. No per-source
//! code is generated; a dispatcher maps the tool name back to its scope and
//! runs the shared search service.

use super::types::{ToolDefinition, ToolResult};
use crate::search::{SearchLimits, SearchRequest, SearchService};
use crate::store::Store;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{error, warn};

const NO_RESULTS: &str = "No results found for this query.";

/// What a tool name resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolScope {
    Source(String),
    Group(String),
}

/// Tool registry built once at startup
pub struct ToolRegistry {
    tools: Vec<(ToolDefinition, ToolScope)>,
    by_name: HashMap<String, ToolScope>,
}

impl ToolRegistry {
    /// Index every source and group currently in the store.
    pub async fn build(store: &Store) -> crate::error::Result<Self> {
        let sources = store.list_sources().await?;

        let mut tools: Vec<(ToolDefinition, ToolScope)> = Vec::new();
        let mut group_names: Vec<String> = Vec::new();

        for source in &sources {
            match &source.group_name {
                Some(group) => {
                    if !group_names.contains(group) {
                        group_names.push(group.clone());
                    }
                }
                None => {
                    tools.push((
                        search_tool(
                            &source.name,
                            source.description.as_deref(),
                        ),
                        ToolScope::Source(source.name.clone()),
                    ));
                }
            }
        }

        for group in group_names {
            // Sources shadow groups; a shadowed group gets no tool of its own.
            if sources.iter().any(|s| s.name == group) {
                warn!(group = %group, "Group name shadowed by a source, skipping group tool");
                continue;
            }
            tools.push((search_tool(&group, None), ToolScope::Group(group)));
        }

        let by_name = tools
            .iter()
            .map(|(def, scope)| (def.name.clone(), scope.clone()))
            .collect();

        Ok(Self { tools, by_name })
    }

    /// Tool definitions for `tools/list`
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|(def, _)| def.clone()).collect()
    }

    /// Dispatch a `tools/call` by name
    pub async fn handle(
        &self,
        name: &str,
        arguments: &HashMap<String, Value>,
        search: &SearchService,
    ) -> ToolResult {
        let Some(scope) = self.by_name.get(name) else {
            return ToolResult::error(format!("Unknown tool: {}", name));
        };

        let Some(query) = arguments.get("query").and_then(Value::as_str) else {
            return ToolResult::error("Missing required argument: query");
        };

        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or_else(crate::config::default_search_limit);

        let request = SearchRequest {
            query: query.to_string(),
            limit,
        };
        let limits = SearchLimits::default();

        let response = match scope {
            ToolScope::Source(source) => search.search(source, &request, &limits).await,
            ToolScope::Group(group) => search.search_group(group, &request, &limits).await,
        };

        // Storage problems become a readable no-results answer; the agent on
        // the other side cannot do anything with a raw SQL error.
        match response {
            Ok(response) if response.documents.is_empty() => ToolResult::text(NO_RESULTS),
            Ok(response) => ToolResult::text(format_markdown(&response.documents)),
            Err(err) => {
                error!(tool = %name, error = %err, "Tool call failed");
                ToolResult::text(NO_RESULTS)
            }
        }
    }
}

/// Build the `search_<name>_docs` definition for a source or group
fn search_tool(name: &str, description: Option<&str>) -> ToolDefinition {
    let about = match description {
        Some(desc) => format!("Search the {} documentation. {}", name, desc),
        None => format!("Search the {} documentation.", name),
    };

    ToolDefinition {
        name: format!("search_{}_docs", sanitize_name(name)),
        description: about,
        input_schema: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of documents to return (default: 5)",
                    "default": 5,
                    "minimum": 1
                }
            },
            "required": ["query"]
        }),
    }
}

/// Tool names must be stable identifiers: lowercase alphanumerics and
/// underscores only.
fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// `## {title}\n{url}\n\n{content}` blocks joined by a rule
fn format_markdown(documents: &[crate::search::SearchDocument]) -> String {
    documents
        .iter()
        .map(|doc| format!("## {}\n{}\n\n{}", doc.title, doc.url, doc.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
