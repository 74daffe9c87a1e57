// SPDX-License-Identifier: Apache-2.0
//! MCP client: connects to external MCP servers over stdio, SSE, or
//! streamable HTTP and exposes their tools through [`loom_tools::ToolRegistry`].
//!
//! A server that fails to connect at startup is skipped with a logged
//! warning; it never prevents the other configured servers, or the rest
//! of the process, from starting.

mod config;
mod jsonrpc;
mod sse;
mod stdio;

pub use config::{AuthKind, McpConfigFile, McpServerConfig, McpTransportConfig};
pub use jsonrpc::McpToolDescriptor;
pub use sse::{forward_live, read_filtered_frames, should_forward, SseFrame};

use std::sync::Arc;

use async_trait::async_trait;
use loom_config::AgentMode;
use loom_tools::{ApprovalPolicy, Tool, ToolCall, ToolOutput, ToolRegistry};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum McpClientError {
    #[error("mcp server unavailable: {0}")]
    Unavailable(String),
    #[error("mcp tool call failed: {0}")]
    ToolFailed(String),
    #[error("unsupported transport for this operation")]
    Unsupported,
}

/// A connection to one MCP server, abstracting over its transport.
enum Connection {
    Stdio(stdio::StdioClient),
    Http {
        client: reqwest::Client,
        url: String,
        headers: Vec<(String, String)>,
    },
}

impl Connection {
    async fn call(&self, method: &str, params: Value) -> Result<Value, McpClientError> {
        match self {
            Connection::Stdio(c) => c.call(method, params).await,
            Connection::Http { client, url, headers } => {
                let mut req = client.post(url).json(&jsonrpc::Request::new(
                    uuid::Uuid::new_v4().to_string(),
                    method,
                    params,
                ));
                for (k, v) in headers {
                    req = req.header(k, v);
                }
                let resp = req
                    .send()
                    .await
                    .map_err(|e| McpClientError::Unavailable(e.to_string()))?;
                let body: jsonrpc::Response = resp
                    .json()
                    .await
                    .map_err(|e| McpClientError::Unavailable(e.to_string()))?;
                if let Some(err) = body.error {
                    return Err(McpClientError::ToolFailed(err.message));
                }
                Ok(body.result.unwrap_or(Value::Null))
            }
        }
    }
}

async fn connect(config: &McpServerConfig) -> Result<Connection, McpClientError> {
    match &config.transport {
        McpTransportConfig::Stdio { command, args, env, cwd } => {
            let client = stdio::StdioClient::spawn(command, args, env, cwd.as_deref()).await?;
            Ok(Connection::Stdio(client))
        }
        McpTransportConfig::Sse { url, headers, timeout_secs }
        | McpTransportConfig::Streamable { url, headers, timeout_secs } => {
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(*timeout_secs))
                .build()
                .map_err(|e| McpClientError::Unavailable(e.to_string()))?;
            Ok(Connection::Http {
                client,
                url: url.clone(),
                headers: headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            })
        }
    }
}

/// Wraps one remote MCP tool as a local [`Tool`], forwarding `execute`
/// calls to `tools/call` on the owning connection.
struct McpToolAdapter {
    server_name: String,
    descriptor: McpToolDescriptor,
    connection: Arc<Connection>,
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn parameters_schema(&self) -> Value {
        self.descriptor.input_schema.clone()
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let params = serde_json::json!({ "name": self.descriptor.name, "arguments": call.args });
        match self.connection.call("tools/call", params).await {
            Ok(result) => ToolOutput::ok(&call.id, result.to_string()),
            Err(e) => {
                warn!(server = %self.server_name, tool = %self.descriptor.name, error = %e, "mcp tool call failed");
                ToolOutput::err(&call.id, e.to_string())
            }
        }
    }
}

/// Connect to every configured server and register its tools into
/// `registry`. Servers that fail to connect, or whose `tools/list` call
/// fails, are skipped with a warning; the rest continue.
pub async fn connect_all(configs: &[McpServerConfig], registry: &mut ToolRegistry) {
    for config in configs {
        match connect_one(config).await {
            Ok(tools) => {
                for tool in tools {
                    registry.register_arc(tool);
                }
            }
            Err(e) => {
                warn!(server = %config.name, error = %e, "skipping mcp server");
            }
        }
    }
}

async fn connect_one(config: &McpServerConfig) -> Result<Vec<Arc<dyn Tool>>, McpClientError> {
    let connection = Arc::new(connect(config).await?);
    let result = connection.call("tools/list", Value::Null).await?;
    let descriptors: Vec<McpToolDescriptor> = serde_json::from_value(
        result.get("tools").cloned().unwrap_or(Value::Array(vec![])),
    )
    .map_err(|e| McpClientError::ToolFailed(format!("malformed tools/list response: {e}")))?;

    Ok(descriptors
        .into_iter()
        .map(|descriptor| -> Arc<dyn Tool> {
            Arc::new(McpToolAdapter {
                server_name: config.name.clone(),
                descriptor,
                connection: connection.clone(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_tool_adapter_exposes_descriptor_fields() {
        let descriptor = McpToolDescriptor {
            name: "remote_search".into(),
            description: "Searches a remote index".into(),
            input_schema: serde_json::json!({"type": "object"}),
        };
        assert_eq!(descriptor.name, "remote_search");
    }
}
