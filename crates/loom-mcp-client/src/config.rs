// SPDX-License-Identifier: Apache-2.0
//! MCP server configuration, as loaded from an MCP config file.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpTransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Streamable {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: McpTransportConfig,
    /// When set, this server requires an OAuth/PKCE browser flow before its
    /// first request; the access token is cached under the XDG data dir.
    #[serde(default)]
    pub auth: Option<AuthKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    Oauth,
}

impl McpServerConfig {
    pub fn timeout(&self) -> Duration {
        match &self.transport {
            McpTransportConfig::Stdio { .. } => Duration::from_secs(default_timeout_secs()),
            McpTransportConfig::Sse { timeout_secs, .. }
            | McpTransportConfig::Streamable { timeout_secs, .. } => Duration::from_secs(*timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfigFile {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stdio_server() {
        let json = r#"{
            "servers": [
                {"name": "fs", "type": "stdio", "command": "mcp-fs", "args": ["--root", "."]}
            ]
        }"#;
        let cfg: McpConfigFile = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.servers.len(), 1);
        match &cfg.servers[0].transport {
            McpTransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "mcp-fs");
                assert_eq!(args, &vec!["--root".to_string(), ".".to_string()]);
            }
            _ => panic!("wrong transport"),
        }
    }

    #[test]
    fn parses_sse_server_with_default_timeout() {
        let json = r#"{"servers": [{"name": "remote", "type": "sse", "url": "https://example.com/mcp"}]}"#;
        let cfg: McpConfigFile = serde_json::from_str(json).unwrap();
        match &cfg.servers[0].transport {
            McpTransportConfig::Sse { timeout_secs, .. } => assert_eq!(*timeout_secs, 30),
            _ => panic!("wrong transport"),
        }
    }

    #[test]
    fn parses_oauth_auth_kind() {
        let json = r#"{"servers": [{"name": "remote", "type": "streamable", "url": "https://x", "auth": "oauth"}]}"#;
        let cfg: McpConfigFile = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.servers[0].auth, Some(AuthKind::Oauth));
    }
}
