// SPDX-License-Identifier: Apache-2.0
//! stdio JSON-RPC transport: one line per request/response over a child
//! process's stdin/stdout, correlated by request id (mirrors the
//! `call_id`-based correlation used for loom-node's control protocol).

use std::collections::BTreeMap;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::jsonrpc::{Request, Response};
use crate::McpClientError;

pub struct StdioClient {
    _child: Child,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
}

impl StdioClient {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Self, McpClientError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .spawn()
            .map_err(|e| McpClientError::Unavailable(format!("failed to spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpClientError::Unavailable("child has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpClientError::Unavailable("child has no stdout".into()))?;

        Ok(Self {
            _child: child,
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
        })
    }

    /// Send one JSON-RPC request and read lines until the matching
    /// response id is seen.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, McpClientError> {
        let id = Uuid::new_v4().to_string();
        let request = Request::new(id.clone(), method, params);
        let mut line = serde_json::to_string(&request).map_err(|e| McpClientError::ToolFailed(e.to_string()))?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| McpClientError::Unavailable(e.to_string()))?;
            stdin.flush().await.map_err(|e| McpClientError::Unavailable(e.to_string()))?;
        }

        let mut stdout = self.stdout.lock().await;
        loop {
            let mut raw = String::new();
            let n = stdout
                .read_line(&mut raw)
                .await
                .map_err(|e| McpClientError::Unavailable(e.to_string()))?;
            if n == 0 {
                return Err(McpClientError::Unavailable("server closed stdout".into()));
            }
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response: Response = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(_) => continue, // not a JSON-RPC frame (e.g. log noise); skip
            };
            if response.id.as_deref() != Some(id.as_str()) {
                continue;
            }
            if let Some(err) = response.error {
                return Err(McpClientError::ToolFailed(err.message));
            }
            return Ok(response.result.unwrap_or(serde_json::Value::Null));
        }
    }
}
