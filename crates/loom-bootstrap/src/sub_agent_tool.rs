// SPDX-License-Identifier: Apache-2.0
//! [`SubAgentTool`] — exposes one discovered sub-agent definition as a
//! callable tool of the main agent.
//!
//! Unlike [`crate::task_tool::TaskTool`], which spawns a generic sub-agent
//! from a `mode` argument, a `SubAgentTool` is bound to a single
//! [`AgentInfo`] at registration time and always runs with that agent's
//! markdown body as its system prompt override.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use loom_config::{AgentMode, Config};
use loom_core::{Agent, AgentEvent, AgentRuntimeContext};
use loom_runtime::AgentInfo;
use loom_tools::{
    events::{TodoItem, ToolEvent},
    policy::ApprovalPolicy,
    tool::{Tool, ToolCall, ToolOutput},
};

use crate::context::ToolSetProfile;
use crate::registry::build_tool_registry;

const MAX_DEPTH: usize = 3;

/// Runs one file-defined sub-agent, isolated from the caller's context and
/// seeded with the sub-agent's own system prompt.
pub struct SubAgentTool {
    info: AgentInfo,
    model: Arc<dyn loom_model::ModelProvider>,
    config: Arc<Config>,
    depth: Arc<AtomicUsize>,
    sub_agent_runtime: AgentRuntimeContext,
}

impl SubAgentTool {
    pub fn new(
        info: AgentInfo,
        model: Arc<dyn loom_model::ModelProvider>,
        config: Arc<Config>,
        depth: Arc<AtomicUsize>,
        sub_agent_runtime: AgentRuntimeContext,
    ) -> Self {
        Self {
            info,
            model,
            config,
            depth,
            sub_agent_runtime,
        }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.info.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task to hand to this sub-agent"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    fn modes(&self) -> &[AgentMode] {
        &[AgentMode::Agent]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let prompt = match call.args.get("prompt").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'prompt'"),
        };

        let current_depth = self.depth.load(Ordering::Relaxed);
        if current_depth >= MAX_DEPTH {
            return ToolOutput::err(
                &call.id,
                format!("maximum sub-agent depth ({MAX_DEPTH}) reached"),
            );
        }

        self.depth.fetch_add(1, Ordering::Relaxed);
        debug!(
            agent = %self.info.name,
            depth = current_depth + 1,
            "invoking sub-agent"
        );

        let mode = AgentMode::Agent;
        let sub_config = self.config.agent.clone();
        let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));
        let mode_lock = Arc::new(Mutex::new(mode));
        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);

        let mut runtime = self.sub_agent_runtime.clone();
        runtime.system_prompt_override = Some(self.info.content.clone());

        let tools = Arc::new(build_tool_registry(
            &self.config,
            self.model.clone(),
            ToolSetProfile::SubAgent { todos },
            mode_lock.clone(),
            tool_event_tx,
            AgentRuntimeContext::default(),
        ));

        let max_context_tokens = self
            .model
            .catalog_context_window()
            .unwrap_or(128_000) as usize;

        let mut agent = Agent::new(
            self.model.clone(),
            tools,
            Arc::new(sub_config),
            runtime,
            mode_lock,
            tool_event_rx,
            max_context_tokens,
        );

        let (tx, mut rx) = mpsc::channel::<AgentEvent>(256);
        let submit_result = agent.submit(&prompt, tx).await;

        let mut output = String::new();
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::TextDelta(delta) = event {
                output.push_str(&delta);
            }
        }

        self.depth.fetch_sub(1, Ordering::Relaxed);

        match submit_result {
            Ok(_) => {
                if output.is_empty() {
                    ToolOutput::ok(&call.id, "(sub-agent produced no text output)")
                } else {
                    ToolOutput::ok(&call.id, output)
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("sub-agent error: {e}")),
        }
    }
}
