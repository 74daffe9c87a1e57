// SPDX-License-Identifier: Apache-2.0
//! [`AgentBuilder`] — single entry point for constructing a fully wired Agent.
//!
//! Callers pass a [`Config`], an optional [`RuntimeContext`], the desired
//! mode and model, and a [`ToolSetProfile`].  The builder handles registry
//! construction and [`AgentRuntimeContext`] population internally.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use loom_config::{AgentMode, Config};
use loom_core::{Agent, AgentRuntimeContext};
use loom_mcp_client::McpServerConfig;
use loom_model::ModelProvider;
use loom_runtime::{discover_agents_with_overrides, discover_skills, DiscoveryOverrides, SearchOrder};
use loom_tools::events::ToolEvent;

use crate::context::{RuntimeContext, ToolSetProfile};
use crate::registry::build_tool_registry;

/// Constructs a fully wired [`Agent`] from configuration and runtime context.
///
/// # Example
/// ```rust,ignore
/// let agent = AgentBuilder::new(config)
///     .with_runtime_context(RuntimeContext::auto_detect())
///     .build(mode, model, ToolSetProfile::Full { ... })
///     .await;
/// ```
pub struct AgentBuilder {
    config: Arc<Config>,
    runtime_ctx: RuntimeContext,
    mcp_servers: Vec<McpServerConfig>,
}

impl AgentBuilder {
    /// Create a builder with the given configuration.
    /// Runtime context defaults to empty (no project/git/CI detection).
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            runtime_ctx: RuntimeContext::empty(),
            mcp_servers: Vec::new(),
        }
    }

    /// Set the runtime context (project root, git, CI environment).
    pub fn with_runtime_context(mut self, ctx: RuntimeContext) -> Self {
        self.runtime_ctx = ctx;
        self
    }

    /// Register MCP servers whose tools are merged into the registry built
    /// for the `Full` profile. A server that fails to connect is skipped
    /// with a logged warning rather than failing the whole build.
    pub fn with_mcp_servers(mut self, servers: Vec<McpServerConfig>) -> Self {
        self.mcp_servers = servers;
        self
    }

    /// Build the [`Agent`] with the given mode, model, and tool-set profile.
    ///
    /// This method owns the creation of the shared mode lock and tool-event
    /// channel so that `SwitchModeTool` / `TodoWriteTool` and the agent loop
    /// operate on **the same** instances:
    ///
    /// 1. Creates `mode_lock` (same Arc for both the registry and the Agent).
    /// 2. Creates `(tool_event_tx, tool_event_rx)` (tx → tools, rx → Agent).
    /// 3. Converts [`RuntimeContext`] → [`AgentRuntimeContext`].
    /// 4. Builds a [`ToolRegistry`] via `build_tool_registry`.
    /// 5. Connects any configured MCP servers and merges their tools in.
    /// 6. Constructs `Agent::new(...)`.
    pub async fn build(
        self,
        mode: AgentMode,
        model: Arc<dyn ModelProvider>,
        profile: ToolSetProfile,
    ) -> Agent {
        // Shared mode lock: SwitchModeTool holds a clone; the agent owns it.
        let mode_lock = Arc::new(Mutex::new(mode));
        // Shared event channel: tools send, agent drains.
        let (tool_event_tx, tool_event_rx) = mpsc::channel::<ToolEvent>(64);

        // Bind every file-touching tool to this project root for the rest of
        // the process. Only the first build() in a process takes effect.
        loom_workspace::set_workspace_root(self.runtime_ctx.project_root.clone());

        // Discover skills and sub-agents from the standard search hierarchy
        // rooted at the detected project. A discovery failure (e.g. a cyclic
        // sub-agent dependency) must not prevent the agent from starting, so
        // it degrades to an empty agent list rather than propagating.
        let skills = discover_skills(self.runtime_ctx.project_root.as_deref());
        let (plugin_paths, search_order, overrides) = resolve_discovery_config(&self.config.agent);
        let agents = discover_agents_with_overrides(
            self.runtime_ctx.project_root.as_deref(),
            &plugin_paths,
            &search_order,
            &overrides,
        )
        .unwrap_or_default();

        // Convert RuntimeContext → AgentRuntimeContext (the loom-core type).
        let runtime = AgentRuntimeContext {
            project_root: self.runtime_ctx.project_root,
            git_context_note: self.runtime_ctx.git_context
                .and_then(|g| g.to_prompt_section()),
            ci_context_note: self.runtime_ctx.ci_context
                .and_then(|c| c.to_prompt_section()),
            project_context_file: self.runtime_ctx.project_context_file,
            append_system_prompt: self.runtime_ctx.append_system_prompt,
            system_prompt_override: self.runtime_ctx.system_prompt_override,
            skills: loom_runtime::SharedSkills::new(skills),
            agents: loom_runtime::SharedAgents::new(agents),
        };

        // Pass runtime.clone() as sub_agent_runtime so TaskTool sub-agents
        // inherit the parent's project root, AGENTS.md, CI/git context.
        let mut registry = build_tool_registry(
            &self.config,
            model.clone(),
            profile,
            mode_lock.clone(),
            tool_event_tx,
            runtime.clone(),
        );

        if !self.mcp_servers.is_empty() {
            loom_mcp_client::connect_all(&self.mcp_servers, &mut registry).await;
        }

        // Resolve context window from the static catalog; fall back to 128 000.
        let context_window = model.catalog_context_window().unwrap_or(128_000) as usize;

        Agent::new(
            model,
            Arc::new(registry),
            Arc::new(self.config.agent.clone()),
            runtime,
            mode_lock,
            tool_event_rx,
            context_window,
        )
    }
}

/// Resolve plugin dirs / search order / explicit-path overrides for sub-agent
/// discovery from `agent_cfg`, with `LOOM_AGENT_*` environment variables
/// taking precedence over the config file, which takes precedence over
/// `agent_cfg`'s built-in defaults.
fn resolve_discovery_config(
    agent_cfg: &loom_config::AgentConfig,
) -> (Vec<std::path::PathBuf>, SearchOrder, DiscoveryOverrides) {
    use std::path::PathBuf;

    fn env_path(name: &str) -> Option<PathBuf> {
        std::env::var(name).ok().filter(|s| !s.is_empty()).map(PathBuf::from)
    }
    fn env_bool(name: &str) -> Option<bool> {
        std::env::var(name).ok().and_then(|s| match s.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        })
    }

    let project_path = env_path("LOOM_AGENT_PROJECT_PATH").or_else(|| agent_cfg.project_path.clone());
    let user_path = env_path("LOOM_AGENT_USER_PATH").or_else(|| agent_cfg.user_path.clone());

    let plugin_paths = std::env::var("LOOM_AGENT_PLUGIN_PATHS")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| s.split(':').filter(|p| !p.is_empty()).map(PathBuf::from).collect())
        .unwrap_or_else(|| agent_cfg.plugin_paths.clone());

    let search_order_names: Vec<String> = std::env::var("LOOM_AGENT_SEARCH_ORDER")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| s.split(',').map(|p| p.trim().to_string()).collect())
        .unwrap_or_else(|| agent_cfg.search_order.clone());
    let search_order = SearchOrder::from_names(search_order_names);

    let skip_missing = env_bool("LOOM_AGENT_SKIP_MISSING").unwrap_or(agent_cfg.skip_missing);

    (
        plugin_paths,
        search_order,
        DiscoveryOverrides {
            project_path,
            user_path,
            skip_missing,
        },
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────
