// SPDX-License-Identifier: Apache-2.0
//! Sub-agent discovery and validation.
//!
//! A sub-agent is a markdown file with YAML frontmatter declaring `name`
//! (kebab-case, unique) and `description` (10–1024 chars, used by the
//! running agent to decide when to delegate). The body becomes the
//! sub-agent's system prompt.
//!
//! ## Sources and precedence
//!
//! Four sources are scanned, in the order given by `search_order`
//! (default `[project, user, plugin, cli]`; earlier entries win on a
//! `name` collision):
//!
//! - `project`: `.adk/agents/` at the nearest ancestor of the workspace
//!   root that contains one, unless [`DiscoveryOverrides::project_path`] names
//!   an explicit directory.
//! - `user`: `~/.adk/agents/`, unless [`DiscoveryOverrides::user_path`] names
//!   an explicit directory.
//! - `plugin`: a configurable list of extra directories.
//! - `cli`: sub-agents registered at runtime (e.g. `--agent` flags),
//!   never read from disk.
//!
//! Files that fail frontmatter validation are skipped with a logged
//! warning rather than aborting discovery.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use loom_depgraph::DependencyGraph;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::shared::Shared;

pub const MAX_AGENT_FILE_BYTES: u64 = 256 * 1024;
const MIN_DESCRIPTION_LEN: usize = 10;
const MAX_DESCRIPTION_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid agent definition in {path}: {reason}")]
    InvalidAgent { path: String, reason: String },
    #[error("circular dependency among sub-agents: {0:?}")]
    CircularDependency(Vec<String>),
}

/// Where a sub-agent definition was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentSource {
    Project,
    User,
    Plugin,
    Cli,
}

impl AgentSource {
    fn as_str(self) -> &'static str {
        match self {
            AgentSource::Project => "project",
            AgentSource::User => "user",
            AgentSource::Plugin => "plugin",
            AgentSource::Cli => "cli",
        }
    }
}

/// Order in which sources are scanned; earlier entries win dedup.
#[derive(Debug, Clone)]
pub struct SearchOrder(pub Vec<AgentSource>);

impl Default for SearchOrder {
    fn default() -> Self {
        Self(vec![
            AgentSource::Project,
            AgentSource::User,
            AgentSource::Plugin,
            AgentSource::Cli,
        ])
    }
}

impl SearchOrder {
    /// Parse a list of `project`/`user`/`plugin` names (any order, duplicates
    /// and unknown names ignored) into a `SearchOrder`. `cli` is always
    /// appended last regardless of input, since sub-agents registered at
    /// runtime aren't part of the configurable precedence.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sources = Vec::new();
        for name in names {
            let source = match name.as_ref().trim() {
                "project" => Some(AgentSource::Project),
                "user" => Some(AgentSource::User),
                "plugin" => Some(AgentSource::Plugin),
                _ => None,
            };
            if let Some(s) = source {
                if !sources.contains(&s) {
                    sources.push(s);
                }
            }
        }
        sources.push(AgentSource::Cli);
        Self(sources)
    }
}

/// Explicit overrides for the default discovery locations, sourced from
/// config/env. `None`/empty fields fall back to the built-in defaults
/// (`discover_agents`'s ancestor search, `~/.adk/agents/`, no plugin dirs).
#[derive(Debug, Clone)]
pub struct DiscoveryOverrides {
    pub project_path: Option<PathBuf>,
    pub user_path: Option<PathBuf>,
    /// If `false`, an explicitly configured `project_path`/`user_path` that
    /// doesn't exist on disk is an error instead of being silently skipped.
    pub skip_missing: bool,
}

impl Default for DiscoveryOverrides {
    fn default() -> Self {
        Self {
            project_path: None,
            user_path: None,
            skip_missing: true,
        }
    }
}

/// A validated, fully parsed sub-agent definition.
#[derive(Clone, Debug)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    pub version: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub dependencies: Vec<String>,
    /// Instructions that become this sub-agent's system prompt.
    pub content: String,
    pub source: AgentSource,
    pub agent_md_path: Option<PathBuf>,
}

/// A shared, live-refreshable collection of discovered sub-agents.
pub type SharedAgents = Shared<AgentInfo>;

impl Shared<AgentInfo> {
    pub fn refresh(&self, project_root: Option<&Path>, plugin_dirs: &[PathBuf], search_order: &SearchOrder) {
        match discover_agents(project_root, plugin_dirs, search_order) {
            Ok(agents) => self.set(agents),
            Err(e) => warn!(error = %e, "sub-agent discovery failed; keeping previous set"),
        }
    }
}

// ── Frontmatter schema ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
struct AgentFrontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

fn is_kebab_case(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    s.split('-').all(|part| {
        !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    })
}

/// Parse and validate one agent markdown file's contents.
///
/// `label` identifies the source for error messages (a path, or a
/// synthetic label for CLI-registered agents).
fn parse_agent_source(raw: &str, label: &str, source: AgentSource, path: Option<PathBuf>) -> Result<AgentInfo, AgentError> {
    let invalid = |reason: &str| AgentError::InvalidAgent {
        path: label.to_string(),
        reason: reason.to_string(),
    };

    let rest = raw.trim_start_matches('\n');
    let after_open = rest
        .strip_prefix("---")
        .ok_or_else(|| invalid("missing YAML frontmatter"))?;
    let close = after_open
        .find("\n---")
        .ok_or_else(|| invalid("unterminated YAML frontmatter"))?;
    let yaml_block = &after_open[..close];
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: AgentFrontmatter = serde_yaml::from_str(yaml_block)
        .map_err(|e| invalid(&format!("malformed frontmatter: {e}")))?;

    let name = fm.name.ok_or_else(|| invalid("missing required field `name`"))?;
    if !is_kebab_case(&name) {
        return Err(invalid(&format!(
            "`name` must be kebab-case ([a-z0-9]+(-[a-z0-9]+)*), got {name:?}"
        )));
    }

    let description = fm
        .description
        .ok_or_else(|| invalid("missing required field `description`"))?;
    let desc_len = description.trim().chars().count();
    if !(MIN_DESCRIPTION_LEN..=MAX_DESCRIPTION_LEN).contains(&desc_len) {
        return Err(invalid(&format!(
            "`description` must be {MIN_DESCRIPTION_LEN}-{MAX_DESCRIPTION_LEN} chars, got {desc_len}"
        )));
    }

    if let Some(v) = &fm.version {
        semver::Version::parse(v).map_err(|e| invalid(&format!("invalid `version`: {e}")))?;
    }

    if body.trim().is_empty() {
        return Err(invalid("empty body (system prompt)"));
    }

    Ok(AgentInfo {
        name,
        description,
        version: fm.version,
        author: fm.author,
        tags: fm.tags,
        dependencies: fm.dependencies,
        content: body,
        source,
        agent_md_path: path,
    })
}

fn try_load_agent(path: &Path, source: AgentSource) -> Option<AgentInfo> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_AGENT_FILE_BYTES {
        warn!(path = %path.display(), size, max = MAX_AGENT_FILE_BYTES, "skipping oversized agent file");
        return None;
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read agent file");
            return None;
        }
    };
    match parse_agent_source(&raw, &path.display().to_string(), source, Some(path.to_path_buf())) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "invalid sub-agent definition — skipping");
            None
        }
    }
}

fn scan_agents_dir(dir: &Path, source: AgentSource) -> Vec<AgentInfo> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()).map(|e| e.eq_ignore_ascii_case("md")).unwrap_or(false))
        .collect();
    files.sort();
    files.into_iter().filter_map(|p| try_load_agent(&p, source)).collect()
}

/// Resolve an explicitly configured discovery directory: `Some(dir)` if it
/// exists, `None` if missing and `skip_missing`, or an error otherwise.
fn require_configured_dir(dir: &Path, skip_missing: bool) -> Result<Option<PathBuf>, AgentError> {
    if dir.is_dir() {
        Ok(Some(dir.to_path_buf()))
    } else if skip_missing {
        Ok(None)
    } else {
        Err(AgentError::InvalidAgent {
            path: dir.display().to_string(),
            reason: "configured sub-agent directory does not exist".into(),
        })
    }
}

/// Nearest ancestor of `start` containing a `.adk/agents/` directory.
fn find_project_agents_dir(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        let candidate = dir.join(".adk").join("agents");
        if candidate.is_dir() {
            return Some(candidate);
        }
        current = dir.parent();
    }
    None
}

/// Discover sub-agents from all four sources and deduplicate by `name`
/// according to `search_order` (first match in order wins).
pub fn discover_agents(
    project_root: Option<&Path>,
    plugin_dirs: &[PathBuf],
    search_order: &SearchOrder,
) -> Result<Vec<AgentInfo>, AgentError> {
    discover_agents_with_overrides(
        project_root,
        plugin_dirs,
        search_order,
        &DiscoveryOverrides::default(),
    )
}

/// Like [`discover_agents`], but `overrides.project_path`/`user_path` replace
/// the ancestor search and `~/.adk/agents/` when set, and `overrides.skip_missing`
/// governs whether a missing *explicit* directory (an override, or an entry
/// in `plugin_dirs`) is an error.
pub fn discover_agents_with_overrides(
    project_root: Option<&Path>,
    plugin_dirs: &[PathBuf],
    search_order: &SearchOrder,
    overrides: &DiscoveryOverrides,
) -> Result<Vec<AgentInfo>, AgentError> {
    let mut by_source: HashMap<AgentSource, Vec<AgentInfo>> = HashMap::new();

    let project_dir = if let Some(explicit) = &overrides.project_path {
        require_configured_dir(explicit, overrides.skip_missing)?
    } else {
        let root = project_root
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::current_dir().ok());
        root.and_then(|r| find_project_agents_dir(&r))
    };
    if let Some(dir) = project_dir {
        by_source.insert(AgentSource::Project, scan_agents_dir(&dir, AgentSource::Project));
    }

    let user_dir = if let Some(explicit) = &overrides.user_path {
        require_configured_dir(explicit, overrides.skip_missing)?
    } else {
        dirs::home_dir().map(|h| h.join(".adk").join("agents"))
    };
    if let Some(dir) = user_dir {
        by_source.insert(AgentSource::User, scan_agents_dir(&dir, AgentSource::User));
    }

    let mut plugin_agents = Vec::new();
    for dir in plugin_dirs {
        if let Some(dir) = require_configured_dir(dir, overrides.skip_missing)? {
            plugin_agents.extend(scan_agents_dir(&dir, AgentSource::Plugin));
        }
    }
    by_source.insert(AgentSource::Plugin, plugin_agents);

    let mut merged: HashMap<String, AgentInfo> = HashMap::new();
    // Reverse iteration: later sources in `search_order` are inserted
    // first and then overwritten by earlier ones, so the earliest source
    // in the configured order wins the final map entry.
    for source in search_order.0.iter().rev() {
        for agent in by_source.remove(source).unwrap_or_default() {
            merged.insert(agent.name.clone(), agent);
        }
    }

    validate_dependency_graph(&merged)?;

    let mut result: Vec<AgentInfo> = merged.into_values().collect();
    result.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(result)
}

/// Register a sub-agent from the CLI source (never read from disk).
pub fn register_cli_agent(raw: &str, label: &str) -> Result<AgentInfo, AgentError> {
    parse_agent_source(raw, label, AgentSource::Cli, None)
}

/// Check that declared `dependencies` reference only known sub-agents and
/// form an acyclic graph.
fn validate_dependency_graph(agents: &HashMap<String, AgentInfo>) -> Result<(), AgentError> {
    let mut graph = DependencyGraph::new();
    for agent in agents.values() {
        graph.add_vertex(agent.name.clone());
        for dep in &agent.dependencies {
            graph.add_edge(agent.name.clone(), dep.clone());
        }
    }
    graph.topo_sort().map_err(|e| match e {
        loom_depgraph::DepGraphError::Cycle(participants) => AgentError::CircularDependency(participants),
        other => AgentError::InvalidAgent {
            path: "<dependency graph>".into(),
            reason: other.to_string(),
        },
    })?;
    Ok(())
}

/// Topological, dependency-first invocation order for `name` and its
/// transitive dependencies.
pub fn resolve_invocation_order(agents: &[AgentInfo], name: &str) -> Result<Vec<String>, AgentError> {
    let mut graph = DependencyGraph::new();
    for agent in agents {
        graph.add_vertex(agent.name.clone());
        for dep in &agent.dependencies {
            graph.add_edge(agent.name.clone(), dep.clone());
        }
    }
    graph.resolve(name).map_err(|e| match e {
        loom_depgraph::DepGraphError::Cycle(participants) => AgentError::CircularDependency(participants),
        other => AgentError::InvalidAgent {
            path: name.to_string(),
            reason: other.to_string(),
        },
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_agent(dir: &Path, filename: &str, frontmatter: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        let content = format!("---\n{frontmatter}---\n\n{body}");
        fs::write(dir.join(filename), content).unwrap();
    }

    #[test]
    fn parse_valid_agent() {
        let raw = "---\nname: security-auditor\ndescription: Security specialist for auth code.\n---\n\nYou audit code.";
        let info = parse_agent_source(raw, "test", AgentSource::Project, None).unwrap();
        assert_eq!(info.name, "security-auditor");
        assert!(info.dependencies.is_empty());
    }

    #[test]
    fn rejects_missing_frontmatter() {
        let raw = "# just a heading\n\nbody";
        let err = parse_agent_source(raw, "test", AgentSource::Project, None).unwrap_err();
        assert!(matches!(err, AgentError::InvalidAgent { .. }));
    }

    #[test]
    fn rejects_non_kebab_case_name() {
        let raw = "---\nname: Security_Auditor\ndescription: Security specialist for auth code.\n---\n\nbody";
        assert!(parse_agent_source(raw, "test", AgentSource::Project, None).is_err());
    }

    #[test]
    fn rejects_short_description() {
        let raw = "---\nname: auditor\ndescription: too short\n---\n\nbody";
        assert!(parse_agent_source(raw, "test", AgentSource::Project, None).is_err());
    }

    #[test]
    fn rejects_missing_name() {
        let raw = "---\ndescription: Security specialist for auth code.\n---\n\nbody";
        assert!(parse_agent_source(raw, "test", AgentSource::Project, None).is_err());
    }

    #[test]
    fn accepts_optional_fields() {
        let raw = "---\nname: auditor\ndescription: Security specialist for auth code.\nversion: 1.2.0\nauthor: me\ntags: [security]\ndependencies: [base-reviewer]\n---\n\nbody";
        let info = parse_agent_source(raw, "test", AgentSource::Project, None).unwrap();
        assert_eq!(info.version.as_deref(), Some("1.2.0"));
        assert_eq!(info.dependencies, vec!["base-reviewer".to_string()]);
    }

    #[test]
    fn rejects_invalid_version() {
        let raw = "---\nname: auditor\ndescription: Security specialist for auth code.\nversion: not-a-version\n---\n\nbody";
        assert!(parse_agent_source(raw, "test", AgentSource::Project, None).is_err());
    }

    #[test]
    fn discover_agents_dedup_prefers_earlier_search_order_source() {
        let tmp = TempDir::new().unwrap();
        let project_root = tmp.path().join("project");
        fs::create_dir_all(&project_root).unwrap();
        write_agent(
            &project_root.join(".adk").join("agents"),
            "auditor.md",
            "name: auditor\ndescription: Project version of the auditor.\n",
            "project body",
        );

        std::env::set_var("HOME", tmp.path().join("home"));
        fs::create_dir_all(tmp.path().join("home")).unwrap();
        write_agent(
            &tmp.path().join("home").join(".adk").join("agents"),
            "auditor.md",
            "name: auditor\ndescription: User version of the auditor.\n",
            "user body",
        );

        let order = SearchOrder::default();
        let agents = discover_agents(Some(&project_root), &[], &order).unwrap();
        assert_eq!(agents.len(), 1);
        assert!(agents[0].description.contains("Project version"));
    }

    #[test]
    fn discover_agents_detects_cycle() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(".adk").join("agents");
        write_agent(&dir, "a.md", "name: a\ndescription: Agent a depends on b agent.\ndependencies: [b]\n", "body a");
        write_agent(&dir, "b.md", "name: b\ndescription: Agent b depends on a agent.\ndependencies: [a]\n", "body b");

        let order = SearchOrder::default();
        let err = discover_agents(Some(tmp.path()), &[], &order).unwrap_err();
        assert!(matches!(err, AgentError::CircularDependency(_)));
    }

    #[test]
    fn resolve_invocation_order_is_dependency_first() {
        let agents = vec![
            AgentInfo {
                name: "app".into(),
                description: "d".into(),
                version: None,
                author: None,
                tags: vec![],
                dependencies: vec!["lib".into()],
                content: "c".into(),
                source: AgentSource::Project,
                agent_md_path: None,
            },
            AgentInfo {
                name: "lib".into(),
                description: "d".into(),
                version: None,
                author: None,
                tags: vec![],
                dependencies: vec![],
                content: "c".into(),
                source: AgentSource::Project,
                agent_md_path: None,
            },
        ];
        let order = resolve_invocation_order(&agents, "app").unwrap();
        assert_eq!(order, vec!["lib".to_string(), "app".to_string()]);
    }

    #[test]
    fn register_cli_agent_does_not_touch_disk() {
        let raw = "---\nname: cli-helper\ndescription: Registered directly from the command line.\n---\n\nbody";
        let info = register_cli_agent(raw, "--agent flag").unwrap();
        assert_eq!(info.source, AgentSource::Cli);
        assert!(info.agent_md_path.is_none());
    }
}
