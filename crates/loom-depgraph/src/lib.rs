// SPDX-License-Identifier: Apache-2.0
//! Semantic version constraints and dependency-graph resolution for
//! sub-agents (`name` depends on `name`).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use semver::Version;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DepGraphError {
    #[error("invalid version string: {0}")]
    InvalidVersion(String),
    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),
    #[error("dependency cycle detected: {0:?}")]
    Cycle(Vec<String>),
}

pub type Result<T> = std::result::Result<T, DepGraphError>;

// ─── Version constraints ──────────────────────────────────────────────────────

/// A single version constraint, e.g. `^1.2.3`, `~1.2.3`, `>=1.2.3`, `1.0-2.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Exact(Version),
    Gt(Version),
    Ge(Version),
    Lt(Version),
    Le(Version),
    /// `^X.Y.Z` ≡ `>=X.Y.Z <(X+1).0.0`
    Caret(Version),
    /// `~X.Y.Z` ≡ `>=X.Y.Z <X.(Y+1).0`
    Tilde(Version),
    /// `A-B` ≡ `>=A <=B`
    Range(Version, Version),
}

impl Constraint {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("==") {
            return Ok(Constraint::Exact(parse_version(rest)?));
        }
        if let Some(rest) = s.strip_prefix(">=") {
            return Ok(Constraint::Ge(parse_version(rest)?));
        }
        if let Some(rest) = s.strip_prefix("<=") {
            return Ok(Constraint::Le(parse_version(rest)?));
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Ok(Constraint::Gt(parse_version(rest)?));
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Ok(Constraint::Lt(parse_version(rest)?));
        }
        if let Some(rest) = s.strip_prefix('^') {
            return Ok(Constraint::Caret(parse_version(rest)?));
        }
        if let Some(rest) = s.strip_prefix('~') {
            return Ok(Constraint::Tilde(parse_version(rest)?));
        }
        if let Some((lo, hi)) = s.split_once('-') {
            // Distinguish a range ("1.0.0-2.0.0") from a prerelease version
            // ("1.0.0-rc.1"): a range's right-hand side must itself parse as
            // a bare version.
            if let (Ok(lo_v), Ok(hi_v)) = (parse_version(lo.trim()), parse_version(hi.trim())) {
                return Ok(Constraint::Range(lo_v, hi_v));
            }
        }
        Ok(Constraint::Exact(parse_version(s)?))
    }

    pub fn matches(&self, v: &Version) -> bool {
        match self {
            Constraint::Exact(e) => v == e,
            Constraint::Gt(b) => v > b,
            Constraint::Ge(b) => v >= b,
            Constraint::Lt(b) => v < b,
            Constraint::Le(b) => v <= b,
            Constraint::Caret(b) => {
                let upper = Version::new(b.major + 1, 0, 0);
                v >= b && v < &upper
            }
            Constraint::Tilde(b) => {
                let upper = Version::new(b.major, b.minor + 1, 0);
                v >= b && v < &upper
            }
            Constraint::Range(lo, hi) => v >= lo && v <= hi,
        }
    }
}

fn parse_version(s: &str) -> Result<Version> {
    Version::parse(s.trim()).map_err(|_| DepGraphError::InvalidVersion(s.to_string()))
}

// ─── Dependency graph ──────────────────────────────────────────────────────────

/// A directed dependency graph over sub-agent names. An edge `from -> to`
/// means `from` depends on `to`.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    vertices: BTreeSet<String>,
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, name: impl Into<String>) {
        self.vertices.insert(name.into());
    }

    /// `from` depends on `to`.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) {
        let from = from.into();
        let to = to.into();
        self.vertices.insert(from.clone());
        self.vertices.insert(to.clone());
        self.edges.entry(from).or_default().insert(to);
    }

    fn deps_of(&self, name: &str) -> impl Iterator<Item = &String> {
        self.edges.get(name).into_iter().flatten()
    }

    /// Topologically sort all vertices, dependency-first (a vertex appears
    /// after everything it depends on). Ties are broken lexicographically for
    /// determinism. Returns the cycle's participants as an error if the graph
    /// is not acyclic.
    pub fn topo_sort(&self) -> Result<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut mark: HashMap<&str, Mark> = self
            .vertices
            .iter()
            .map(|v| (v.as_str(), Mark::Unvisited))
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(self.vertices.len());

        // Iterative DFS with an explicit stack so large graphs cannot blow
        // the call stack; each stack frame tracks which child to visit next.
        for start in &self.vertices {
            if mark[start.as_str()] != Mark::Unvisited {
                continue;
            }
            let mut stack: Vec<(String, usize)> = vec![(start.clone(), 0)];
            mark.insert(start.as_str(), Mark::InProgress);

            'outer: while let Some((node, child_idx)) = stack.last().cloned() {
                let children: Vec<&String> = self.deps_of(&node).collect();
                for (i, child) in children.iter().enumerate().skip(child_idx) {
                    match mark.get(child.as_str()).copied().unwrap_or(Mark::Unvisited) {
                        Mark::Unvisited => {
                            mark.insert(self.vertices.get(child.as_str()).unwrap().as_str(), Mark::InProgress);
                            stack.last_mut().unwrap().1 = i + 1;
                            stack.push(((*child).clone(), 0));
                            continue 'outer;
                        }
                        Mark::InProgress => {
                            let cycle = extract_cycle(&stack, child);
                            return Err(DepGraphError::Cycle(cycle));
                        }
                        Mark::Done => {}
                    }
                }
                // All children done.
                let (node, _) = stack.pop().unwrap();
                mark.insert(self.vertices.get(node.as_str()).unwrap().as_str(), Mark::Done);
                order.push(node);
            }
        }

        Ok(order)
    }

    /// Resolve the topological order of `target` and its transitive
    /// dependencies only (not the whole graph).
    pub fn resolve(&self, target: &str) -> Result<Vec<String>> {
        let mut sub = DependencyGraph::new();
        let mut stack = vec![target.to_string()];
        let mut seen = BTreeSet::new();
        while let Some(n) = stack.pop() {
            if !seen.insert(n.clone()) {
                continue;
            }
            sub.add_vertex(n.clone());
            for dep in self.deps_of(&n) {
                sub.add_edge(n.clone(), dep.clone());
                stack.push(dep.clone());
            }
        }
        sub.topo_sort()
    }
}

fn extract_cycle(stack: &[(String, usize)], closing: &str) -> Vec<String> {
    let start = stack
        .iter()
        .position(|(n, _)| n == closing)
        .unwrap_or(0);
    let mut cycle: Vec<String> = stack[start..].iter().map(|(n, _)| n.clone()).collect();
    cycle.push(closing.to_string());
    cycle
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
