//! Dependency graph over plan tasks: edges, cycle detection, wave layering.
//!
//! An edge A → B (B runs after A) exists when any of:
//!   1. something A creates is something B needs,
//!   2. B's `depends_on` names A's id,
//!   3. a glob in A's allowed scope may overlap B's forbidden scope.
//!
//! Allowed/allowed overlap between two tasks is left to the runtime claim
//! index: serializing every pair of tasks that share a writable subtree
//! would collapse most plans to one lane, and the claim index already
//! guarantees no concurrent writes. Glob overlap is judged conservatively
//! on literal prefixes; when uncertain, overlap is assumed.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::domain::error::{AidfError, AidfResult, ConfigCode};
use crate::domain::models::task::TaskSpec;

/// One plan task plus its scheduling metadata.
#[derive(Debug, Clone)]
pub struct TaskNode {
    /// Task file path as the plan references it.
    pub path: String,
    pub spec: TaskSpec,
    /// `wave:` from the plan entry or frontmatter.
    pub explicit_wave: Option<u32>,
    /// Dependency ids from the plan entry and frontmatter, merged.
    pub depends: Vec<String>,
}

/// Nodes with computed wave numbers (1-based).
#[derive(Debug)]
pub struct ScheduledGraph {
    pub nodes: Vec<TaskNode>,
    /// Parallel to `nodes`.
    pub waves: Vec<u32>,
}

impl ScheduledGraph {
    pub fn wave_count(&self) -> u32 {
        self.waves.iter().copied().max().unwrap_or(0)
    }

    /// Indexes of the nodes scheduled for `wave`.
    pub fn tasks_in_wave(&self, wave: u32) -> Vec<usize> {
        self.waves
            .iter()
            .enumerate()
            .filter(|(_, w)| **w == wave)
            .map(|(i, _)| i)
            .collect()
    }
}

/// The literal prefix of a glob, up to the first metacharacter.
fn glob_literal_prefix(pattern: &str) -> &str {
    let end = pattern
        .find(['*', '?', '[', '{'])
        .unwrap_or(pattern.len());
    &pattern[..end]
}

/// Conservative: two patterns may overlap when one literal prefix extends
/// the other.
pub fn patterns_may_overlap(a: &str, b: &str) -> bool {
    let pa = glob_literal_prefix(a);
    let pb = glob_literal_prefix(b);
    pa.starts_with(pb) || pb.starts_with(pa)
}

fn scopes_conflict(a: &TaskSpec, b: &TaskSpec) -> bool {
    // A writes where B is forbidden to write (or vice versa): order them.
    let forbidden_hit = |writer: &TaskSpec, other: &TaskSpec| {
        writer.scope().allowed.iter().any(|wa| {
            other
                .scope()
                .forbidden
                .iter()
                .any(|of| patterns_may_overlap(wa, of))
        })
    };
    forbidden_hit(a, b) || forbidden_hit(b, a)
}

/// Build the graph and assign waves by longest-path layering.
pub fn schedule(nodes: Vec<TaskNode>) -> AidfResult<ScheduledGraph> {
    let id_to_index: HashMap<String, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.spec.id.clone(), i))
        .collect();

    // preds[b] = set of a where a must run before b.
    let mut preds: Vec<HashSet<usize>> = vec![HashSet::new(); nodes.len()];

    for (b, node) in nodes.iter().enumerate() {
        for dep in &node.depends {
            if let Some(&a) = id_to_index.get(dep) {
                if a != b {
                    preds[b].insert(a);
                }
            }
        }
    }

    for a in 0..nodes.len() {
        for b in 0..nodes.len() {
            if a == b {
                continue;
            }
            let creates_needed = nodes[a]
                .spec
                .creates
                .iter()
                .any(|c| nodes[b].spec.needs.contains(c));
            if creates_needed {
                preds[b].insert(a);
            }
        }
    }

    // Scope conflicts are symmetric; serialize in plan order.
    for a in 0..nodes.len() {
        for b in (a + 1)..nodes.len() {
            if preds[b].contains(&a) || preds[a].contains(&b) {
                continue;
            }
            if scopes_conflict(&nodes[a].spec, &nodes[b].spec) {
                preds[b].insert(a);
            }
        }
    }

    if let Some(cycle) = find_cycle(&nodes, &preds) {
        let names: Vec<&str> = cycle.iter().map(|&i| nodes[i].spec.id.as_str()).collect();
        return Err(AidfError::config(
            ConfigCode::Invalid,
            format!("dependency cycle between tasks: {}", names.join(" -> ")),
        ));
    }

    // Longest-path layering: wave = 1 + max wave of predecessors.
    let mut waves = vec![0u32; nodes.len()];
    fn wave_of(i: usize, preds: &[HashSet<usize>], waves: &mut Vec<u32>) -> u32 {
        if waves[i] != 0 {
            return waves[i];
        }
        let max_pred = preds[i]
            .iter()
            .map(|&p| wave_of(p, preds, waves))
            .max()
            .unwrap_or(0);
        waves[i] = max_pred + 1;
        waves[i]
    }
    for i in 0..nodes.len() {
        wave_of(i, &preds, &mut waves);
    }

    // Explicit declarations override, but a wave earlier than a
    // predecessor's is suspect.
    for (i, node) in nodes.iter().enumerate() {
        if let Some(explicit) = node.explicit_wave {
            if explicit < waves[i] {
                warn!(
                    task = %node.spec.id,
                    declared = explicit,
                    computed = waves[i],
                    "explicit wave is earlier than the computed wave; using the declaration"
                );
            }
            waves[i] = explicit.max(1);
        }
    }

    Ok(ScheduledGraph { nodes, waves })
}

/// DFS cycle detection over the predecessor sets; returns the cycle path.
fn find_cycle(nodes: &[TaskNode], preds: &[HashSet<usize>]) -> Option<Vec<usize>> {
    fn visit(
        node: usize,
        preds: &[HashSet<usize>],
        visited: &mut HashSet<usize>,
        stack: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> bool {
        visited.insert(node);
        stack.insert(node);
        path.push(node);

        for &next in &preds[node] {
            if !visited.contains(&next) {
                if visit(next, preds, visited, stack, path) {
                    return true;
                }
            } else if stack.contains(&next) {
                if let Some(start) = path.iter().position(|&p| p == next) {
                    path.drain(..start);
                }
                return true;
            }
        }

        stack.remove(&node);
        path.pop();
        false
    }

    let mut visited = HashSet::new();
    let mut stack = HashSet::new();
    let mut path = Vec::new();
    for i in 0..nodes.len() {
        if !visited.contains(&i) && visit(i, preds, &mut visited, &mut stack, &mut path) {
            return Some(path);
        }
    }
    None
}
