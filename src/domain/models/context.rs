//! The in-memory context bundle assembled from a project's `.ai/` tree.

use serde::{Deserialize, Serialize};

use super::plan::Plan;
use super::task::TaskSpec;

/// chars / 4 heuristic shared by every size estimate in the crate.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// A role definition from `.ai/roles/<name>.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub name: String,
    /// Identity, expertise, constraints — raw markdown.
    pub content: String,
}

/// Frontmatter of a `SKILL.md`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct SkillFrontmatter {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Path globs the skill applies to, matched against the task scope.
    #[serde(default)]
    pub globs: Vec<String>,
}

/// A loaded skill.
#[derive(Debug, Clone, PartialEq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub globs: Vec<String>,
    pub body: String,
}

/// Per-layer token estimate of the bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ContextBreakdown {
    pub agents: usize,
    pub role: usize,
    pub task: usize,
    pub plan: usize,
    pub skills: usize,
    pub state: usize,
    pub previous_results: usize,
    pub research: usize,
}

impl ContextBreakdown {
    pub fn total(&self) -> usize {
        self.agents
            + self.role
            + self.task
            + self.plan
            + self.skills
            + self.state
            + self.previous_results
            + self.research
    }
}

/// Immutable bundle per task; created by preflight, read-only afterwards.
#[derive(Debug, Clone)]
pub struct LoadedContext {
    /// Project overview text from `AGENTS.md`.
    pub agents: Option<String>,
    pub role: Option<Role>,
    pub task: TaskSpec,
    pub plan: Option<Plan>,
    pub skills: Vec<Skill>,
    /// Persistent project state from `STATE.md`.
    pub state: Option<String>,
    /// Prior-wave task summaries, newest last.
    pub previous_results: Vec<String>,
    /// Research notes matched to the task.
    pub research: Vec<String>,
    pub breakdown: ContextBreakdown,
}

impl LoadedContext {
    pub fn estimated_tokens(&self) -> usize {
        self.breakdown.total()
    }

    /// Render the full first-iteration prompt: system seed + role + task +
    /// plan + skills + state + research + previous-wave summaries.
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::new();

        if let Some(agents) = &self.agents {
            prompt.push_str("# Project\n\n");
            prompt.push_str(agents);
            prompt.push_str("\n\n");
        }
        if let Some(role) = &self.role {
            prompt.push_str(&format!("# Role: {}\n\n{}\n\n", role.name, role.content));
        }

        prompt.push_str(&format!("# Task: {}\n\n", self.task.title));
        prompt.push_str(&format!("## Goal\n\n{}\n\n", self.task.goal));
        if !self.task.requirements.is_empty() {
            prompt.push_str(&format!("## Requirements\n\n{}\n\n", self.task.requirements));
        }
        if !self.task.definition_of_done.is_empty() {
            prompt.push_str(&format!(
                "## Definition of Done\n\n{}\n\n",
                self.task.definition_of_done
            ));
        }
        if let Some(constraints) = &self.task.frontmatter.scope.constraints {
            prompt.push_str("## Constraints\n\n");
            for c in constraints {
                prompt.push_str(&format!("- {c}\n"));
            }
            prompt.push('\n');
        }

        if let Some(plan) = &self.plan {
            if let Some(title) = &plan.frontmatter.title {
                prompt.push_str(&format!("# Plan: {title}\n\n"));
                for phase in &plan.frontmatter.phases {
                    prompt.push_str(&format!("- {} ({} tasks)\n", phase.name, phase.tasks.len()));
                }
                prompt.push('\n');
            }
        }

        for skill in &self.skills {
            prompt.push_str(&format!("# Skill: {}\n\n{}\n\n", skill.name, skill.body));
        }

        if let Some(state) = &self.state {
            prompt.push_str("# Project State\n\n");
            prompt.push_str(state);
            prompt.push_str("\n\n");
        }

        for research in &self.research {
            prompt.push_str("# Research\n\n");
            prompt.push_str(research);
            prompt.push_str("\n\n");
        }

        for summary in &self.previous_results {
            prompt.push_str("# Previous Wave\n\n");
            prompt.push_str(summary);
            prompt.push_str("\n\n");
        }

        prompt.push_str(
            "When the task is fully done, output <TASK_COMPLETE>. \
             If you cannot proceed, output <TASK_BLOCKED: reason>.\n",
        );
        prompt
    }
}
