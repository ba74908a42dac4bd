//! Loads the `.ai/` project tree into an immutable context bundle.
//!
//! Discovery walks upward from the working directory until it finds a
//! directory containing `.ai/AGENTS.md` or `.ai/config.yml`; the first hit
//! is the project root. Monorepo sub-packages may carry their own `.ai/`
//! tree — there is no merging across levels.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use globset::Glob;
use tracing::{debug, warn};

use crate::domain::error::{AidfError, AidfResult, ConfigCode};
use crate::domain::models::context::{
    estimate_tokens, ContextBreakdown, LoadedContext, Role, Skill, SkillFrontmatter,
};
use crate::domain::models::plan::Plan;
use crate::domain::models::task::{self, TaskFileState, TaskSpec};

/// Entry in the task index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIndexEntry {
    pub state: TaskFileState,
    pub file_path: PathBuf,
}

/// Options for one load.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Prior-wave summaries to inject, newest last.
    pub previous_summaries: Vec<String>,
}

/// Walk upward from `start` to the nearest directory holding an `.ai/` tree.
pub fn discover_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start.to_path_buf());
    while let Some(current) = dir {
        let ai = current.join(".ai");
        if ai.join("AGENTS.md").is_file() || ai.join("config.yml").is_file() {
            return Some(current);
        }
        dir = current.parent().map(Path::to_path_buf);
    }
    None
}

/// Reads the `.ai/` tree for one project root.
#[derive(Debug)]
pub struct ContextLoader {
    project_root: PathBuf,
    ai_root: PathBuf,
}

impl ContextLoader {
    pub fn new(project_root: impl Into<PathBuf>) -> AidfResult<Self> {
        let project_root = project_root.into();
        let ai_root = project_root.join(".ai");
        if !ai_root.is_dir() {
            return Err(AidfError::config(
                ConfigCode::Missing,
                format!("no .ai directory under {}", project_root.display()),
            ));
        }
        Ok(Self {
            project_root,
            ai_root,
        })
    }

    /// Discover the project root from `cwd` and build a loader for it.
    pub fn discover(cwd: &Path) -> AidfResult<Self> {
        let root = discover_project_root(cwd).ok_or_else(|| {
            AidfError::config(
                ConfigCode::Missing,
                format!(
                    "no .ai/AGENTS.md or .ai/config.yml found walking up from {}",
                    cwd.display()
                ),
            )
        })?;
        Self::new(root)
    }

    pub fn ai_root(&self) -> &Path {
        &self.ai_root
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Load the full context bundle for one task file.
    pub fn load_context(&self, task_path: &Path, opts: &LoadOptions) -> AidfResult<LoadedContext> {
        let task = self.load_task(task_path)?;

        let agents = self.read_optional(&self.ai_root.join("AGENTS.md"));
        let role = self.load_role(&task);
        let plan = self.load_active_plan();
        let skills = self.load_matching_skills(&task);
        let state = self.read_optional(&self.ai_root.join("STATE.md"));
        let research = self.load_matching_research(&task);

        let breakdown = ContextBreakdown {
            agents: agents.as_deref().map_or(0, estimate_tokens),
            role: role.as_ref().map_or(0, |r| estimate_tokens(&r.content)),
            task: estimate_tokens(&task.raw),
            plan: plan.as_ref().map_or(0, |p| estimate_tokens(&p.raw)),
            skills: skills.iter().map(|s| estimate_tokens(&s.body)).sum(),
            state: state.as_deref().map_or(0, estimate_tokens),
            previous_results: opts
                .previous_summaries
                .iter()
                .map(|s| estimate_tokens(s))
                .sum(),
            research: research.iter().map(|r| estimate_tokens(r)).sum(),
        };

        debug!(
            task_id = %task.id,
            estimated_tokens = breakdown.total(),
            skills = skills.len(),
            "context bundle loaded"
        );

        Ok(LoadedContext {
            agents,
            role,
            task,
            plan,
            skills,
            state,
            previous_results: opts.previous_summaries.clone(),
            research,
            breakdown,
        })
    }

    /// Read and parse one task file.
    pub fn load_task(&self, task_path: &Path) -> AidfResult<TaskSpec> {
        let resolved = self.resolve(task_path);
        let content = fs::read_to_string(&resolved).map_err(|e| {
            AidfError::config(
                ConfigCode::Missing,
                format!("task file {} could not be read: {e}", resolved.display()),
            )
        })?;
        TaskSpec::parse(&content, &resolved)
    }

    /// Read and parse one plan file.
    pub fn load_plan(&self, plan_path: &Path) -> AidfResult<Plan> {
        let resolved = self.resolve(plan_path);
        let content = fs::read_to_string(&resolved).map_err(|e| {
            AidfError::config(
                ConfigCode::Missing,
                format!("plan file {} could not be read: {e}", resolved.display()),
            )
        })?;
        Plan::parse(&content, &resolved)
    }

    /// Scan every task directory into `taskId → {state, filePath}`.
    pub fn load_task_index(&self) -> AidfResult<BTreeMap<String, TaskIndexEntry>> {
        let mut index = BTreeMap::new();
        for state in TaskFileState::ALL {
            let dir = self.ai_root.join("tasks").join(state.dir_name());
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let id = match fs::read_to_string(&path)
                    .ok()
                    .and_then(|content| TaskSpec::parse(&content, &path).ok())
                {
                    Some(task) => task.id,
                    None => {
                        warn!(file = %path.display(), "skipping unparseable task file in index");
                        continue;
                    }
                };
                index.insert(
                    id,
                    TaskIndexEntry {
                        state,
                        file_path: path,
                    },
                );
            }
        }
        Ok(index)
    }

    /// Summaries from prior runs, for `previousResults` injection.
    pub fn load_summaries(&self) -> Vec<String> {
        let dir = self.ai_root.join("summaries");
        let mut files: Vec<PathBuf> = fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(".summary.md"))
            })
            .collect();
        files.sort();
        files
            .iter()
            .filter_map(|p| fs::read_to_string(p).ok())
            .collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        // Accept paths relative to the project root, the `.ai/` root, or cwd.
        let from_root = self.project_root.join(path);
        if from_root.exists() {
            return from_root;
        }
        let from_ai = self.ai_root.join(path);
        if from_ai.exists() {
            return from_ai;
        }
        from_root
    }

    fn read_optional(&self, path: &Path) -> Option<String> {
        fs::read_to_string(path).ok().filter(|s| !s.trim().is_empty())
    }

    fn load_role(&self, task: &TaskSpec) -> Option<Role> {
        let name = task.frontmatter.roles.first()?;
        let path = self.ai_root.join("roles").join(format!("{name}.md"));
        let content = self.read_optional(&path)?;
        Some(Role {
            name: name.clone(),
            content,
        })
    }

    /// The plan whose frontmatter says `status: active`, else the
    /// lexicographically newest plan file.
    fn load_active_plan(&self) -> Option<Plan> {
        let dir = self.ai_root.join("plans");
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("md"))
            .collect();
        paths.sort();

        let mut newest = None;
        for path in &paths {
            let Ok(content) = fs::read_to_string(path) else {
                continue;
            };
            let Ok(plan) = Plan::parse(&content, path) else {
                warn!(file = %path.display(), "skipping unparseable plan file");
                continue;
            };
            if plan.frontmatter.status.as_deref() == Some("active") {
                return Some(plan);
            }
            newest = Some(plan);
        }
        newest
    }

    /// Skills are relevant when a tag appears in the task text or one of
    /// their globs matches a declared `creates`/`needs` path.
    fn load_matching_skills(&self, task: &TaskSpec) -> Vec<Skill> {
        let match_text = task.match_text().to_lowercase();
        let task_paths: Vec<&String> = task.creates.iter().chain(task.needs.iter()).collect();
        let mut skills = Vec::new();

        let dir = self.ai_root.join("skills");
        let Ok(entries) = fs::read_dir(&dir) else {
            return skills;
        };
        let mut skill_dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        skill_dirs.sort();

        for skill_dir in skill_dirs {
            let path = skill_dir.join("SKILL.md");
            let Some(content) = self.read_optional(&path) else {
                continue;
            };
            let dir_name = skill_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let Some(skill) = parse_skill(&content, &dir_name) else {
                warn!(file = %path.display(), "skipping unparseable skill file");
                continue;
            };

            let tag_match = skill
                .tags
                .iter()
                .any(|t| match_text.contains(&t.to_lowercase()));
            let glob_match = skill.globs.iter().any(|pattern| {
                Glob::new(pattern).is_ok_and(|g| {
                    let matcher = g.compile_matcher();
                    task_paths.iter().any(|p| matcher.is_match(p.as_str()))
                })
            });

            if tag_match || glob_match {
                skills.push(skill);
            }
        }
        skills
    }

    /// `research/<topic>-findings.md` is relevant when its topic appears in
    /// the task text.
    fn load_matching_research(&self, task: &TaskSpec) -> Vec<String> {
        let match_text = task.match_text().to_lowercase();
        let dir = self.ai_root.join("research");
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|e| e.path())
            .collect();
        paths.sort();

        paths
            .iter()
            .filter_map(|p| {
                let name = p.file_name()?.to_str()?;
                let topic = name.strip_suffix("-findings.md")?;
                if match_text.contains(&topic.to_lowercase().replace('-', " "))
                    || match_text.contains(&topic.to_lowercase())
                {
                    fs::read_to_string(p).ok()
                } else {
                    None
                }
            })
            .collect()
    }
}

fn parse_skill(content: &str, dir_name: &str) -> Option<Skill> {
    let (frontmatter, body) = match task::split_frontmatter(content) {
        Some((fm_text, body)) => {
            let fm: SkillFrontmatter = serde_yaml::from_str(fm_text).ok()?;
            (fm, body)
        }
        None => (SkillFrontmatter::default(), content),
    };
    Some(Skill {
        name: frontmatter.name.unwrap_or_else(|| dir_name.to_string()),
        description: frontmatter.description.unwrap_or_default(),
        tags: frontmatter.tags,
        globs: frontmatter.globs,
        body: body.trim().to_string(),
    })
}
