//! Task files: frontmatter, scope, and the body sections the executor
//! feeds to the provider.
//!
//! Two on-disk forms parse: the YAML-frontmatter form (preferred) and the
//! legacy section-only form, which still parses but logs a deprecation
//! warning.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::error::{AidfError, AidfResult, ConfigCode};

/// Where a task file lives inside `.ai/tasks/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskFileState {
    Pending,
    Completed,
    Blocked,
    Failed,
}

impl TaskFileState {
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }

    pub const ALL: [Self; 4] = [Self::Pending, Self::Completed, Self::Blocked, Self::Failed];
}

/// Kind of change the provider reported for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

/// One observed file change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
}

impl FileChange {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn modified(path: impl Into<String>) -> Self {
        Self::new(path, ChangeKind::Modified)
    }
}

/// File-pattern scope a task is allowed to touch.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskScope {
    #[serde(default)]
    pub allowed: Vec<String>,

    #[serde(default)]
    pub forbidden: Vec<String>,

    #[serde(default)]
    pub ask_before: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<String>>,

    /// Patterns from the implicit-forbidden list this task may touch anyway.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_implicit_forbidden: Vec<String>,
}

/// YAML frontmatter of a task file. Flat scalars, simple lists, and one
/// level of nesting for `scope`; anything else is rejected by serde with
/// location info.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct TaskFrontmatter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    #[serde(default)]
    pub scope: TaskScope,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    /// Explicit wave override for plan scheduling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave: Option<u32>,
}

/// Fully parsed task file.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub id: String,
    pub title: String,
    pub frontmatter: TaskFrontmatter,
    pub goal: String,
    pub requirements: String,
    pub definition_of_done: String,
    /// Paths this task declares it produces.
    pub creates: Vec<String>,
    /// Paths this task declares it consumes.
    pub needs: Vec<String>,
    pub research_context: Option<String>,
    /// Body sections keyed by heading, in document order is not preserved;
    /// used for passthrough rendering of unrecognized sections.
    pub extra_sections: BTreeMap<String, String>,
    /// Raw markdown of the whole file as read.
    pub raw: String,
    /// Whether the file used the legacy section-only form.
    pub legacy: bool,
}

impl TaskSpec {
    /// Parse a task file's contents. `source` names the file in errors.
    pub fn parse(content: &str, source: &Path) -> AidfResult<Self> {
        let (frontmatter, body, legacy) = match split_frontmatter(content) {
            Some((fm_text, body)) => {
                let fm: TaskFrontmatter = serde_yaml::from_str(fm_text).map_err(|e| {
                    let location = e
                        .location()
                        .map(|l| format!("line {}, column {}", l.line(), l.column()))
                        .unwrap_or_else(|| "unknown location".to_string());
                    AidfError::config(
                        ConfigCode::ParseError,
                        format!("malformed frontmatter in {}: {e}", source.display()),
                    )
                    .with_context("location", location)
                    .with_context("file", source.display().to_string())
                })?;
                (fm, body, false)
            }
            None => {
                warn!(
                    file = %source.display(),
                    "task file has no YAML frontmatter; the legacy section-only form is deprecated"
                );
                (TaskFrontmatter::default(), content, true)
            }
        };

        let sections = split_sections(body);
        let goal = sections.get("Goal").cloned().unwrap_or_default();
        let requirements = sections.get("Requirements").cloned().unwrap_or_default();
        let definition_of_done = sections
            .get("Definition of Done")
            .cloned()
            .unwrap_or_default();
        let creates = sections
            .get("Creates")
            .map(|s| parse_path_list(s))
            .unwrap_or_default();
        let needs = sections
            .get("Needs")
            .map(|s| parse_path_list(s))
            .unwrap_or_default();
        let research_context = sections.get("Research Context").cloned();

        let known = [
            "Goal",
            "Requirements",
            "Definition of Done",
            "Creates",
            "Needs",
            "Research Context",
        ];
        let extra_sections: BTreeMap<String, String> = sections
            .iter()
            .filter(|(k, _)| !known.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let id = frontmatter
            .id
            .clone()
            .or_else(|| id_from_filename(source))
            .ok_or_else(|| {
                AidfError::config(
                    ConfigCode::ParseError,
                    format!("task {} has no id (frontmatter or filename)", source.display()),
                )
            })?;
        let title = frontmatter
            .title
            .clone()
            .or_else(|| title_from_body(body))
            .unwrap_or_else(|| id.clone());

        Ok(Self {
            id,
            title,
            frontmatter,
            goal,
            requirements,
            definition_of_done,
            creates,
            needs,
            research_context,
            extra_sections,
            raw: content.to_string(),
            legacy,
        })
    }

    /// Render the frontmatter + body back to markdown. Round-trips through
    /// [`TaskSpec::parse`] modulo whitespace normalization.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        if !self.legacy {
            let fm = serde_yaml::to_string(&self.frontmatter).unwrap_or_default();
            out.push_str("---\n");
            out.push_str(&fm);
            out.push_str("---\n\n");
        }
        out.push_str(&format!("# {}\n", self.title));
        push_section(&mut out, "Goal", &self.goal);
        push_section(&mut out, "Requirements", &self.requirements);
        push_section(&mut out, "Definition of Done", &self.definition_of_done);
        if !self.creates.is_empty() {
            push_section(&mut out, "Creates", &render_path_list(&self.creates));
        }
        if !self.needs.is_empty() {
            push_section(&mut out, "Needs", &render_path_list(&self.needs));
        }
        if let Some(rc) = &self.research_context {
            push_section(&mut out, "Research Context", rc);
        }
        for (heading, text) in &self.extra_sections {
            push_section(&mut out, heading, text);
        }
        out
    }

    pub fn scope(&self) -> &TaskScope {
        &self.frontmatter.scope
    }

    pub fn depends_on(&self) -> &[String] {
        &self.frontmatter.depends_on
    }

    /// Goal + requirements + title, used for skill relevance matching.
    pub fn match_text(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.goal, self.requirements)
    }
}

fn push_section(out: &mut String, heading: &str, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    out.push_str(&format!("\n## {heading}\n\n{}\n", text.trim_end()));
}

/// Split `---\n...\n---` frontmatter off the top of a document.
pub(crate) fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let fm = &rest[..end + 1];
    let mut body = &rest[end + 4..];
    if let Some(stripped) = body.strip_prefix('\n') {
        body = stripped;
    }
    Some((fm, body))
}

/// Split a markdown body into `## ` sections; text before the first section
/// heading is discarded (it is the `# Title` block).
fn split_sections(body: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            if let Some((name, lines)) = current.take() {
                sections.insert(name, lines.join("\n").trim().to_string());
            }
            current = Some((heading.trim().to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    if let Some((name, lines)) = current.take() {
        sections.insert(name, lines.join("\n").trim().to_string());
    }
    sections
}

fn parse_path_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            line.strip_prefix("- ").or_else(|| line.strip_prefix("* "))
        })
        .map(|p| p.trim().trim_matches('`').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn render_path_list(paths: &[String]) -> String {
    paths
        .iter()
        .map(|p| format!("- `{p}`"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `042-add-cache.md` → `042-add-cache`; the id convention is
/// `<id>-<slug>`, so the whole stem works as a stable identifier.
fn id_from_filename(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}

fn title_from_body(body: &str) -> Option<String> {
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|t| t.trim().to_string())
}
