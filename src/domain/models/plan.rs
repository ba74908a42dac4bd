//! Plan files: waves of task references with optional dependencies.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::{AidfError, AidfResult, ConfigCode};

/// One phase declared in plan frontmatter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PlanPhase {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<String>,
}

/// Plan frontmatter.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct PlanFrontmatter {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub phases: Vec<PlanPhase>,

    #[serde(default)]
    pub created: Option<String>,
}

/// One `- [ ]` entry under `## Tasks`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// Task file path, relative to the plan's `.ai/` root.
    pub task_path: String,
    pub description: String,
    pub completed: bool,
    /// Explicit wave override.
    pub wave: Option<u32>,
    /// Task ids this entry depends on.
    pub depends: Vec<String>,
    /// Zero-based line index in the plan file, for in-place updates.
    pub line: usize,
}

/// Parsed plan document.
#[derive(Debug, Clone)]
pub struct Plan {
    pub frontmatter: PlanFrontmatter,
    pub entries: Vec<PlanEntry>,
    pub raw: String,
}

/// `- [ ] `tasks/pending/042-add-cache.md` — description (wave: 2, depends: 040, 041)`
fn entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*-\s*\[(?P<done>[ xX])\]\s*`(?P<path>[^`]+)`\s*(?:[—–-]+\s*(?P<desc>[^(]*))?(?:\((?P<meta>[^)]*)\))?\s*$")
            .expect("plan entry regex is valid")
    })
}

impl Plan {
    pub fn parse(content: &str, source: &Path) -> AidfResult<Self> {
        let (frontmatter, body) = match super::task::split_frontmatter(content) {
            Some((fm_text, body)) => {
                let fm: PlanFrontmatter = serde_yaml::from_str(fm_text).map_err(|e| {
                    let location = e
                        .location()
                        .map(|l| format!("line {}, column {}", l.line(), l.column()))
                        .unwrap_or_else(|| "unknown location".to_string());
                    AidfError::config(
                        ConfigCode::ParseError,
                        format!("malformed plan frontmatter in {}: {e}", source.display()),
                    )
                    .with_context("location", location)
                })?;
                (fm, body)
            }
            None => (PlanFrontmatter::default(), content),
        };

        // Entries may appear anywhere, but by convention live under `## Tasks`.
        // Line indexes are relative to the whole file so checkbox updates can
        // rewrite in place.
        let body_offset = content.lines().count() - body.lines().count();
        let mut entries = Vec::new();
        for (i, line) in body.lines().enumerate() {
            if let Some(caps) = entry_regex().captures(line) {
                let meta = caps.name("meta").map(|m| m.as_str()).unwrap_or("");
                let (wave, depends) = parse_entry_meta(meta);
                entries.push(PlanEntry {
                    task_path: caps["path"].trim().to_string(),
                    description: caps
                        .name("desc")
                        .map(|d| d.as_str().trim().to_string())
                        .unwrap_or_default(),
                    completed: !caps["done"].trim().is_empty(),
                    wave,
                    depends,
                    line: body_offset + i,
                });
            }
        }

        Ok(Self {
            frontmatter,
            entries,
            raw: content.to_string(),
        })
    }

    /// Entries not yet checked off.
    pub fn remaining(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| !e.completed)
    }

    /// Rewrite `[ ]` to `[x]` on the lines of the given task paths. Only the
    /// checkbox cell changes; the rest of each line is preserved verbatim.
    pub fn mark_completed(content: &str, completed_paths: &[String]) -> String {
        let mut lines: Vec<String> = content.lines().map(ToString::to_string).collect();
        for line in &mut lines {
            let should_mark = entry_regex().captures(line).is_some_and(|caps| {
                caps["done"].trim().is_empty()
                    && completed_paths.iter().any(|p| p == caps["path"].trim())
            });
            if should_mark {
                if let Some(pos) = line.find("[ ]") {
                    line.replace_range(pos..pos + 3, "[x]");
                }
            }
        }
        let mut out = lines.join("\n");
        if content.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// `wave: 2, depends: 040, 041` → `(Some(2), ["040", "041"])`
fn parse_entry_meta(meta: &str) -> (Option<u32>, Vec<String>) {
    let mut wave = None;
    let mut depends = Vec::new();
    for part in meta.split(';') {
        for clause in split_top_level(part) {
            let clause = clause.trim();
            if let Some(n) = clause.strip_prefix("wave:") {
                wave = n.trim().parse().ok();
            } else if let Some(list) = clause.strip_prefix("depends:") {
                depends.extend(
                    list.split(',')
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty()),
                );
            }
        }
    }
    (wave, depends)
}

/// Split on commas that start a new `key:` clause, leaving the comma-separated
/// dependency list intact.
fn split_top_level(meta: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut start = 0;
    for (idx, _) in meta.match_indices(',') {
        let rest = meta[idx + 1..].trim_start();
        if rest.starts_with("wave:") || rest.starts_with("depends:") {
            clauses.push(&meta[start..idx]);
            start = idx + 1;
        }
    }
    clauses.push(&meta[start..]);
    clauses
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const PLAN: &str = r#"---
title: Cache rollout
version: "1"
status: active
phases:
  - name: Foundation
    tasks:
      - "040"
  - name: Integration
    tasks:
      - "042"
created: "2026-01-10"
---

# Cache rollout

## Tasks

- [ ] `tasks/pending/040-client.md` — extract the http client
- [x] `tasks/pending/041-config.md` — config plumbing
- [ ] `tasks/pending/042-add-cache.md` — add the cache (wave: 2, depends: 040, 041)
"#;

    fn parse() -> Plan {
        Plan::parse(PLAN, &PathBuf::from("plans/cache.md")).expect("plan should parse")
    }

    #[test]
    fn test_parse_frontmatter() {
        let plan = parse();
        assert_eq!(plan.frontmatter.title.as_deref(), Some("Cache rollout"));
        assert_eq!(plan.frontmatter.phases.len(), 2);
        assert_eq!(plan.frontmatter.phases[0].name, "Foundation");
    }

    #[test]
    fn test_parse_entries() {
        let plan = parse();
        assert_eq!(plan.entries.len(), 3);
        assert!(!plan.entries[0].completed);
        assert!(plan.entries[1].completed);
        let third = &plan.entries[2];
        assert_eq!(third.task_path, "tasks/pending/042-add-cache.md");
        assert_eq!(third.wave, Some(2));
        assert_eq!(third.depends, vec!["040".to_string(), "041".to_string()]);
        assert_eq!(plan.remaining().count(), 2);
    }

    #[test]
    fn test_mark_completed_is_line_scoped() {
        let updated = Plan::mark_completed(PLAN, &["tasks/pending/040-client.md".to_string()]);
        assert!(updated.contains("- [x] `tasks/pending/040-client.md`"));
        // Untouched entries keep their exact text.
        assert!(updated.contains("- [ ] `tasks/pending/042-add-cache.md` — add the cache (wave: 2, depends: 040, 041)"));
        // Already-checked lines stay checked.
        assert!(updated.contains("- [x] `tasks/pending/041-config.md`"));
    }

    #[test]
    fn test_reparse_after_update_shrinks_remaining() {
        let updated = Plan::mark_completed(PLAN, &["tasks/pending/040-client.md".to_string()]);
        let plan = Plan::parse(&updated, &PathBuf::from("plans/cache.md")).unwrap();
        assert_eq!(plan.remaining().count(), 1);
    }
}
