//! Scope enforcement: decide ALLOW / ASK_USER / BLOCK for every file the
//! agent touches.
//!
//! The implicit-forbidden list (secret files) is evaluated before anything
//! in the task scope and applies regardless of mode. Matching is
//! case-sensitive on every host; `*` never crosses a path separator; paths
//! are evaluated as written (symlinks are not resolved).

use std::collections::HashSet;
use std::sync::RwLock;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::warn;

use crate::domain::error::{AidfError, AidfResult, ConfigCode, ScopeCode};
use crate::domain::models::config::ScopeMode;
use crate::domain::models::task::{FileChange, TaskScope};

/// Always-forbidden path patterns. Files with an `.example`, `.sample`, or
/// `.template` suffix are exempt, as is anything listed in the task's
/// `allow_implicit_forbidden`.
pub const IMPLICIT_FORBIDDEN: &[&str] = &[
    ".env*",
    "**/.env*",
    "*.pem",
    "**/*.pem",
    "*.key",
    "**/*.key",
    "*.p12",
    "**/*.p12",
    "credentials.json",
    "**/credentials.json",
    "id_rsa*",
    "**/id_rsa*",
    "**/secrets/**",
];

const EXEMPT_SUFFIXES: &[&str] = &[".example", ".sample", ".template"];

/// Decision for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDecision {
    Allow,
    AskUser,
    Block(ScopeCode),
}

/// Aggregate decision over a change set.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeDecision {
    Allow,
    AskUser {
        files: Vec<String>,
    },
    Block {
        files: Vec<String>,
        reason: String,
        error: AidfError,
    },
}

impl ScopeDecision {
    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Block { .. })
    }
}

/// Pure decision module over a task scope.
pub struct ScopeGuard {
    mode: ScopeMode,
    allowed: GlobSet,
    forbidden: GlobSet,
    ask_before: GlobSet,
    implicit_forbidden: GlobSet,
    allow_implicit: GlobSet,
    approved: RwLock<HashSet<String>>,
}

fn build_globset(patterns: &[String]) -> AidfResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| {
                AidfError::config(ConfigCode::Invalid, format!("bad scope glob `{pattern}`: {e}"))
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| {
        AidfError::config(ConfigCode::Invalid, format!("scope glob set failed to build: {e}"))
    })
}

impl ScopeGuard {
    pub fn new(scope: &TaskScope, mode: ScopeMode) -> AidfResult<Self> {
        let implicit: Vec<String> = IMPLICIT_FORBIDDEN.iter().map(ToString::to_string).collect();
        Ok(Self {
            mode,
            allowed: build_globset(&scope.allowed)?,
            forbidden: build_globset(&scope.forbidden)?,
            ask_before: build_globset(&scope.ask_before)?,
            implicit_forbidden: build_globset(&implicit)?,
            allow_implicit: build_globset(&scope.allow_implicit_forbidden)?,
            approved: RwLock::new(HashSet::new()),
        })
    }

    pub const fn mode(&self) -> ScopeMode {
        self.mode
    }

    /// Whitelist paths for the rest of the run (after user approval).
    pub fn approve<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut approved = self.approved.write().expect("approved set lock");
        approved.extend(paths.into_iter().map(Into::into));
    }

    pub fn is_approved(&self, path: &str) -> bool {
        self.approved.read().expect("approved set lock").contains(path)
    }

    /// Decide one path. Evaluation order: implicit-forbidden, forbidden,
    /// ask_before, allowed, then the mode's default for everything else.
    pub fn check_file(&self, path: &str) -> FileDecision {
        if self.implicit_forbidden.is_match(path)
            && !is_exempt(path)
            && !self.allow_implicit.is_match(path)
        {
            return match self.mode {
                ScopeMode::Ask => FileDecision::AskUser,
                ScopeMode::Strict | ScopeMode::Permissive => {
                    FileDecision::Block(ScopeCode::Forbidden)
                }
            };
        }

        if self.forbidden.is_match(path) {
            return FileDecision::Block(ScopeCode::Forbidden);
        }

        if self.ask_before.is_match(path) {
            if self.is_approved(path) {
                return FileDecision::Allow;
            }
            return FileDecision::AskUser;
        }

        if self.allowed.is_match(path) {
            return FileDecision::Allow;
        }

        match self.mode {
            ScopeMode::Strict => FileDecision::Block(ScopeCode::OutsideAllowed),
            ScopeMode::Ask => FileDecision::AskUser,
            ScopeMode::Permissive => {
                warn!(path, "file is outside the task's allowed scope (permissive mode)");
                FileDecision::Allow
            }
        }
    }

    /// Aggregate decision over a change set. BLOCK dominates ASK_USER.
    pub fn check(&self, changes: &[FileChange]) -> ScopeDecision {
        let mut blocked: Vec<String> = Vec::new();
        let mut ask: Vec<String> = Vec::new();
        let mut code = ScopeCode::Forbidden;

        for change in changes {
            match self.check_file(&change.path) {
                FileDecision::Allow => {}
                FileDecision::AskUser => ask.push(change.path.clone()),
                FileDecision::Block(c) => {
                    // FORBIDDEN outranks OUTSIDE_ALLOWED in the report.
                    if blocked.is_empty() || c == ScopeCode::Forbidden {
                        code = c;
                    }
                    blocked.push(change.path.clone());
                }
            }
        }

        if !blocked.is_empty() {
            let reason = format!(
                "{} file(s) violate the task scope ({})",
                blocked.len(),
                code.as_str()
            );
            let error = AidfError::scope(code, blocked.clone(), reason.clone())
                .with_context("mode", format!("{:?}", self.mode).to_lowercase());
            return ScopeDecision::Block {
                files: blocked,
                reason,
                error,
            };
        }
        if !ask.is_empty() {
            return ScopeDecision::AskUser { files: ask };
        }
        ScopeDecision::Allow
    }

    /// Only the files whose decision is BLOCK; these are the ones to undo.
    /// ASK_USER without approval is surfaced to the orchestrator instead.
    pub fn changes_to_revert(&self, changes: &[FileChange]) -> Vec<String> {
        changes
            .iter()
            .filter(|c| matches!(self.check_file(&c.path), FileDecision::Block(_)))
            .map(|c| c.path.clone())
            .collect()
    }
}

fn is_exempt(path: &str) -> bool {
    EXEMPT_SUFFIXES.iter().any(|s| path.ends_with(s))
}
