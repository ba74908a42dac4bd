//! Core data model.

pub mod config;
pub mod context;
pub mod execution;
pub mod plan;
pub mod report;
pub mod task;

pub use config::{Config, ProviderKind, ScopeMode, SecretsMode};
pub use context::{ContextBreakdown, LoadedContext, Role, Skill};
pub use execution::{
    BlockedStatus, ClaimConflict, CompletionSignal, ExecutionResult, ExecutorResult,
    ExecutorState, ExecutorStatus, TerminationReason, TokenUsage, WindowMetrics,
};
pub use plan::{Plan, PlanEntry};
pub use report::{ExecutionReport, TaskSummary};
pub use task::{ChangeKind, FileChange, TaskFileState, TaskScope, TaskSpec};
