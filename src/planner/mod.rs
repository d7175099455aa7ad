//! Planning module for stack operations.
//!
//! This module compares declarations against recorded state, orders the
//! resulting actions into a plan, and executes plans against a provider.

mod diff;
mod executor;
mod plan;

pub use diff::{ChangeKind, DiffDetail, DiffEngine, DiffType, ResourceDiff};
pub use executor::{
    ActionResult, ActionStatus, DEFAULT_PARALLELISM, ExecutionReport, PlanExecutor,
};
pub use plan::{Action, Plan, PlanBuilder, PlanSummary, Verb};
