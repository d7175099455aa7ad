//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{StackFile, ValidationResult};
use crate::engine::RunOutcome;
use crate::graph::{DependencyGraph, ResourceNode};
use crate::planner::{Action, ActionStatus, Plan, Verb};
use crate::state::{LockInfo, StackState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Graph row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

/// Execution result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// State record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Policy")]
    policy: String,
    #[tabled(rename = "Inputs")]
    fingerprint: String,
    #[tabled(rename = "Applied")]
    applied_at: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nPlan");
        let _ = writeln!(output, "   Declaration hash: {}\n", short(&plan.declaration_hash));

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_verb(a),
                resource: a.node_id.clone(),
                kind: a.kind.to_string(),
                reason: Self::reason(a),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for action in plan.actions.iter().filter(|a| !a.changes.is_empty()) {
                let _ = writeln!(output, "\n   {}:", action.node_id.bold());
                for change in &action.changes {
                    let _ = writeln!(output, "     {change}");
                }
            }
        }

        let summary = plan.summary();
        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged",
            summary.creates.to_string().green(),
            summary.updates.to_string().yellow(),
            summary.deletes.to_string().red(),
            summary.unchanged
        );

        output
    }

    /// Formats the dependency order of a graph.
    #[must_use]
    pub fn format_graph(&self, graph: &DependencyGraph, order: &[&ResourceNode]) -> String {
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<serde_json::Value> = order
                    .iter()
                    .map(|n| {
                        serde_json::json!({
                            "id": n.id,
                            "kind": n.kind,
                            "depends_on": graph.dependencies_of(&n.id),
                        })
                    })
                    .collect();
                to_json(&serde_json::json!({ "order": nodes, "edges": graph.edge_count() }))
            }
            OutputFormat::Text => {
                let rows: Vec<GraphRow> = order
                    .iter()
                    .enumerate()
                    .map(|(i, n)| GraphRow {
                        index: i + 1,
                        resource: n.id.clone(),
                        kind: n.kind.to_string(),
                        depends_on: graph.dependencies_of(&n.id).join(", "),
                    })
                    .collect();
                format!(
                    "{}\n\n{} resources, {} edges\n",
                    Table::new(rows),
                    graph.len(),
                    graph.edge_count()
                )
            }
        }
    }

    /// Formats the outcome of an apply or destroy run.
    #[must_use]
    pub fn format_outcome(&self, outcome: &RunOutcome) -> String {
        match self.format {
            OutputFormat::Json => {
                let results: Vec<serde_json::Value> = outcome
                    .report
                    .results
                    .iter()
                    .map(|r| {
                        serde_json::json!({
                            "resource": r.node_id,
                            "verb": r.verb,
                            "status": r.status.to_string(),
                            "outputs": r.outputs,
                            "error": r.error,
                        })
                    })
                    .collect();
                to_json(&serde_json::json!({
                    "operation": outcome.operation,
                    "success": outcome.success(),
                    "error": outcome.report.error.as_ref().map(ToString::to_string),
                    "results": results,
                }))
            }
            OutputFormat::Text => {
                let rows: Vec<ResultRow> = outcome
                    .report
                    .results
                    .iter()
                    .filter(|r| r.verb != Verb::NoOp)
                    .map(|r| ResultRow {
                        action: r.verb.to_string(),
                        resource: r.node_id.clone(),
                        status: Self::format_status(r.status),
                    })
                    .collect();

                let mut output = String::new();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                let headline = if outcome.success() {
                    format!("{} {} complete", "✓".green(), outcome.operation)
                } else {
                    format!("{} {} failed", "✗".red(), outcome.operation)
                };
                let _ = writeln!(output, "\n{headline}: {}", outcome.report);
                output
            }
        }
    }

    /// Formats stack state.
    #[must_use]
    pub fn format_state(&self, state: &StackState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = writeln!(output, "\nState: {}/{}\n", state.stack, state.environment);
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Declaration hash: {}", short(&state.declaration_hash));
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}\n", state.records.len());

                let rows: Vec<RecordRow> = state
                    .records_by_position()
                    .into_iter()
                    .map(|r| RecordRow {
                        resource: r.node_id.clone(),
                        kind: r.kind.to_string(),
                        policy: r.removal_policy.to_string(),
                        fingerprint: short(&r.inputs_hash),
                        applied_at: r.applied_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: Option<&LockInfo>) -> String {
        match (self.format, lock) {
            (OutputFormat::Json, _) => to_json(&serde_json::json!({ "lock": lock })),
            (OutputFormat::Text, None) => String::from("State is not locked.\n"),
            (OutputFormat::Text, Some(lock)) => format!(
                "Locked by {} since {} (lock {}, {}s remaining)\n",
                lock.holder,
                lock.acquired_at,
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(
        &self,
        stack: &StackFile,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "stack": stack.stack.name,
                "environment": stack.stack.environment,
                "resources": stack.resources.len(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} Declarations are valid!\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    output.push_str("\nWarnings:\n");
                    for warning in &result.warnings {
                        let _ = writeln!(output, "  {} {warning}", "⚠".yellow());
                    }
                }
                let _ = writeln!(output, "\nStack summary:");
                let _ = writeln!(output, "  Stack: {}", stack.stack.name);
                let _ = writeln!(output, "  Environment: {}", stack.stack.environment);
                let _ = writeln!(output, "  Resources: {}", stack.resources.len());
                output
            }
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &format!("{} {message}", "✓".green()), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &format!("{} {message}", "✗".red()), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &format!("{} {message}", "⚠".yellow()), message)
    }

    fn message(&self, status: &str, text: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => text.to_string(),
        }
    }

    /// Formats an action verb with color.
    fn format_verb(action: &Action) -> String {
        match action.verb {
            Verb::Create => "+create".green().to_string(),
            Verb::Update => "~update".yellow().to_string(),
            Verb::Delete if action.is_forget() => "-forget".yellow().to_string(),
            Verb::Delete => "-delete".red().to_string(),
            Verb::NoOp => "no-op".dimmed().to_string(),
        }
    }

    fn format_status(status: ActionStatus) -> String {
        match status {
            ActionStatus::Succeeded => "succeeded".green().to_string(),
            ActionStatus::Failed => "failed".red().to_string(),
            ActionStatus::Pending => "not started".dimmed().to_string(),
            other => other.to_string().yellow().to_string(),
        }
    }

    fn reason(action: &Action) -> String {
        match action.verb {
            Verb::Create => String::from("not in state"),
            Verb::Update => {
                let fields: Vec<&str> = action.changes.iter().map(|c| c.field.as_str()).collect();
                Self::truncate(&format!("changed: {}", fields.join(", ")), 40)
            }
            Verb::Delete if action.is_forget() => String::from("no longer declared, retained"),
            Verb::Delete => String::from("no longer declared"),
            Verb::NoOp => String::from("unchanged"),
        }
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn short(hash: &str) -> String {
    hash.chars().take(8).collect()
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    declaration_hash: String,
    created_at: String,
    has_changes: bool,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
struct ActionJson {
    verb: Verb,
    resource: String,
    kind: String,
    forget: bool,
    depends_on: Vec<String>,
    changes: Vec<String>,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            declaration_hash: plan.declaration_hash.clone(),
            created_at: plan.created_at.to_rfc3339(),
            has_changes: plan.has_changes(),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    verb: a.verb,
                    resource: a.node_id.clone(),
                    kind: a.kind.to_string(),
                    forget: a.is_forget(),
                    depends_on: a
                        .dependencies
                        .iter()
                        .map(|&d| plan.actions[d].node_id.clone())
                        .collect(),
                    changes: a.changes.iter().map(ToString::to_string).collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DeclarationSet, InputValue};
    use crate::planner::PlanBuilder;

    fn plan() -> Plan {
        let decls = DeclarationSet::new("site")
            .with(ResourceNode::new("bucket", "storage.bucket").with_output("arn"))
            .with(
                ResourceNode::new("cdn", "cdn.distribution")
                    .with_input("origin", InputValue::reference("bucket", "arn")),
            );
        let graph = DependencyGraph::from_declarations(&decls).unwrap();
        PlanBuilder::new()
            .build(&graph, &StackState::new("site", "dev"))
            .unwrap()
    }

    #[test]
    fn test_plan_json_lists_dependencies() {
        let json = OutputFormatter::new(OutputFormat::Json).format_plan(&plan(), false);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["actions"][0]["verb"], "create");
        assert_eq!(value["actions"][1]["resource"], "cdn");
        assert_eq!(value["actions"][1]["depends_on"][0], "bucket");
    }

    #[test]
    fn test_plan_text_has_summary() {
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan(), true);
        assert!(text.contains("cdn.distribution"));
        assert!(text.contains("to create"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("a long reason here", 10), "a long ...");
    }

    #[test]
    fn test_lock_text() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        assert_eq!(formatter.format_lock(None), "State is not locked.\n");
    }
}
