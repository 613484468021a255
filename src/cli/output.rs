//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DeclarationHasher, ValidationResult};
use crate::executor::{ActionOutcome, ApplyResult};
use crate::graph::ResourceGraph;
use crate::planner::{ActionKind, ChangeAction, ChangePlan, render_value};
use crate::state::{StateRecord, StateSnapshot};

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
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Apply report row for table display.
#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
}

/// State record row for table display.
#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Hash")]
    hash: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Graph node row for table display.
#[derive(Tabled)]
struct GraphRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a change plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ChangePlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ChangePlan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();

        let _ = write!(output, "\nChange Plan\n");
        let _ = write!(
            output,
            "   Graph hash: {}\n\n",
            DeclarationHasher::short_hash(&plan.graph_hash)
        );

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .filter(|(_, a)| a.kind != ActionKind::NoOp)
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action(a),
                resource: a.key.to_string(),
                reason: Self::truncate(&a.reason, 48),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            output.push_str("\nAttribute changes:\n");
            for action in plan.changes().filter(|a| !a.changes.is_empty()) {
                let _ = writeln!(output, "   {} {}", Self::format_action(action), action.key);
                for change in &action.changes {
                    let _ = writeln!(
                        output,
                        "       {}: {} -> {}",
                        change.attribute,
                        render_value(change.old.as_ref()),
                        render_value(change.new.as_ref())
                    );
                }
            }
        }

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete, {} unchanged\n",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.replace.to_string().yellow(),
            summary.delete.to_string().red(),
            summary.unchanged
        );

        output
    }

    /// Formats the result of an apply.
    #[must_use]
    pub fn format_apply(&self, result: &ApplyResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let status = if result.is_success() {
                    format!("{} Apply complete", "✓".green())
                } else if result.cancelled {
                    format!("{} Apply cancelled", "⚠".yellow())
                } else {
                    format!("{} Apply incomplete", "✗".red())
                };

                let rows: Vec<ReportRow> = result
                    .reports
                    .iter()
                    .map(|r| {
                        let (action, resource) = if r.outcome == ActionOutcome::Unchanged {
                            (
                                r.kind.to_string().dimmed().to_string(),
                                r.key.to_string().dimmed().to_string(),
                            )
                        } else {
                            (r.kind.to_string(), r.key.to_string())
                        };
                        ReportRow {
                            index: r.index + 1,
                            action,
                            resource,
                            outcome: Self::format_outcome(&r.outcome),
                            attempts: r.attempts,
                        }
                    })
                    .collect();

                let mut output = format!("{status}\n\n");
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                let _ = writeln!(output, "\n{result}");
                output
            }
        }
    }

    /// Formats the resource graph in dependency order.
    #[must_use]
    pub fn format_graph(&self, graph: &ResourceGraph) -> String {
        match self.format {
            OutputFormat::Json => {
                let nodes: Vec<GraphJson> = graph
                    .topological_order()
                    .into_iter()
                    .map(|node| GraphJson {
                        key: node.key.to_string(),
                        dependencies: graph
                            .dependencies_of(&node.key)
                            .iter()
                            .map(ToString::to_string)
                            .collect(),
                    })
                    .collect();
                serde_json::to_string_pretty(&nodes).unwrap_or_default()
            }
            OutputFormat::Text => {
                if graph.is_empty() {
                    return String::from("   No resources declared.\n");
                }
                let rows: Vec<GraphRow> = graph
                    .topological_order()
                    .into_iter()
                    .enumerate()
                    .map(|(i, node)| GraphRow {
                        index: i + 1,
                        resource: node.key.to_string(),
                        dependencies: graph
                            .dependencies_of(&node.key)
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                let _ = write!(
                    output,
                    "\n\n{} resources, {} references\n",
                    graph.len(),
                    graph.references().len()
                );
                output
            }
        }
    }

    /// Formats every recorded resource.
    #[must_use]
    pub fn format_records(&self, records: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => {
                let records: Vec<&StateRecord> = records.values().collect();
                serde_json::to_string_pretty(&records).unwrap_or_default()
            }
            OutputFormat::Text => {
                if records.is_empty() {
                    return String::from("   No resources recorded.\n");
                }
                let rows: Vec<RecordRow> = records
                    .values()
                    .map(|r| RecordRow {
                        resource: r.key.to_string(),
                        provider_id: Self::truncate(&r.provider_id, 32),
                        hash: DeclarationHasher::short_hash(&r.declaration_hash).to_string(),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats one state record.
    #[must_use]
    pub fn format_record(&self, record: &StateRecord) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(record).unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(output, "\n{}\n\n", record.key.to_string().bold());
                let _ = writeln!(output, "   Provider ID: {}", record.provider_id);
                let _ = writeln!(output, "   Declaration hash: {}", record.declaration_hash);
                let _ = writeln!(output, "   Created: {}", record.created_at);
                let _ = writeln!(output, "   Updated: {}", record.updated_at);

                if !record.dependencies.is_empty() {
                    let deps: Vec<String> =
                        record.dependencies.iter().map(ToString::to_string).collect();
                    let _ = writeln!(output, "   Depends on: {}", deps.join(", "));
                }

                output.push_str("\n   Attributes:\n");
                for (name, value) in &record.attributes {
                    let _ = writeln!(output, "     {name} = {value}");
                }
                output.push_str("\n   Outputs:\n");
                for (name, value) in &record.outputs {
                    let _ = writeln!(output, "     {name} = {value}");
                }
                output
            }
        }
    }

    /// Formats a validation result.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "valid": result.is_valid(),
                    "errors": result
                        .errors
                        .iter()
                        .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                        .collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Manifest is valid.\n", "✓".green())
                } else {
                    format!("{} Manifest has {} error(s):\n", "✗".red(), result.errors.len())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {}: {}", error.field, error.message);
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats an action kind with color.
    fn format_action(action: &ChangeAction) -> String {
        match (action.kind, action.replacement) {
            (ActionKind::Create, true) => "+/- replace".yellow().to_string(),
            (ActionKind::Delete, true) => "-/+ replace".yellow().to_string(),
            (ActionKind::Create, false) => "+ create".green().to_string(),
            (ActionKind::Update, _) => "~ update".yellow().to_string(),
            (ActionKind::Delete, false) => "- delete".red().to_string(),
            (ActionKind::NoOp, _) => "no-op".dimmed().to_string(),
        }
    }

    /// Formats an action outcome with color.
    fn format_outcome(outcome: &ActionOutcome) -> String {
        match outcome {
            ActionOutcome::Applied => "applied".green().to_string(),
            ActionOutcome::Unchanged => "unchanged".dimmed().to_string(),
            ActionOutcome::Failed { .. } => {
                Self::truncate(&outcome.to_string(), 60).red().to_string()
            }
            ActionOutcome::Skipped { .. } => {
                Self::truncate(&outcome.to_string(), 60).yellow().to_string()
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }

    /// Prints a success message.
    pub fn success(&self, message: &str) {
        self.emit("success", &format!("{} {message}", "✓".green()), message);
    }

    /// Prints an error message.
    pub fn error(&self, message: &str) {
        self.emit("error", &format!("{} {message}", "✗".red()), message);
    }

    /// Prints a warning message.
    pub fn warning(&self, message: &str) {
        self.emit("warning", &format!("{} {message}", "⚠".yellow()), message);
    }

    fn emit(&self, status: &str, text: &str, message: &str) {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::json!({ "status": status, "message": message });
                eprintln!("{}", serde_json::to_string(&json).unwrap_or_default());
            }
            OutputFormat::Text => eprintln!("{text}"),
        }
    }
}

// JSON serialization helpers

#[derive(Serialize)]
struct GraphJson {
    key: String,
    dependencies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ActionReport;
    use crate::model::{Attributes, ResourceKey};

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(OutputFormatter::truncate("short", 10), "short");
        assert_eq!(OutputFormatter::truncate("ééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_empty_plan_text() {
        let plan = ChangePlan::ordered(String::from("abc"), vec![]).unwrap();
        let text = OutputFormatter::new(OutputFormat::Text).format_plan(&plan, false);
        assert!(text.contains("No changes required"));
    }

    fn report(index: usize, kind: ActionKind, name: &str, outcome: ActionOutcome) -> ActionReport {
        ActionReport {
            index,
            kind,
            key: ResourceKey::new("server", name),
            outcome,
            attempts: u32::from(kind != ActionKind::NoOp),
            provider_id: None,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_apply_lists_unchanged_resources() {
        let result = ApplyResult {
            reports: vec![
                report(0, ActionKind::NoOp, "db", ActionOutcome::Unchanged),
                report(1, ActionKind::Update, "web", ActionOutcome::Applied),
            ],
            cancelled: false,
        };

        let text = OutputFormatter::new(OutputFormat::Text).format_apply(&result);
        assert!(text.contains("server.db"));
        assert!(text.contains("server.web"));
        assert!(text.contains("unchanged"));
    }

    #[test]
    fn test_records_as_json() {
        let key = ResourceKey::new("network", "main");
        let record = StateRecord::new(
            key.clone(),
            "net-1",
            Attributes::new(),
            Attributes::new(),
            "hash",
            vec![],
        );
        let records = StateSnapshot::from([(key, record)]);

        let json = OutputFormatter::new(OutputFormat::Json).format_records(&records);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["provider_id"], "net-1");
    }
}
