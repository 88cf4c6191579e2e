//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::ValidationResult;
use crate::events::{EventAction, EventSink, LifecycleEvent};
use crate::planner::{Action, ReconciliationPlan};
use crate::reconciler::{ReconcileReport, TeardownReport};

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
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ReconciliationPlan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    fn format_plan_text(plan: &ReconciliationPlan) -> String {
        let mut output = String::new();

        let _ = writeln!(output, "\nPlan for {}", plan.subject.bold());
        let _ = writeln!(output, "   Fingerprint: {}\n", plan.short_fingerprint());

        if !plan.has_changes() {
            let _ = writeln!(
                output,
                "{} No changes required, everything is up to date.",
                "✓".green()
            );
            return output;
        }

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action(a.action),
                kind: a.kind.to_string(),
                resource: Self::truncate(&a.resource.name, 40),
                reason: Self::truncate(&a.reason, 50),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let _ = writeln!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged",
            plan.count(Action::Create).to_string().green(),
            plan.count(Action::Update).to_string().yellow(),
            plan.count(Action::Delete).to_string().red(),
            plan.count(Action::Skip).to_string().dimmed()
        );

        output
    }

    /// Formats a reconciliation report.
    #[must_use]
    pub fn format_reconcile(&self, report: &ReconcileReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => format!("{} {report}", "✓".green()),
        }
    }

    /// Formats a teardown report.
    #[must_use]
    pub fn format_teardown(&self, report: &TeardownReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => {
                let mark = if report.success() {
                    "✓".green()
                } else {
                    "✗".red()
                };
                format!("{mark} {report}")
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
                    "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "warnings": result.warnings,
                });
                serde_json::to_string_pretty(&json).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Configuration is valid!\n", "✓".green())
                } else {
                    format!(
                        "{} Configuration has {} error(s):\n",
                        "✗".red(),
                        result.error_count()
                    )
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        match action {
            Action::Create => "+create".green().to_string(),
            Action::Update => "~update".yellow().to_string(),
            Action::Delete => "-delete".red().to_string(),
            Action::Skip => "skip".dimmed().to_string(),
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
}

/// Event sink printing one coloured line per lifecycle event to stderr.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    format: OutputFormat,
}

impl ConsoleSink {
    /// Creates a console sink.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Renders an event as it is printed.
    #[must_use]
    pub fn render(&self, event: &LifecycleEvent) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(event).unwrap_or_default(),
            OutputFormat::Text => {
                let action = match event.action {
                    EventAction::Created => "created".green(),
                    EventAction::Updated => "updated".yellow(),
                    EventAction::Deleted => "deleted".red(),
                    EventAction::Skipped => "skipped".dimmed(),
                    EventAction::Waiting => "waiting".cyan(),
                    EventAction::Retrying => "retrying".yellow(),
                    EventAction::Failed => "failed".red().bold(),
                };
                let mut line = format!("   {action:>8} {} {}", event.kind, event.name.bold());
                if let Some(detail) = &event.detail {
                    let _ = write!(line, " ({detail})");
                }
                line
            }
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &LifecycleEvent) {
        eprintln!("{}", self.render(event));
    }
}
