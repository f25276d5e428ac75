use chrono::{DateTime, Local, Utc};
use colored::Colorize;
use declarative::{
    ExportValue, NodeReport, NodeStatus, Operation, Plan, PlanStep, Properties, RunOutcome,
    RunReport, RunSummary,
};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};
use std::collections::BTreeMap;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{num}/{total}]").blue().bold(), msg);
}

// ============================================================================
// Plans
// ============================================================================

fn colored_symbol(operation: Operation) -> colored::ColoredString {
    let symbol = operation.symbol();
    match operation {
        Operation::Create => symbol.green(),
        Operation::Update => symbol.yellow(),
        Operation::Replace => symbol.magenta(),
        Operation::Delete | Operation::DeleteReplaced => symbol.red(),
        Operation::Same => symbol.dimmed(),
    }
}

/// Print a plan; with `diff`, each update or replace shows its input changes
pub fn render_plan(plan: &Plan, diff: bool) {
    header(&format!("Preview: {}", plan.stack));

    if !plan.has_changes() {
        success("No changes. Infrastructure matches the declaration.");
        return;
    }

    for step in plan.changes() {
        render_step(step);
        if diff {
            if let (Some(old), Some(new)) = (&step.old_inputs, &step.new_inputs) {
                for line in input_diff(old, new).lines() {
                    let line = match line.chars().next() {
                        Some('+') => line.green(),
                        Some('-') => line.red(),
                        _ => line.dimmed(),
                    };
                    println!("      {line}");
                }
            }
        }
    }

    println!();
    println!(
        "  {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
        plan.count(Operation::Create).to_string().green(),
        plan.count(Operation::Update).to_string().yellow(),
        plan.count(Operation::Replace).to_string().magenta(),
        (plan.count(Operation::Delete) + plan.count(Operation::DeleteReplaced))
            .to_string()
            .red(),
        plan.count(Operation::Same).to_string().dimmed(),
    );
}

fn render_step(step: &PlanStep) {
    println!(
        "  {:<2} {} {}",
        colored_symbol(step.operation),
        step.id,
        format!("({})", step.kind).dimmed()
    );
    if !step.replace_reasons.is_empty() {
        println!(
            "      {} {}",
            "replace because:".magenta(),
            step.replace_reasons.join(", ")
        );
    } else if step.operation == Operation::Update && !step.changed.is_empty() {
        println!("      {} {}", "changed:".dimmed(), step.changed.join(", "));
    }
    if !step.known {
        dim("    some inputs are known only after apply");
    }
}

/// Line diff of two input maps rendered as pretty JSON.
///
/// Unchanged lines are prefixed with a space, removals with `-` and
/// additions with `+`.
pub fn input_diff(old: &Properties, new: &Properties) -> String {
    let old = pretty(old);
    let new = pretty(new);
    let diff = TextDiff::from_lines(&old, &new);

    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => '-',
            ChangeTag::Insert => '+',
            ChangeTag::Equal => ' ',
        };
        out.push(sign);
        out.push_str(change.value().trim_end_matches('\n'));
        out.push('\n');
    }
    out
}

fn pretty(properties: &Properties) -> String {
    let mut text = serde_json::to_string_pretty(properties).unwrap_or_default();
    text.push('\n');
    text
}

// ============================================================================
// Run Results
// ============================================================================

/// Print failed and skipped nodes, then the summary counts
pub fn render_report(report: &RunReport) {
    let summary = report.summary();

    let problems = report
        .nodes
        .iter()
        .filter(|n| !n.status.is_success())
        .collect::<Vec<_>>();
    if !problems.is_empty() {
        section("Problems");
        for node in problems {
            render_problem(node);
        }
    }

    section("Summary");
    render_summary(&summary);

    if let RunOutcome::Aborted { reason } = &report.outcome {
        println!();
        error(&format!("Run aborted: {reason}"));
    }
}

fn render_problem(node: &NodeReport) {
    let operation = node
        .operation
        .map(|o| format!(" [{o}]"))
        .unwrap_or_default();
    match &node.status {
        NodeStatus::Failed { error } => {
            println!("  {} {}{}: {}", "✗".red(), node.id, operation, error);
        }
        NodeStatus::Skipped { reason } => {
            println!("  {} {}{}: {}", "○".dimmed(), node.id, operation, reason.to_string().dimmed());
        }
        NodeStatus::Succeeded => {}
    }
}

fn render_summary(summary: &RunSummary) {
    if summary.created > 0 {
        println!("  {} {} created", "●".green(), summary.created);
    }
    if summary.updated > 0 {
        println!("  {} {} updated", "●".yellow(), summary.updated);
    }
    if summary.replaced > 0 {
        println!("  {} {} replaced", "●".magenta(), summary.replaced);
    }
    if summary.deleted > 0 {
        println!("  {} {} deleted", "●".red(), summary.deleted);
    }
    if summary.unchanged > 0 {
        println!("  {} {} unchanged", "●".dimmed(), summary.unchanged);
    }
    if summary.failed > 0 {
        println!("  {} {} failed", "✗".red(), summary.failed);
    }
    if summary.skipped > 0 {
        println!("  {} {} skipped", "○".dimmed(), summary.skipped);
    }
}

/// Print stack outputs and when the state was last written
pub fn render_outputs(outputs: &BTreeMap<String, ExportValue>, last_updated: Option<DateTime<Utc>>) {
    section("Outputs");
    if outputs.is_empty() {
        dim("(none)");
    }
    for (name, value) in outputs {
        match value {
            ExportValue::Resolved(value) => kv(name, &format_value(value)),
            ExportValue::Unresolved { reason } => {
                kv(name, &format!("unresolved: {reason}").yellow().to_string());
            }
        }
    }
    if let Some(at) = last_updated {
        println!();
        dim(&format!(
            "Last updated {}",
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ));
    }
}

/// Compact single-line form: strings unquoted, everything else as JSON
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(format_value).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_input_diff_marks_changes() {
        let old = props(json!({"cidr_block": "10.0.0.0/16", "enable_dns_support": true}));
        let new = props(json!({"cidr_block": "10.1.0.0/16", "enable_dns_support": true}));
        let diff = input_diff(&old, &new);

        assert!(diff.contains("-  \"cidr_block\": \"10.0.0.0/16\","));
        assert!(diff.contains("+  \"cidr_block\": \"10.1.0.0/16\","));
        assert!(diff.contains("   \"enable_dns_support\": true"));
    }

    #[test]
    fn test_input_diff_identical() {
        let inputs = props(json!({"name": "a"}));
        assert!(input_diff(&inputs, &inputs)
            .lines()
            .all(|l| l.starts_with(' ')));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&json!("vpc-1")), "vpc-1");
        assert_eq!(format_value(&json!(["a", "b"])), "a, b");
        assert_eq!(format_value(&json!(3)), "3");
        assert_eq!(format_value(&json!({"k": 1})), r#"{"k":1}"#);
    }
}
