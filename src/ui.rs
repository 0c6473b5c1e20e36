use colored::Colorize;
use converge::{ConfirmCallback, DeploySummary, OperationOutcome, SummaryRow};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
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

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// One-line rendering of a host outcome
pub fn outcome_line(host: &str, outcome: &OperationOutcome) -> String {
    match outcome {
        OperationOutcome::Changed => format!("{} {host}", "✓".green()),
        OperationOutcome::NoChange => format!("{} {host} {}", "✓".green(), "(no change)".dimmed()),
        OperationOutcome::NotRun => format!("{} {host} {}", "-".dimmed(), "(skipped)".dimmed()),
        OperationOutcome::Errored {
            error,
            ignored: true,
        } => format!("{} {host}: {error} {}", "⚠".yellow(), "(ignored)".dimmed()),
        OperationOutcome::Errored { error, .. } => format!("{} {host}: {error}", "✗".red()),
    }
}

/// Truncate a display string, keeping the start
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = text.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

const NAME_WIDTH: usize = 48;

/// Render the per-operation results table
pub fn results_table(rows: &[SummaryRow]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<NAME_WIDTH$}  {:>5}  {:>7}  {:>5}  {:>9}  {:>7}",
        "Operation", "Hosts", "Success", "Error", "No Change", "Skipped"
    )];
    for row in rows {
        let success = row.changed + row.no_change;
        lines.push(format!(
            "{:<NAME_WIDTH$}  {:>5}  {:>7}  {:>5}  {:>9}  {:>7}",
            truncate(&row.name, NAME_WIDTH),
            row.hosts,
            success,
            row.errored,
            row.no_change,
            row.skipped
        ));
    }
    lines
}

pub fn print_results(rows: &[SummaryRow]) {
    let lines = results_table(rows);
    println!();
    println!("  {}", lines[0].bold());
    for (row, line) in rows.iter().zip(&lines[1..]) {
        if row.errored > 0 {
            println!("  {}", line.red());
        } else {
            println!("  {line}");
        }
    }
}

/// Print final summary
pub fn print_summary(summary: &DeploySummary) {
    println!();
    if summary.is_success() {
        println!("  {} Deploy complete", "✓".green().bold());
    } else {
        println!("  {} Deploy finished with errors", "⚠".yellow().bold());
    }

    if summary.changed > 0 {
        println!("    • {} changed", summary.changed);
    }
    if summary.no_change > 0 {
        println!("    • {} already up to date", summary.no_change);
    }
    if summary.not_run > 0 {
        println!("    • {} skipped by conditions", summary.not_run);
    }
    if summary.ignored > 0 {
        println!("    • {} failed (ignored)", summary.ignored);
    }
    if summary.errored > 0 {
        println!("    • {} {}", summary.errored, "failed".red());
    }
    if !summary.failed_hosts.is_empty() {
        println!(
            "    • {} {}",
            "failed hosts:".red(),
            summary.failed_hosts.join(", ")
        );
    }
}

/// Confirmation through a terminal prompt
pub struct TerminalConfirm;

impl ConfirmCallback for TerminalConfirm {
    fn confirm(&mut self, prompt: &str) -> converge::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(true)
            .interact()
            .map_err(|e| converge::Error::config(format!("confirmation prompt failed: {e}")))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("server.shell (apt-get update)", 15), "server.shell...");
        assert_eq!(truncate("abc", 2), "...");
    }

    #[test]
    fn test_results_table_counts() {
        let rows = vec![SummaryRow {
            name: "files.put (/etc/motd)".into(),
            hosts: 4,
            changed: 1,
            errored: 1,
            no_change: 1,
            skipped: 1,
        }];
        let lines = results_table(&rows);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Operation"));
        assert!(lines[0].ends_with("Skipped"));
        let cells: Vec<&str> = lines[1].split_whitespace().collect();
        assert_eq!(cells[cells.len() - 5..], ["4", "2", "1", "1", "1"]);
    }

    #[test]
    fn test_outcome_line_mentions_host() {
        colored::control::set_override(false);
        let line = outcome_line(
            "web1",
            &OperationOutcome::Errored {
                error: "exit 1".into(),
                ignored: true,
            },
        );
        assert_eq!(line, "⚠ web1: exit 1 (ignored)");
        assert_eq!(outcome_line("db", &OperationOutcome::NotRun), "- db (skipped)");
    }
}
