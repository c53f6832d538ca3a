/*!
 * CLI style system
 *
 * Themed text, icons and comfy-table renderings of plans and run summaries.
 */

use comfy_table::{presets, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::{style, StyledObject};

use crate::core::planner::{PlanningFailure, TransferPlan};
use crate::stats::{format_bytes, format_duration, RunSummary, TableCounts};

// ============================================================================
// THEME COLORS
// ============================================================================

/// Brand colors for consistent styling
pub struct Theme;

impl Theme {
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const ARROW_RIGHT: &'static str = "→";
    pub const BULLET: &'static str = "•";
}

/// Draw a section header with a line
pub fn section_header(title: &str) {
    let line_len = 50 - title.len().min(40);
    println!(
        "\n{} {}",
        Theme::header(title),
        Theme::muted("─".repeat(line_len))
    );
}

// ============================================================================
// TABLES
// ============================================================================

pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header_cells(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| {
            Cell::new(name)
                .fg(Color::Cyan)
                .add_attribute(Attribute::Bold)
        })
        .collect()
}

fn number_cell(value: impl ToString) -> Cell {
    Cell::new(value.to_string()).set_alignment(CellAlignment::Right)
}

fn count_row(label: Cell, counts: &TableCounts) -> Vec<Cell> {
    let failed = if counts.failed > 0 {
        number_cell(counts.failed)
            .fg(Color::Red)
            .add_attribute(Attribute::Bold)
    } else {
        number_cell(counts.failed)
    };

    vec![
        label,
        number_cell(counts.copied).fg(Color::Green),
        number_cell(counts.skipped_duplicate),
        number_cell(counts.skipped_policy),
        failed,
        number_cell(format_bytes(counts.bytes_copied)),
    ]
}

/// Per-table outcome counts with a totals row
pub fn summary_table(summary: &RunSummary) -> Table {
    let mut table = create_table();
    table.set_header(header_cells(&[
        "Table",
        "Copied",
        "Skipped (dup)",
        "Skipped (policy)",
        "Failed",
        "Bytes",
    ]));

    for (name, counts) in &summary.tables {
        table.add_row(count_row(Cell::new(name), counts));
    }

    table.add_row(count_row(
        Cell::new("TOTAL").add_attribute(Attribute::Bold),
        &summary.totals(),
    ));

    table
}

/// What `plan` would do, per table
pub fn plan_table(plan: &TransferPlan) -> Table {
    let mut table = create_table();
    table.set_header(header_cells(&[
        "Table",
        "To transfer",
        "Already loaded",
        "Over size limit",
        "Bytes",
    ]));

    for table_plan in &plan.tables {
        table.add_row(vec![
            Cell::new(&table_plan.table),
            number_cell(table_plan.transfers.len()).fg(Color::Green),
            number_cell(table_plan.duplicates.len()),
            number_cell(table_plan.policy_skips.len()).fg(Color::Yellow),
            number_cell(format_bytes(table_plan.planned_bytes())),
        ]);
    }

    for failure in &plan.failures {
        table.add_row(vec![
            Cell::new(&failure.table),
            Cell::new(format!("{} planning failed", Icons::ERROR)).fg(Color::Red),
            number_cell("-"),
            number_cell("-"),
            number_cell("-"),
        ]);
    }

    table
}

/// One line per table that could not be planned
pub fn planning_failure_lines(failures: &[PlanningFailure]) -> Vec<String> {
    failures
        .iter()
        .map(|f| {
            format!(
                "{} {}: {} ({} objects not attempted)",
                Icons::BULLET,
                f.table,
                f.message,
                f.objects
            )
        })
        .collect()
}

/// Print the summary table, failures and the elapsed time
pub fn print_run_summary(summary: &RunSummary) {
    section_header("Ingest Summary");
    println!("{}", summary_table(summary));

    if !summary.planning_failures.is_empty() {
        section_header("Planning Failures");
        for line in planning_failure_lines(&summary.planning_failures) {
            eprintln!("{}", Theme::error(line));
        }
    }

    println!(
        "\n{} {}",
        Theme::muted("Elapsed:"),
        format_duration(summary.duration)
    );

    if summary.has_failures() {
        print_warning("Completed with failures");
    } else {
        print_success("Completed");
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

pub fn print_success(message: &str) {
    println!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

pub fn print_info(message: &str) {
    println!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::CandidateObject;
    use crate::core::executor::{TransferOutcome, TransferStatus};
    use crate::core::planner::TablePlan;
    use crate::core::router::{RoutedObject, TransferPolicy};
    use crate::stats::aggregate;
    use std::time::Duration;

    fn outcome(table: &str, status: TransferStatus, bytes: u64) -> TransferOutcome {
        TransferOutcome {
            key: "k".to_string(),
            table: table.to_string(),
            status,
            error: None,
            bytes,
            strategy: None,
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_summary_table_has_row_per_table_and_total() {
        let outcomes = vec![
            outcome("CSV_FILES", TransferStatus::Copied, 2048),
            outcome("OTHER_FILES", TransferStatus::Failed, 0),
        ];
        let rendered = summary_table(&aggregate(&outcomes)).to_string();

        assert!(rendered.contains("CSV_FILES"));
        assert!(rendered.contains("OTHER_FILES"));
        assert!(rendered.contains("TOTAL"));
        assert!(rendered.contains("2.00 KB"));
    }

    #[test]
    fn test_plan_table_lists_failures() {
        let plan = TransferPlan {
            tables: vec![TablePlan {
                table: "CSV_FILES".to_string(),
                transfers: vec![RoutedObject {
                    object: CandidateObject::new("a.csv", 1024),
                    policy: TransferPolicy::default(),
                }],
                duplicates: Vec::new(),
                policy_skips: vec![CandidateObject::new("huge.csv", 1 << 30)],
            }],
            failures: vec![PlanningFailure {
                table: "BROKEN".to_string(),
                message: "dedup query failed".to_string(),
                objects: 2,
            }],
        };

        let rendered = plan_table(&plan).to_string();
        assert!(rendered.contains("CSV_FILES"));
        assert!(rendered.contains("BROKEN"));
        assert!(rendered.contains("Over size limit"));
        // Skipped objects do not count toward the bytes to move
        assert!(rendered.contains("1.00 KB"));
        assert!(!rendered.contains("1.00 GB"));
    }

    #[test]
    fn test_planning_failure_lines() {
        let lines = planning_failure_lines(&[PlanningFailure {
            table: "T".to_string(),
            message: "boom".to_string(),
            objects: 3,
        }]);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("T: boom"));
        assert!(lines[0].contains("3 objects"));
    }
}
