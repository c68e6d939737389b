//! Survey display

use colored::Colorize;
use declarative::{DiffState, DiffSummary, ResourceDiff, group_by_kind};

/// One-line state marker and note for a diff
fn describe(diff: &ResourceDiff) -> (colored::ColoredString, String) {
    match &diff.state {
        DiffState::Satisfied { detail } => ("○".dimmed(), detail.clone()),
        DiffState::Pending { detail } => ("~".yellow(), detail.clone()),
        DiffState::Unknown { error } => ("?".red(), error.clone()),
    }
}

/// Display a survey, grouped by resource kind
///
/// Satisfied resources are counted but only listed when `all` is set.
pub fn display_diff(diffs: &[ResourceDiff], all: bool) {
    let summary = DiffSummary::from_diffs(diffs);

    if !summary.has_changes() && !all {
        println!();
        println!(
            "  {} Host is up to date ({} resources satisfied)",
            "✓".green(),
            summary.satisfied
        );
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Host Diff".bold()
    );
    println!("│");

    for (kind, items) in group_by_kind(diffs) {
        let shown: Vec<&ResourceDiff> = items
            .into_iter()
            .filter(|d| all || !matches!(d.state, DiffState::Satisfied { .. }))
            .collect();
        if shown.is_empty() {
            continue;
        }

        println!("│ {}", kind.label().bold());
        for diff in shown {
            let (symbol, note) = describe(diff);
            println!("│   {} {:<40} {}", symbol, diff.key, note.dimmed());
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} to apply, {} unknown, {} satisfied",
        summary.pending.to_string().yellow().bold(),
        summary.unknown.to_string().red(),
        summary.satisfied.to_string().green()
    );
    println!("└─────────────────────────────────────────────────────┘");
}
