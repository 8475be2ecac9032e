//! CLI output formatting

use crate::core::{RunSummary, StepDefinition, StepError};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static PICTURE: Emoji<'_, '_> = Emoji("🖼️  ", "# ");

/// Create a progress bar over the steps of a run
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Horizontal rule as wide as the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width)
}

/// One line of `steps list`
pub fn format_step_definition(position: usize, step: &StepDefinition) -> String {
    let status = if step.enabled {
        style("enabled").green().to_string()
    } else {
        style("disabled").dim().to_string()
    };
    format!(
        "{:>3}. {} {} [{}]",
        position,
        style(short_id(&step.id)).dim(),
        style(&step.name).bold(),
        status
    )
}

/// Step code indented under its list entry
pub fn format_code(code: &str) -> String {
    code.lines()
        .map(|line| format!("       {}", style(line).dim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// First eight characters of an id
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((end, _)) => &id[..end],
        None => id,
    }
}

pub fn format_step_error(error: &StepError) -> String {
    style(error.to_string()).red().to_string()
}

/// Closing summary of a run
pub fn format_summary(summary: &RunSummary) -> String {
    let icon = if summary.superseded {
        WARN
    } else if summary.has_errors() {
        CROSS
    } else {
        CHECK
    };

    let mut line = format!(
        "{}Run {} - {} images, {}/{} steps",
        icon,
        style(short_id(&summary.run_id.to_string())).dim(),
        style(summary.image_count).cyan(),
        summary.steps_run,
        summary.total_steps
    );
    if let Some(finished) = summary.finished_at {
        if let Ok(duration) = finished.signed_duration_since(summary.started_at).to_std() {
            line.push_str(&format!(" in {}", style(format_duration(duration)).dim()));
        }
    }
    if summary.superseded {
        line.push_str(&format!(" ({})", style("superseded").yellow()));
    }
    for error in &summary.errors {
        let target = match &error.label {
            Some(label) => format!("{} on '{}'", error.step_name, label),
            None => error.step_name.clone(),
        };
        line.push_str(&format!(
            "\n   {} {}: {}",
            CROSS,
            style(target).bold(),
            style(&error.message).red()
        ));
    }
    line
}

pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.1}s", duration.as_secs_f64())
        } else {
            format!("{}m {}s", secs / 60, secs % 60)
        }
    }
}
