//! CLI Output Formatting Module
//! Provides consistent, colorized output for terminal UX

use colored::{ColoredString, Colorize};

use crate::engine::context::Context;
use crate::engine::state::BranchState;

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.len()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a list item
    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Print a table header
    pub fn table_header(columns: &[&str]) {
        let header = columns
            .iter()
            .map(|c| c.bright_white().bold().to_string())
            .collect::<Vec<_>>()
            .join(" │ ");
        println!("  {}", header);
        println!("  {}", "─".repeat(header.len()).bright_black());
    }

    /// Print a table row
    pub fn table_row(values: &[&str]) {
        println!("  {}", values.join(" │ "));
    }

    /// Print an empty line
    pub fn blank() {
        println!();
    }

    pub fn state(state: BranchState) -> ColoredString {
        match state {
            BranchState::Wip => state.as_str().yellow().bold(),
            BranchState::Merged => state.as_str().green().bold(),
            BranchState::Deleted => state.as_str().red().bold(),
            BranchState::Unknown => state.as_str().bright_black(),
        }
    }

    pub fn context(context: Context) -> ColoredString {
        match context {
            Context::Local => context.as_str().green().bold(),
            Context::Hybrid => context.as_str().yellow().bold(),
            Context::Remote => context.as_str().magenta().bold(),
        }
    }
}

/// Format an elapsed time in milliseconds
pub fn format_duration(millis: i64) -> String {
    let millis = millis.max(0);
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1000.0)
    } else {
        let seconds = millis / 1000;
        format!("{}m {}s", seconds / 60, seconds % 60)
    }
}

/// Pad `text` to `width` columns; table cells are padded before coloring
pub fn pad(text: &str, width: usize) -> String {
    format!("{:<width$}", text, width = width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(-5), "0ms");
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(90_000), "1m 30s");
    }

    #[test]
    fn test_pad() {
        assert_eq!(pad("WIP", 6), "WIP   ");
        assert_eq!(pad("feature/login", 4), "feature/login");
    }

    #[test]
    fn test_state_label_text() {
        colored::control::set_override(false);
        assert_eq!(CliFormatter::state(BranchState::Merged).to_string(), "MERGED");
        assert_eq!(CliFormatter::context(Context::Hybrid).to_string(), "HYBRID");
    }
}
