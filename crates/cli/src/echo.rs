use owo_colors::OwoColorize;

use gleaner_core::{MethodHealthItem, RunReport};

use crate::VERSION;

/// Print a styled banner for verbose mode
pub fn print_banner() {
    eprintln!("\n{} {} {}", "Gleaner".bold().bright_blue(), "v".dimmed(), VERSION.dimmed());
    eprintln!("{}", "Adaptive article extraction\n".dimmed());
}

/// Print a styled step message
pub fn print_step(step: usize, total: usize, message: &str) {
    eprintln!("{} {}", format!("[{step}/{total}]").dimmed(), message.bright_cyan());
}

pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green(), message.bright_green());
}

pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue(), message.bright_blue());
}

pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message.bright_yellow());
}

fn print_row(label: &str, value: impl std::fmt::Display) {
    eprintln!("  {} {}", format!("{label:<20}").dimmed(), value.bright_white());
}

/// Print the run summary table
pub fn print_run_summary(report: &RunReport) {
    eprintln!("\n{}", "═".repeat(60).dimmed());
    eprintln!("{}", "Run Summary".bold().cyan());
    eprintln!("{}", "═".repeat(60).dimmed());

    print_row("Candidates:", report.total_candidates);
    print_row("Fetched:", report.fetched);
    print_row("Extracted:", report.extracted);
    print_row("Already extracted:", report.skipped_existing);
    print_row("PDF skipped:", report.skipped_pdf);
    print_row("Fetch failed:", report.fetch_failed);
    print_row("Extraction failed:", report.extraction_failed);
    if report.cancelled > 0 {
        print_row("Cancelled:", report.cancelled);
    }
    print_row("Coverage:", format!("{:.1}%", report.coverage * 100.0));
    print_row("Duration:", format_duration(report.ended_at - report.started_at));

    if !report.failures.is_empty() {
        eprintln!("\n{}", "Failures".bold().cyan());
        for (reason, count) in &report.failures {
            eprintln!("  {} {}", format!("{count:>5}").bright_red(), reason);
        }
    }
    eprintln!();
}

/// Render the Method Health table
pub fn render_health(items: &[MethodHealthItem]) -> String {
    if items.is_empty() {
        return "No methods with enough attempts yet.\n".to_string();
    }

    let mut out = format!("{:<32} {:<18} {:>8} {:>9}  {}\n", "DOMAIN", "METHOD", "SUCCESS", "ATTEMPTS", "DRIFT");
    for item in items {
        out.push_str(&format!(
            "{:<32} {:<18} {:>7.1}% {:>9}  {}\n",
            item.domain,
            item.method,
            item.success_rate * 100.0,
            item.attempts,
            if item.drift_flag { "yes" } else { "-" }
        ));
    }
    out
}

/// Format a run duration for display
pub fn format_duration(duration: time::Duration) -> String {
    let ms = duration.whole_milliseconds().max(0);
    if ms >= 60_000 {
        format!("{}m {:02}s", ms / 60_000, (ms % 60_000) / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}
