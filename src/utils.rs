use crate::pipeline::Warning;
use colored::Colorize;
use std::path::Path;
use std::time::Duration;

pub struct FetchTimings {
    pub total: Duration,
    pub read: Duration,
    pub transform: Duration,
    pub tokens: Duration,
}

pub fn format_duration(d: Duration) -> String {
    let time_us = d.as_micros();
    if time_us < 1000 {
        format!("{}µs", time_us)
    } else if time_us < 1_000_000 {
        format!("{:.2}ms", time_us as f64 / 1000.0)
    } else {
        format!("{:.2}s", time_us as f64 / 1_000_000.0)
    }
}

/// `path` relative to the working directory when it lies below it.
pub fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}

pub fn log_warning(path: &Path, warning: &Warning) {
    eprintln!(
        "{} {}:{}:{} {}",
        "warning".yellow().bold(),
        display_path(path).blue(),
        warning.line,
        warning.column,
        warning.message.yellow(),
    );
}

pub fn log_transform(path: &Path, token_count: usize, live: bool, timings: FetchTimings) {
    let mut details = vec![format!("Total: {}", format_duration(timings.total).bold())];
    if timings.read.as_nanos() > 0 {
        details.push(format!("Read: {}", format_duration(timings.read)));
    }
    if timings.transform.as_nanos() > 0 {
        details.push(format!("Transform: {}", format_duration(timings.transform)));
    }
    if timings.tokens.as_nanos() > 0 {
        details.push(format!("Tokens: {}", format_duration(timings.tokens)));
    }
    let icon = if live { "↻" } else { "✓" };

    eprintln!(
        "{} {} {} {}",
        icon.bright_green().bold(),
        display_path(path).blue(),
        format!("({} tokens)", token_count).magenta(),
        format!("· ({})", details.join(", ")).green(),
    );
}
