//! Severity-tagged, colored status lines for the operator.
//!
//! Diagnostics go through `tracing`; these lines are the user-facing
//! progress report. Warnings and failures go to stderr.

use colored::Colorize;

/// Severity of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Severity {
    #[strum(serialize = "STEP")]
    Step,
    #[strum(serialize = " OK ")]
    Ok,
    #[strum(serialize = "INFO")]
    Info,
    #[strum(serialize = "WARN")]
    Warn,
    #[strum(serialize = "FAIL")]
    Fail,
}

/// Format a status line without printing it.
pub fn format_line(severity: Severity, message: &str) -> String {
    let tag = format!("[{}]", severity);
    let tag = match severity {
        Severity::Step => tag.cyan().bold(),
        Severity::Ok => tag.green().bold(),
        Severity::Info => tag.dimmed(),
        Severity::Warn => tag.yellow().bold(),
        Severity::Fail => tag.red().bold(),
    };
    format!("{} {}", tag, message)
}

pub fn emit(severity: Severity, message: &str) {
    let line = format_line(severity, message);
    match severity {
        Severity::Warn | Severity::Fail => eprintln!("{}", line),
        _ => println!("{}", line),
    }
}

/// `[STEP] (2/4) Fetching shrink script`
pub fn step(index: usize, total: usize, message: &str) {
    emit(Severity::Step, &format!("({}/{}) {}", index, total, message));
}

pub fn ok(message: &str) {
    emit(Severity::Ok, message);
}

pub fn info(message: &str) {
    emit(Severity::Info, message);
}

pub fn warn(message: &str) {
    emit(Severity::Warn, message);
}

pub fn fail(message: &str) {
    emit(Severity::Fail, message);
}
