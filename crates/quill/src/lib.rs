//! Quill - leveled logging for the engram tools
//!
//! All output goes to stderr so command output on stdout stays pipeable.
//! Multi-line messages keep their prefix on every line.
//!
//! Standard functions: `info()`, `warn()`, `error()`, `success()`, `verbose()`
//!
//! `verbose()` is silent unless `ENGRAM_VERBOSE` is set in the environment.

use chrono::Local;
use colored::*;

/// Core output function; one prefixed line per input line
pub fn log(message: &str) {
  for line in message.lines() {
    eprintln!("{line}");
  }
}

fn format_prefix(color: Color, prefix: &str) -> String {
  format!("[{}]{:<width$}", prefix.color(color).bold(), "", width = 7 - prefix.len() - 2)
}

fn emit(color: Color, prefix: &str, message: &str) {
  let prefix = format_prefix(color, prefix);
  for line in message.lines() {
    log(&format!("{prefix} {line}"));
  }
}

/// Info level - general information
pub fn info(message: &str) {
  emit(Color::Blue, "info", message);
}

/// Warning level - something needs attention
pub fn warn(message: &str) {
  emit(Color::Yellow, "warn", message);
}

/// Error level - something went wrong
pub fn error(message: &str) {
  emit(Color::Red, "error", message);
}

/// Success level - something completed successfully
pub fn success(message: &str) {
  emit(Color::Green, "sccs", message);
}

/// Verbose level - diagnostic chatter, off by default
pub fn verbose(message: &str) {
  if std::env::var("ENGRAM_VERBOSE").is_ok() {
    emit(Color::Cyan, "verb", message);
  }
}

/// Timestamped event line, used by the daemon's connection log
pub fn event(message: &str) {
  let timestamp = Local::now().format("%H:%M:%S").to_string();
  let prefix = format!("[{}] [{}]", "event".blue().bold(), timestamp.cyan());
  for line in message.lines() {
    log(&format!("{prefix} {line}"));
  }
}

#[macro_export]
macro_rules! info {
  ($($arg:tt)*) => {
    $crate::info(&format!($($arg)*))
  };
}

#[macro_export]
macro_rules! warn {
  ($($arg:tt)*) => {
    $crate::warn(&format!($($arg)*))
  };
}

#[macro_export]
macro_rules! error {
  ($($arg:tt)*) => {
    $crate::error(&format!($($arg)*))
  };
}

#[macro_export]
macro_rules! success {
  ($($arg:tt)*) => {
    $crate::success(&format!($($arg)*))
  };
}

#[macro_export]
macro_rules! verbose {
  ($($arg:tt)*) => {
    $crate::verbose(&format!($($arg)*))
  };
}

#[macro_export]
macro_rules! event {
  ($($arg:tt)*) => {
    $crate::event(&format!($($arg)*))
  };
}
