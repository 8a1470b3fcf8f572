//! Output utilities for edge-identity.
//!
//! Command results go to stdout; diagnostics go through `tracing` on stderr.

use anyhow::{Context, Result};
use serde::Serialize;

/// Print an error message to stderr with red color
pub fn print_error(message: &str) {
    eprintln!("\x1b[31mERROR:\x1b[0m {}", message);
}

/// Print a success message to stdout with green color
pub fn print_success(message: &str) {
    println!("\x1b[32mSUCCESS:\x1b[0m {}", message);
}

/// Print an info message to stdout with blue color
pub fn print_info(message: &str) {
    println!("\x1b[34mINFO:\x1b[0m {}", message);
}

/// Print a warning message to stdout with yellow color
pub fn print_warning(message: &str) {
    println!("\x1b[33mWARNING:\x1b[0m {}", message);
}

/// Print a message without any color formatting
pub fn print_plain(message: &str) {
    println!("{}", message);
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}
