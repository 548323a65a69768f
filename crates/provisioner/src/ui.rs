//! UI helpers for the provisioner CLI.
//!
//! Provides consistent formatting for console output during provisioning.

use colored::Colorize;

/// Print the provisioner banner.
pub fn print_banner() {
    println!();
    println!(
        "{}",
        r"
  ____                 _     _
 |  _ \ _ __ _____   _(_)___(_) ___  _ __
 | |_) | '__/ _ \ \ / / / __| |/ _ \| '_ \
 |  __/| | | (_) \ V /| \__ \ | (_) | | | |
 |_|   |_|  \___/ \_/ |_|___/_|\___/|_| |_|
"
        .cyan()
    );
    println!("  {}", "Idempotent Host Provisioning".bright_black());
    println!();
}

/// Print a section header.
pub fn print_section(title: &str) {
    println!();
    println!("{}", "═".repeat(70).bright_black());
    println!("{}", title.cyan().bold());
    println!("{}", "═".repeat(70).bright_black());
    println!();
}

/// Print a progress step with step number.
pub fn print_progress_step(current: usize, total: usize, message: &str) {
    println!(
        "{} {} {}",
        format!("[{current}/{total}]").bright_black(),
        "▶".cyan(),
        message.bold()
    );
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print a fatal error line prefixed with the local time.
pub fn print_fatal(message: &str) {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    eprintln!(
        "{} {} {}",
        format!("[{stamp}]").bright_black(),
        "✗ ERROR:".red().bold(),
        message.red()
    );
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a skipped-stage note.
pub fn print_skip(message: &str) {
    println!("  {} {}", "↷".bright_black(), message.bright_black());
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Print a list item.
pub fn print_list_item(item: &str) {
    println!("  {} {item}", "•".bright_black());
}
