use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal output for the CLI. Results go to stdout, chatter to stderr.
#[derive(Debug, Clone)]
pub struct UIManager {
    colors_enabled: bool,
    quiet: bool,
}

impl UIManager {
    pub fn new(colors_enabled: bool) -> Self {
        colored::control::set_override(colors_enabled);
        Self {
            colors_enabled,
            quiet: false,
        }
    }

    /// Suppress headers and progress, e.g. for JSON output.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn colors_enabled(&self) -> bool {
        self.colors_enabled
    }

    pub fn print_header(&self, title: &str) {
        if !self.quiet {
            eprintln!("\n{}", title.bold().underline());
        }
    }

    pub fn print_info(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", "•".blue(), message);
        }
    }

    pub fn print_success(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", "✓".green().bold(), message);
        }
    }

    pub fn print_warning(&self, message: &str) {
        eprintln!("{} {}", "!".yellow().bold(), message.yellow());
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    /// Progress bar over `total` files; hidden when quiet.
    pub fn create_build_progress(&self, total: u64) -> ProgressBar {
        if self.quiet {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({per_sec}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}
