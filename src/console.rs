//! Console output formatting with ANSI color support.
//!
//! Provides styled terminal output with automatic TTY detection
//! and respect for the NO_COLOR environment variable. [`Console`] is also
//! the CLI's [`ProgressSink`], rendering run events as a live chapter
//! counter plus warnings.

use crate::events::{ProgressEvent, ProgressSink};
use crate::orchestrator::RunReport;
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// ANSI style codes for terminal formatting.
#[derive(Debug, Clone, Copy)]
pub enum Style {
    Bold,
    Dim,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    Gray,
}

impl Style {
    /// Returns the ANSI escape code for this style.
    fn code(self) -> &'static str {
        match self {
            Style::Bold => "1",
            Style::Dim => "2",
            Style::Red => "31",
            Style::Green => "32",
            Style::Yellow => "33",
            Style::Blue => "34",
            Style::Magenta => "35",
            Style::Cyan => "36",
            Style::Gray => "90",
        }
    }
}

const RESET: &str = "\x1b[0m";

/// Console output handler with color support detection.
#[derive(Debug)]
pub struct Console {
    colors_enabled: bool,
    total: AtomicUsize,
    done: AtomicUsize,
    /// A progress line without a trailing newline is on screen.
    line_open: AtomicBool,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Creates a new Console instance, detecting color support.
    ///
    /// Colors are disabled if:
    /// - The `NO_COLOR` environment variable is set
    /// - stdout is not a terminal (TTY)
    pub fn new() -> Self {
        let colors_enabled = std::env::var("NO_COLOR").is_err() && io::stdout().is_terminal();
        Self::with_colors(colors_enabled)
    }

    /// Creates a Console with colors explicitly enabled or disabled.
    pub fn with_colors(enabled: bool) -> Self {
        Self {
            colors_enabled: enabled,
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            line_open: AtomicBool::new(false),
        }
    }

    /// Applies ANSI styles to text if colors are enabled.
    pub fn style(&self, text: &str, styles: &[Style]) -> String {
        if !self.colors_enabled || styles.is_empty() {
            return text.to_string();
        }

        let codes: Vec<&str> = styles.iter().map(|s| s.code()).collect();
        format!("\x1b[{}m{}{}", codes.join(";"), text, RESET)
    }

    /// Creates a colored label like `[INFO]`.
    pub fn label(&self, label: &str, color: Style) -> String {
        let styled = self.style(label, &[color, Style::Bold]);
        format!("[{}]", styled)
    }

    /// Prints an info message with blue `[INFO]` label.
    pub fn info(&self, message: &str) {
        self.end_progress();
        println!("{} {}", self.label("INFO", Style::Blue), message);
    }

    /// Prints a success message with green `[OK]` label.
    pub fn success(&self, message: &str) {
        self.end_progress();
        println!("{} {}", self.label("OK", Style::Green), message);
    }

    /// Prints a warning message with yellow `[WARN]` label.
    pub fn warning(&self, message: &str) {
        self.end_progress();
        println!("{} {}", self.label("WARN", Style::Yellow), message);
    }

    /// Prints an error message with red `[ERROR]` label.
    pub fn error(&self, message: &str) {
        self.end_progress();
        eprintln!("{} {}", self.label("ERROR", Style::Red), message);
    }

    /// Prints a step message with cyan `[STEP]` label.
    pub fn step(&self, message: &str) {
        self.end_progress();
        println!("{} {}", self.label("STEP", Style::Cyan), message);
    }

    /// Prints a section header in magenta bold.
    pub fn section(&self, message: &str) {
        self.end_progress();
        println!();
        println!("{}", self.style(message, &[Style::Magenta, Style::Bold]));
    }

    /// Returns text styled as muted (dim gray).
    pub fn muted(&self, text: &str) -> String {
        self.style(text, &[Style::Gray, Style::Dim])
    }

    /// Clears the current line (for progress updates).
    pub fn clear_line(&self) {
        if self.colors_enabled {
            print!("\r\x1b[2K");
            let _ = io::stdout().flush();
        }
    }

    /// Prints a progress update on the same line.
    ///
    /// Without colors (not a terminal) every update gets its own line.
    pub fn progress_update(&self, message: &str) {
        if self.colors_enabled {
            self.clear_line();
            print!("{} {}", self.label("..", Style::Cyan), message);
            let _ = io::stdout().flush();
            self.line_open.store(true, Ordering::SeqCst);
        } else {
            println!("{} {}", self.label("..", Style::Cyan), message);
        }
    }

    /// Terminates an open progress line so the next message starts clean.
    fn end_progress(&self) {
        if self.line_open.swap(false, Ordering::SeqCst) {
            println!();
        }
    }

    fn chapter_done(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);
        self.progress_update(&format!("Chapters {}/{}", done, total));
    }

    /// Prints what went wrong during a run, if anything.
    pub fn report(&self, report: &RunReport) {
        self.end_progress();
        if report.is_clean() {
            self.success(&format!("All {} chapters fetched", report.fetched));
            return;
        }

        self.info(&format!("{} chapters fetched", report.fetched));
        if !report.chapter_failures.is_empty() {
            self.warning(&format!(
                "{} chapters are placeholders:",
                report.chapter_failures.len()
            ));
            for failure in &report.chapter_failures {
                println!(
                    "    {} {}",
                    self.style(&format!("#{}", failure.ordinal), &[Style::Bold]),
                    self.muted(&failure.error.to_string())
                );
            }
        }
        if !report.asset_failures.is_empty() {
            self.warning(&format!("{} images dropped:", report.asset_failures.len()));
            for failure in &report.asset_failures {
                println!("    {}", self.muted(&failure.error.to_string()));
            }
        }
        if report.cancelled {
            self.warning(&format!(
                "Cancelled; {} chapters were never fetched",
                report.skipped
            ));
        }
    }
}

impl ProgressSink for Console {
    fn emit(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::NovelResolved { title, site } => {
                self.success(&format!("Found: {} {}", title, self.muted(&format!("({})", site))));
            }
            ProgressEvent::ChaptersDiscovered { total } => {
                self.total.store(*total, Ordering::SeqCst);
                self.done.store(0, Ordering::SeqCst);
                self.success(&format!("Found {} chapters", total));
            }
            ProgressEvent::ChapterStarted { .. } | ProgressEvent::ChapterRetrying { .. } => {}
            ProgressEvent::ChapterFetched { .. } => self.chapter_done(),
            ProgressEvent::ChapterFailed { ordinal, error } => {
                self.warning(&format!("Chapter {} failed: {}", ordinal, error));
                self.chapter_done();
            }
            ProgressEvent::AssetDropped { url, error } => {
                self.warning(&format!("Dropped image {}: {}", url, error));
            }
            ProgressEvent::Cancelled { remaining } => {
                self.warning(&format!("Cancelled with {} chapters left", remaining));
            }
            ProgressEvent::PackageWritten { path } => {
                self.success(&format!("Wrote {}", path.display()));
            }
        }
    }
}
