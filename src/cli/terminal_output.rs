//! Terminal display for a running pipeline
//!
//! This module provides `RunDisplay`, the event handler the `run` command
//! registers on the execution engine.
//!
//! # Features
//!
//! - Step headers with progress indicators: `[2/5] Install dependencies`
//! - Live step output when streaming (`--stream`)
//! - A spinner showing the latest output line otherwise
//! - Horizontal separators between jobs
//!
//! # Example
//!
//! ```no_run
//! use localci::cli::terminal_output::RunDisplay;
//! use localci::execution::ExecutionEvent;
//!
//! let display = RunDisplay::new(true);
//! display.on_event(&ExecutionEvent::StepCompleted { step_id: "build/compile".to_string() });
//! ```

use crate::cli::output::format_execution_event;
use crate::execution::ExecutionEvent;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Renders execution events to the terminal
///
/// Shared between the engine's event handler and the caller, so all state
/// sits behind atomics or a mutex.
pub struct RunDisplay {
    stream: bool,
    step_number: AtomicUsize,
    total_steps: AtomicUsize,
    spinner: Mutex<Option<ProgressBar>>,
}

impl RunDisplay {
    /// Create a display; `stream` prints every output line as it arrives
    pub fn new(stream: bool) -> Self {
        Self {
            stream,
            step_number: AtomicUsize::new(0),
            total_steps: AtomicUsize::new(0),
            spinner: Mutex::new(None),
        }
    }

    /// Handle one engine event
    pub fn on_event(&self, event: &ExecutionEvent) {
        match event {
            ExecutionEvent::PipelineStarted { total_steps, .. } => {
                self.total_steps.store(*total_steps, Ordering::SeqCst);
                self.println(event);
            }
            ExecutionEvent::JobStarted { .. } => {
                self.print_separator();
                self.println(event);
            }
            ExecutionEvent::StepStarted { name, .. } => {
                let step_num = self.step_number.fetch_add(1, Ordering::SeqCst) + 1;
                self.print_step_header(step_num, name);
                if !self.stream {
                    self.start_spinner(name);
                }
            }
            ExecutionEvent::StepOutput { line, .. } => {
                if self.stream {
                    println!("  {} {}", style("│").dim(), line);
                    self.flush_stdout();
                } else if let Some(spinner) = self.spinner().as_ref() {
                    spinner.set_message(truncate_line(line, self.width().saturating_sub(8)));
                }
            }
            ExecutionEvent::StepCompleted { .. } | ExecutionEvent::StepFailed { .. } => {
                self.finish_spinner();
                self.println(event);
            }
            _ => self.println(event),
        }
    }

    /// Stop the spinner, if any
    pub fn finish(&self) {
        self.finish_spinner();
    }

    fn spinner(&self) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
        match self.spinner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn start_spinner(&self, name: &str) {
        let spinner = ProgressBar::new_spinner();
        if let Ok(template) = ProgressStyle::default_spinner().template("  {spinner:.green} [{elapsed}] {msg}") {
            spinner.set_style(template);
        }
        spinner.set_message(format!("running {}", name));
        spinner.enable_steady_tick(Duration::from_millis(100));
        *self.spinner() = Some(spinner);
    }

    fn finish_spinner(&self) {
        if let Some(spinner) = self.spinner().take() {
            spinner.finish_and_clear();
        }
    }

    fn println(&self, event: &ExecutionEvent) {
        if let Some(line) = format_execution_event(event) {
            println!("{}", line);
            self.flush_stdout();
        }
    }

    /// Print a step header
    ///
    /// Format: `[N/M] Step Name`
    fn print_step_header(&self, step_num: usize, step_name: &str) {
        let total = self.total_steps.load(Ordering::SeqCst);
        println!(
            "[{}/{}] {}",
            style(step_num).cyan(),
            style(total).dim(),
            style(step_name).bold()
        );
    }

    fn width(&self) -> usize {
        term_size::dimensions_stdout().map(|(w, _)| w).unwrap_or(80)
    }

    /// Horizontal rule spanning the terminal width
    fn print_separator(&self) {
        println!("{}", style("─".repeat(self.width())).dim());
    }

    fn flush_stdout(&self) {
        let _ = io::stdout().flush();
    }
}

/// Cut `line` to at most `max` characters
fn truncate_line(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let mut truncated: String = line.chars().take(max.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}
