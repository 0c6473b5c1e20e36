//! Progress bar for deploy execution.

use converge::{OperationOutcome, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};

use crate::ui;

/// Draws one bar per operation and prints host outcomes above it.
pub struct BarProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl BarProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }
}

impl ProgressCallback for BarProgress {
    fn on_operation_start(&mut self, name: &str, hosts: usize) {
        if self.quiet {
            return;
        }
        println!();
        println!("{}", ui::truncate(&format!("--> {name}"), 100));
        let bar = ProgressBar::new(hosts as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        self.bar = Some(bar);
    }

    fn on_host_complete(&mut self, _name: &str, host: &str, outcome: &OperationOutcome) {
        if self.quiet && outcome.is_success() {
            return;
        }
        let line = ui::outcome_line(host, outcome);
        match &self.bar {
            Some(bar) => {
                bar.suspend(|| println!("    {line}"));
                bar.inc(1);
            }
            None => println!("    {line}"),
        }
    }

    fn on_operation_complete(&mut self, _name: &str) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
