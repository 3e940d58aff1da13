//! Terminal progress bars behind the core's reporter seam.

use indicatif::{ProgressBar, ProgressStyle};
use relic_core::ProgressReporter;

/// `indicatif` implementation of [`ProgressReporter`]; hidden automatically
/// on non-interactive terminals.
pub struct BarProgress {
    bar: Option<ProgressBar>,
    message: &'static str,
}

impl BarProgress {
    pub fn new(message: &'static str) -> Self {
        Self { bar: None, message }
    }
}

impl ProgressReporter for BarProgress {
    fn begin(&mut self, total: u64) {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        bar.set_message(self.message);
        self.bar = Some(bar);
    }

    fn advance(&mut self, n: u64) {
        if let Some(bar) = &self.bar {
            bar.inc(n);
        }
    }

    fn end(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
