//! Progress display for runs
//!
//! While a bar is on screen, console log lines go through [`ConsoleWriter`],
//! which clears the bar for the duration of the write and redraws it after.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use is_terminal::IsTerminal;
use rulegen_core::ProgressCallback;

/// Bar currently drawn on stderr, if any.
static ACTIVE_BAR: Mutex<Option<ProgressBar>> = Mutex::new(None);

fn set_active(bar: Option<ProgressBar>) {
    *ACTIVE_BAR.lock().unwrap_or_else(PoisonError::into_inner) = bar;
}

fn active() -> Option<ProgressBar> {
    ACTIVE_BAR
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

fn with_bar_suspended<R>(f: impl FnOnce() -> R) -> R {
    match active() {
        Some(bar) => bar.suspend(f),
        None => f(),
    }
}

/// Stderr writer for the console log layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleWriter;

impl Write for ConsoleWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        with_bar_suspended(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        // One event is one buffer; keep it in a single suspension.
        with_bar_suspended(|| io::stderr().lock().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Progress bar fed by the scheduler's `(completed, total)` callback.
///
/// Hidden when stderr is not a terminal or output is quiet.
#[derive(Clone)]
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// Bar for `total` jobs. Console logging is routed around it until
    /// [`finish`](Self::finish).
    pub fn new(total: usize, quiet: bool) -> Self {
        let bar = ProgressBar::new(total as u64);
        if quiet || !std::io::stderr().is_terminal() {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} libraries ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        set_active(Some(bar.clone()));
        Self { bar }
    }

    /// Callback to hand to the scheduler.
    pub fn callback(&self) -> ProgressCallback {
        let bar = self.bar.clone();
        Arc::new(move |completed, total| {
            bar.set_length(total as u64);
            bar.set_position(completed as u64);
        })
    }

    /// Position shown on the bar.
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Remove the bar from the terminal.
    pub fn finish(&self) {
        set_active(None);
        self.bar.finish_and_clear();
    }
}
