//! Console progress for the pipeline phases.
//!
//! Each phase gets a bar. In log-only mode bars are hidden and periodic
//! `[PHASE] n/total (pct%)` lines are printed instead, for tail-friendly output.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Global flag for log-only mode (set from args in main)
pub static LOG_ONLY: AtomicBool = AtomicBool::new(false);

pub fn set_log_only(value: bool) {
    LOG_ONLY.store(value, Ordering::Relaxed);
}

pub fn is_log_only() -> bool {
    LOG_ONLY.load(Ordering::Relaxed)
}

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}

/// Create a bar with the pipeline's styling; hidden in log-only mode.
pub fn create_progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if is_log_only() {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else if let Ok(style) = ProgressStyle::default_bar()
        .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} (ETA: {eta})")
    {
        pb.set_style(style.progress_chars("=> "));
    }
    pb.set_message(msg.to_string());
    pb
}

/// Print a progress line every `interval` items, and for the last one.
/// No-op unless log-only mode is on.
pub fn log_progress(phase: &str, current: u64, total: u64, interval: u64) {
    if !is_log_only() || total == 0 {
        return;
    }
    if current % interval.max(1) == 0 || current == total {
        let pct = 100.0 * current as f64 / total as f64;
        eprintln!("[{}] {}/{} ({:.1}%)", phase, current, total, pct);
    }
}

/// Progress of one pipeline phase. Cheap to share between workers.
#[derive(Clone)]
pub struct PhaseProgress {
    label: &'static str,
    bar: ProgressBar,
    total: u64,
    interval: u64,
}

impl PhaseProgress {
    pub fn start(label: &'static str, total: usize) -> Self {
        let total = total as u64;
        Self {
            label,
            bar: create_progress_bar(total, label),
            total,
            interval: (total / 10).max(1),
        }
    }

    /// One item finished, whatever its outcome.
    pub fn tick(&self) {
        self.bar.inc(1);
        log_progress(self.label, self.bar.position(), self.total, self.interval);
    }

    pub fn finish(&self, summary: impl Into<String>) {
        let summary = summary.into();
        self.bar.finish_with_message(summary.clone());
        tracing::info!("{}", summary);
    }
}
