//! Step and per-tile timing.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

/// Aggregate of per-tile inference durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TileTimings {
    pub count: usize,
    pub total_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
}

impl TileTimings {
    pub fn record(&mut self, duration: Duration) {
        let secs = duration.as_secs_f64();
        if self.count == 0 {
            self.min_secs = secs;
            self.max_secs = secs;
        } else {
            self.min_secs = self.min_secs.min(secs);
            self.max_secs = self.max_secs.max(secs);
        }
        self.count += 1;
        self.total_secs += secs;
    }

    pub fn average_secs(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_secs / self.count as f64
        }
    }

    pub fn tiles_per_second(&self) -> f64 {
        if self.total_secs > 0.0 {
            self.count as f64 / self.total_secs
        } else {
            0.0
        }
    }

    /// Seconds left for `remaining` tiles at the current average.
    pub fn eta_secs(&self, remaining: usize) -> f64 {
        self.average_secs() * remaining as f64
    }
}

/// Named wall-clock steps of one run (load, decode, upscale, encode).
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    steps: Vec<(String, Duration)>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` and record its duration under `step`.
    pub fn time<T>(&mut self, step: &str, f: impl FnOnce() -> T) -> T {
        let started = Instant::now();
        let value = f();
        self.record(step, started.elapsed());
        value
    }

    /// Add `duration` to `step`, merging repeated steps.
    pub fn record(&mut self, step: &str, duration: Duration) {
        match self.steps.iter_mut().find(|(name, _)| name == step) {
            Some((_, total)) => *total += duration,
            None => self.steps.push((step.to_string(), duration)),
        }
    }

    pub fn steps(&self) -> &[(String, Duration)] {
        &self.steps
    }

    pub fn total(&self) -> Duration {
        self.steps.iter().map(|(_, d)| *d).sum()
    }

    /// Plain-text table of steps with seconds and share of the total.
    pub fn summary(&self) -> String {
        let total = self.total().as_secs_f64();
        let width = self
            .steps
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0)
            .max("total".len());

        let mut out = String::new();
        for (name, duration) in &self.steps {
            let secs = duration.as_secs_f64();
            let percent = if total > 0.0 { secs / total * 100.0 } else { 0.0 };
            let _ = writeln!(out, "{name:<width$}  {secs:>9.3}s  {percent:>5.1}%");
        }
        let _ = writeln!(out, "{:<width$}  {total:>9.3}s  100.0%", "total");
        out
    }

    pub fn log_summary(&self) {
        for (name, duration) in &self.steps {
            info!(step = %name, secs = duration.as_secs_f64(), "Timing");
        }
        info!(secs = self.total().as_secs_f64(), "Total time");
    }
}
