// src/host/profiler.rs
//! Per-runtime, per-function call profiling
//!
//! Every dispatch through the orchestrator is timed here. Aggregates are kept
//! in-process for `report()` and mirrored to the `metrics` facade.

use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Aggregated timings for one `runtime.function` key
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallMetrics {
    pub runtime: String,
    pub call_count: u64,
    pub total_duration: Duration,
    pub average_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub error_count: u64,
    pub last_called: DateTime<Utc>,
}

impl CallMetrics {
    fn first(runtime: &str, duration: Duration) -> Self {
        Self {
            runtime: runtime.to_string(),
            call_count: 0,
            total_duration: Duration::ZERO,
            average_duration: Duration::ZERO,
            min_duration: duration,
            max_duration: duration,
            error_count: 0,
            last_called: Utc::now(),
        }
    }
}

/// Call profiler
pub struct Profiler {
    metrics: RwLock<HashMap<String, CallMetrics>>,
    enabled: AtomicBool,
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

fn key(runtime: &str, function: &str) -> String {
    format!("{}.{}", runtime, function)
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

impl Profiler {
    /// Create an enabled profiler
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Await `fut`, recording its duration and outcome under `runtime.function`
    pub async fn track<T, F>(&self, runtime: &str, function: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.is_enabled() {
            return fut.await;
        }

        let start = Instant::now();
        let result = fut.await;
        self.record(runtime, function, start.elapsed(), result.as_ref().err().map(|e| e.as_label()));
        result
    }

    fn record(&self, runtime: &str, function: &str, duration: Duration, error: Option<&'static str>) {
        let outcome = error.unwrap_or("ok");
        metrics::counter!(
            "polyhost_calls_total",
            "runtime" => runtime.to_string(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("polyhost_call_duration_seconds", "runtime" => runtime.to_string())
            .record(duration.as_secs_f64());

        let mut table = self.metrics.write();
        let entry = table
            .entry(key(runtime, function))
            .or_insert_with(|| CallMetrics::first(runtime, duration));

        entry.call_count = entry.call_count.saturating_add(1);
        entry.total_duration = entry.total_duration.saturating_add(duration);
        entry.average_duration = average(entry.total_duration, entry.call_count);
        entry.min_duration = entry.min_duration.min(duration);
        entry.max_duration = entry.max_duration.max(duration);
        entry.last_called = Utc::now();
        if error.is_some() {
            entry.error_count += 1;
        }
    }

    /// Metrics for one function, if it has been called
    pub fn metrics_for(&self, runtime: &str, function: &str) -> Option<CallMetrics> {
        self.metrics.read().get(&key(runtime, function)).cloned()
    }

    /// Snapshot of every key
    pub fn all_metrics(&self) -> HashMap<String, CallMetrics> {
        self.metrics.read().clone()
    }

    pub fn reset(&self) {
        self.metrics.write().clear();
    }

    /// Human-readable summary, sorted by key
    pub fn report(&self) -> String {
        let table = self.metrics.read();
        if table.is_empty() {
            return "No profiling data collected".to_string();
        }

        let mut keys: Vec<&String> = table.keys().collect();
        keys.sort();

        let mut report = String::from("Performance Report\n==================\n\n");
        for key in keys {
            let m = &table[key];
            let _ = writeln!(report, "{}:", key);
            let _ = writeln!(report, "  Calls:  {}", m.call_count);
            let _ = writeln!(report, "  Total:  {:?}", m.total_duration);
            let _ = writeln!(report, "  Avg:    {:?}", m.average_duration);
            let _ = writeln!(report, "  Min:    {:?}", m.min_duration);
            let _ = writeln!(report, "  Max:    {:?}", m.max_duration);
            let _ = writeln!(report, "  Errors: {}", m.error_count);
            report.push('\n');
        }
        report
    }
}
