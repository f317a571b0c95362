// File: stats.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters shared by every task of a scan.
#[derive(Debug, Default)]
pub struct ScanStats {
    targets: AtomicU64,
    invalid_targets: AtomicU64,
    baselines_measured: AtomicU64,
    baselines_reused: AtomicU64,
    baseline_failures: AtomicU64,
    tests_planned: AtomicU64,
    tests_dispatched: AtomicU64,
    tests_skipped: AtomicU64,
    tests_dropped: AtomicU64,
    tests_completed: AtomicU64,
    findings: AtomicU64,
    errors: AtomicU64,
    start_time: Mutex<Option<DateTime<Utc>>>,
    end_time: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub targets: u64,
    pub invalid_targets: u64,
    pub baselines_measured: u64,
    pub baselines_reused: u64,
    pub baseline_failures: u64,
    pub tests_planned: u64,
    pub tests_dispatched: u64,
    pub tests_skipped: u64,
    pub tests_dropped: u64,
    pub tests_completed: u64,
    pub findings: u64,
    pub errors: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        if let Ok(mut start) = self.start_time.lock() {
            *start = Some(Utc::now());
        }
    }

    pub fn finish(&self) {
        if let Ok(mut end) = self.end_time.lock() {
            *end = Some(Utc::now());
        }
    }

    pub fn add_target(&self) {
        self.targets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_invalid_target(&self) {
        self.invalid_targets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_baseline_measured(&self) {
        self.baselines_measured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_baseline_reused(&self) {
        self.baselines_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_baseline_failure(&self) {
        self.baseline_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_tests_planned(&self, planned: u64) {
        self.tests_planned.store(planned, Ordering::Relaxed);
    }

    /// A test a worker turned away at the stop-after gate.
    pub fn add_skipped(&self) {
        self.tests_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Totals from the dispatcher, recorded once the pool has drained.
    /// Tests already skipped by a worker were handed out but never run, so
    /// they move from dispatched to skipped.
    pub fn record_dispatch(&self, dispatched: u64, skipped: u64) {
        let late = self.tests_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.tests_dispatched
            .store(dispatched.saturating_sub(late), Ordering::Relaxed);
    }

    pub fn add_dropped(&self) {
        self.tests_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_completed(&self) {
        self.tests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_finding(&self) {
        self.findings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            targets: self.targets.load(Ordering::Relaxed),
            invalid_targets: self.invalid_targets.load(Ordering::Relaxed),
            baselines_measured: self.baselines_measured.load(Ordering::Relaxed),
            baselines_reused: self.baselines_reused.load(Ordering::Relaxed),
            baseline_failures: self.baseline_failures.load(Ordering::Relaxed),
            tests_planned: self.tests_planned.load(Ordering::Relaxed),
            tests_dispatched: self.tests_dispatched.load(Ordering::Relaxed),
            tests_skipped: self.tests_skipped.load(Ordering::Relaxed),
            tests_dropped: self.tests_dropped.load(Ordering::Relaxed),
            tests_completed: self.tests_completed.load(Ordering::Relaxed),
            findings: self.findings.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            start_time: self.start_time.lock().ok().and_then(|t| *t),
            end_time: self.end_time.lock().ok().and_then(|t| *t),
        }
    }
}

impl StatsSnapshot {
    pub fn elapsed_ms(&self) -> i64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).num_milliseconds(),
            _ => 0,
        }
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stamp = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string())
        };

        writeln!(
            f,
            "{} targets ({} invalid). Baselines: {} measured, {} reused, {} failed.",
            self.targets,
            self.invalid_targets,
            self.baselines_measured,
            self.baselines_reused,
            self.baseline_failures
        )?;
        writeln!(
            f,
            "{} tests planned, {} dispatched, {} skipped (stop-after), {} dropped (max-errors), {} completed.",
            self.tests_planned,
            self.tests_dispatched,
            self.tests_skipped,
            self.tests_dropped,
            self.tests_completed
        )?;
        write!(
            f,
            "Findings: {}. Errors: {}. Started at {} / Ended at {}. {} ms.",
            self.findings,
            self.errors,
            stamp(self.start_time),
            stamp(self.end_time),
            self.elapsed_ms()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_stats_are_empty() {
        let snapshot = ScanStats::new().snapshot();
        assert_eq!(snapshot, StatsSnapshot::default());
        assert_eq!(snapshot.elapsed_ms(), 0);
    }

    #[tokio::test]
    async fn test_counters_from_many_tasks() {
        let stats = Arc::new(ScanStats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    stats.add_completed();
                }
                stats.add_finding();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tests_completed, 800);
        assert_eq!(snapshot.findings, 8);
    }

    #[test]
    fn test_summary_mentions_counts() {
        let stats = ScanStats::new();
        stats.start();
        stats.add_target();
        stats.add_baseline_measured();
        stats.set_tests_planned(4);
        stats.record_dispatch(3, 1);
        stats.finish();

        let summary = stats.snapshot().to_string();
        assert!(summary.contains("1 targets"));
        assert!(summary.contains("4 tests planned, 3 dispatched, 1 skipped"));
        assert!(stats.snapshot().elapsed_ms() >= 0);
    }

    #[test]
    fn test_worker_skips_are_not_dispatched() {
        let stats = ScanStats::new();
        stats.set_tests_planned(6);
        stats.add_skipped();
        stats.add_skipped();
        stats.record_dispatch(4, 2);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tests_dispatched, 2);
        assert_eq!(snapshot.tests_skipped, 4);
        assert_eq!(
            snapshot.tests_dispatched + snapshot.tests_skipped,
            snapshot.tests_planned
        );
    }
}
