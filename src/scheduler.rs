// File: scheduler.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use indicatif::ProgressBar;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

use crate::mutations::MutationMap;
use crate::request::Target;
use crate::state::{SmuggleTestRecord, TestKey};

/// Confirmed findings per target, consulted by the stop-after gate.
#[derive(Debug, Default)]
pub struct VulnCounts {
    counts: RwLock<HashMap<String, u32>>,
}

impl VulnCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, target: &str) -> u32 {
        self.counts.read().await.get(target).copied().unwrap_or(0)
    }

    /// True once `target` has `stop_after` findings. Zero never stops.
    pub async fn reached(&self, target: &str, stop_after: u32) -> bool {
        stop_after > 0 && self.count(target).await >= stop_after
    }

    pub async fn increment(&self, target: &str) -> u32 {
        let mut counts = self.counts.write().await;
        let count = counts.entry(target.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Every (target, method, mutation) tuple for targets with a baseline,
/// minus the ones already completed. The timeout of each test is the
/// target's baseline plus `delay`.
pub fn build_matrix(
    targets: &[Target],
    baselines: &HashMap<String, Duration>,
    methods: &[String],
    mutations: &MutationMap,
    completed: &HashSet<TestKey>,
    delay: Duration,
) -> Vec<SmuggleTestRecord> {
    let mut matrix = Vec::with_capacity(targets.len() * methods.len() * mutations.len());
    let mut seen = HashSet::new();

    for target in targets {
        let Some(baseline) = baselines.get(target.key()) else {
            trace!("No baseline for {}, skipping", target);
            continue;
        };
        if !seen.insert(target.key()) {
            continue;
        }
        let timeout = *baseline + delay;

        for method in methods {
            for mutation in mutations.keys() {
                if completed.contains(&TestKey::new(target.key(), method, mutation)) {
                    continue;
                }
                matrix.push(SmuggleTestRecord::new(
                    target.clone(),
                    method,
                    mutation,
                    timeout,
                ));
            }
        }
    }

    matrix
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub skipped: u64,
}

/// Hands out the test matrix in uniformly random order without replacement.
pub struct Dispatcher {
    pool: Vec<SmuggleTestRecord>,
    rng: StdRng,
    stop_after: u32,
    vulns: Arc<VulnCounts>,
    progress: ProgressBar,
}

impl Dispatcher {
    pub fn new(pool: Vec<SmuggleTestRecord>, stop_after: u32, vulns: Arc<VulnCounts>) -> Self {
        Self {
            pool,
            rng: StdRng::from_entropy(),
            stop_after,
            vulns,
            progress: ProgressBar::hidden(),
        }
    }

    /// Skipped records advance `progress` so the bar still ends at the
    /// planned total.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn remaining(&self) -> usize {
        self.pool.len()
    }

    fn pick(&mut self) -> Option<SmuggleTestRecord> {
        if self.pool.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.pool.len());
        Some(self.pool.swap_remove(index))
    }

    async fn gated(&self, record: &SmuggleTestRecord) -> bool {
        self.vulns
            .reached(record.target().key(), self.stop_after)
            .await
    }

    /// Next record that passes the stop-after gate, or `None` once the pool
    /// is drained. Gated records are discarded and counted in `stats`.
    pub async fn next(&mut self, stats: &mut DispatchStats) -> Option<SmuggleTestRecord> {
        while let Some(record) = self.pick() {
            if self.gated(&record).await {
                trace!(
                    "Stop-after reached for {}, skipping {} {}",
                    record.target(),
                    record.method(),
                    record.mutation()
                );
                stats.skipped += 1;
                self.progress.inc(1);
                continue;
            }
            stats.dispatched += 1;
            return Some(record);
        }
        None
    }

    /// Feeds the detection channel until the pool is empty or every worker
    /// has gone away. A slot is reserved before picking so the gate is
    /// consulted as late as possible.
    pub async fn run(mut self, jobs: mpsc::Sender<SmuggleTestRecord>) -> DispatchStats {
        let mut stats = DispatchStats::default();

        loop {
            let Ok(permit) = jobs.reserve().await else {
                debug!("Detection channel closed, {} tests left", self.remaining());
                break;
            };
            match self.next(&mut stats).await {
                Some(record) => permit.send(record),
                None => break,
            }
        }

        debug!(
            "Dispatcher finished: {} dispatched, {} skipped",
            stats.dispatched, stats.skipped
        );
        stats
    }
}
