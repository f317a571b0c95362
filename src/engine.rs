// File: engine.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::baseline::{BaselineCalibrator, BASELINE_CEILING};
use crate::checkpoint::{Checkpointer, StateFile};
use crate::config::ScanConfig;
use crate::errors::{ErrorSender, ScanError, ScanResult};
use crate::oracle::ConnectionOracle;
use crate::report::ReportSink;
use crate::request::Target;
use crate::scheduler::{build_matrix, Dispatcher, VulnCounts};
use crate::state::{ScanState, SmuggleTestRecord};
use crate::stats::{ScanStats, StatsSnapshot};
use crate::worker::{BaselineOutcome, JobQueue, Worker, WorkerContext};

/// One scan: read targets, calibrate, run the detection matrix, persist.
pub struct Engine {
    config: ScanConfig,
    state: Arc<ScanState>,
    stats: Arc<ScanStats>,
    report: Arc<ReportSink>,
    vulns: Arc<VulnCounts>,
    oracle: ConnectionOracle,
    baseline_ceiling: Duration,
    seed: Option<u64>,
}

impl Engine {
    pub fn new(config: ScanConfig, state: ScanState, report: ReportSink) -> Self {
        let oracle = ConnectionOracle::new(config.debug());
        Self {
            config,
            state: Arc::new(state),
            stats: Arc::new(ScanStats::new()),
            report: Arc::new(report),
            vulns: Arc::new(VulnCounts::new()),
            oracle,
            baseline_ceiling: BASELINE_CEILING,
            seed: None,
        }
    }

    pub fn with_baseline_ceiling(mut self, ceiling: Duration) -> Self {
        self.baseline_ceiling = ceiling;
        self
    }

    /// Fixes the dispatch order.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn state(&self) -> Arc<ScanState> {
        Arc::clone(&self.state)
    }

    pub async fn run<R>(self, input: R, state_file: Option<StateFile>) -> ScanResult<StatsSnapshot>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        self.config.validate()?;
        self.stats.start();

        let workers = self.config.workers();
        let (err_tx, err_rx) = mpsc::unbounded_channel::<ScanError>();
        let error_consumer = self.spawn_error_consumer(err_rx);

        let checkpointer = state_file
            .map(|file| Checkpointer::new(Arc::clone(&self.state), file, err_tx.clone()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let periodic = checkpointer
            .as_ref()
            .map(|c| c.spawn_periodic(self.config.checkpoint_interval(), stop_rx));

        let (baseline_tx, baseline_rx) = mpsc::channel::<Target>(workers);
        let (baseline_res_tx, baseline_res_rx) = mpsc::unbounded_channel::<BaselineOutcome>();
        let (detect_tx, detect_rx) = mpsc::channel::<SmuggleTestRecord>(1);
        let (result_tx, result_rx) = mpsc::unbounded_channel::<SmuggleTestRecord>();

        let baseline_jobs = JobQueue::new(baseline_rx);
        let detection_jobs = JobQueue::new(detect_rx);
        let mutations = Arc::new(self.config.mutations().clone());
        let headers = Arc::new(self.config.headers().to_vec());

        let mut pool = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = Worker::new(
                id,
                WorkerContext {
                    oracle: self.oracle.clone(),
                    state: Arc::clone(&self.state),
                    vulns: Arc::clone(&self.vulns),
                    mutations: Arc::clone(&mutations),
                    headers: Arc::clone(&headers),
                    stop_after: self.config.stop_after(),
                    max_errors: self.config.max_errors(),
                    errors: err_tx.clone(),
                    stats: Arc::clone(&self.stats),
                    report: Arc::clone(&self.report),
                },
            )
            .with_calibrator(
                BaselineCalibrator::new(self.oracle.clone(), headers.to_vec())
                    .with_ceiling(self.baseline_ceiling),
            );
            pool.push(tokio::spawn(worker.run(
                baseline_jobs.clone(),
                baseline_res_tx.clone(),
                detection_jobs.clone(),
                result_tx.clone(),
            )));
        }
        drop(baseline_res_tx);
        drop(baseline_jobs);
        drop(detection_jobs);

        let reader = self.spawn_input_reader(input, baseline_tx, err_tx.clone());
        let baseline_consumer = self.spawn_baseline_consumer(baseline_res_rx);

        let targets = match reader.await {
            Ok(targets) => targets,
            Err(e) => {
                warn!("Input reader failed: {}", e);
                Vec::new()
            }
        };
        if let Err(e) = baseline_consumer.await {
            warn!("Baseline consumer failed: {}", e);
        }
        info!("Calibration finished for {} targets", targets.len());

        let matrix = build_matrix(
            &targets,
            &self.state.baselines().await,
            self.config.methods(),
            &mutations,
            &self.state.completed_keys().await,
            self.config.delay(),
        );
        info!("{} tests planned", matrix.len());
        self.stats.set_tests_planned(matrix.len() as u64);
        self.report.progress().set_length(matrix.len() as u64);

        let result_consumer = self.spawn_result_consumer(result_rx);

        let mut dispatcher = Dispatcher::new(matrix, self.config.stop_after(), Arc::clone(&self.vulns))
            .with_progress(self.report.progress().clone());
        if let Some(seed) = self.seed {
            dispatcher = dispatcher.with_seed(seed);
        }
        let dispatch = dispatcher.run(detect_tx).await;

        for joined in join_all(pool).await {
            if let Err(e) = joined {
                warn!("Worker task failed: {}", e);
            }
        }
        self.stats
            .record_dispatch(dispatch.dispatched, dispatch.skipped);
        drop(result_tx);
        if let Err(e) = result_consumer.await {
            warn!("Result consumer failed: {}", e);
        }
        self.report.progress().finish_and_clear();

        let _ = stop_tx.send(true);
        if let Some(handle) = periodic {
            let _ = handle.await;
        }
        if let Some(checkpointer) = checkpointer {
            debug!("Final checkpoint");
            checkpointer.checkpoint().await;
        }

        drop(err_tx);
        if let Err(e) = error_consumer.await {
            warn!("Error consumer failed: {}", e);
        }

        self.stats.finish();
        Ok(self.stats.snapshot())
    }

    fn spawn_error_consumer(&self, mut errors: mpsc::UnboundedReceiver<ScanError>) -> JoinHandle<()> {
        let report = Arc::clone(&self.report);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            while let Some(error) = errors.recv().await {
                stats.add_error();
                report.error(&error);
            }
        })
    }

    /// Reads one target per line. A line that is not UTF-8 or not a URL is
    /// reported and skipped. Targets that still need a baseline are
    /// queued for calibration; the returned list is deduplicated.
    fn spawn_input_reader<R>(
        &self,
        mut input: R,
        baseline_jobs: mpsc::Sender<Target>,
        errors: ErrorSender,
    ) -> JoinHandle<Vec<Target>>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let mut targets = Vec::new();
            let mut seen = HashSet::new();
            let mut raw = Vec::new();

            loop {
                raw.clear();
                match input.read_until(b'\n', &mut raw).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = errors.send(ScanError::parse("<input>", e.to_string()));
                        break;
                    }
                }
                let line = match std::str::from_utf8(&raw) {
                    Ok(line) => line,
                    Err(e) => {
                        stats.add_invalid_target();
                        let _ = errors.send(ScanError::parse(
                            String::from_utf8_lossy(&raw).trim(),
                            e.to_string(),
                        ));
                        continue;
                    }
                };
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                let target = match Target::parse(line) {
                    Ok(target) => target,
                    Err(e) => {
                        stats.add_invalid_target();
                        let _ = errors.send(e);
                        continue;
                    }
                };
                if !seen.insert(target.key().to_string()) {
                    continue;
                }
                stats.add_target();
                targets.push(target.clone());

                if state.has_baseline(target.key()).await {
                    stats.add_baseline_reused();
                    continue;
                }
                if baseline_jobs.send(target).await.is_err() {
                    break;
                }
            }

            targets
        })
    }

    fn spawn_baseline_consumer(
        &self,
        mut outcomes: mpsc::UnboundedReceiver<BaselineOutcome>,
    ) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            while let Some(outcome) = outcomes.recv().await {
                if state
                    .record_baseline(outcome.target.key(), outcome.elapsed)
                    .await
                {
                    stats.add_baseline_measured();
                }
            }
        })
    }

    fn spawn_result_consumer(
        &self,
        mut results: mpsc::UnboundedReceiver<SmuggleTestRecord>,
    ) -> JoinHandle<()> {
        let state = Arc::clone(&self.state);
        let stats = Arc::clone(&self.stats);
        let report = Arc::clone(&self.report);
        tokio::spawn(async move {
            while let Some(record) = results.recv().await {
                if record.status().is_vulnerable() {
                    stats.add_finding();
                    if let Err(e) = report.finding(&record) {
                        warn!("Failed to write finding: {}", e);
                    }
                }
                stats.add_completed();
                report.progress().inc(1);
                state.append_result(record).await;
            }
        })
    }
}
