// File: worker.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2023-2025
// - Volker Schwaberow <volker@schwaberow.de>

use log::{debug, trace};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::baseline::BaselineCalibrator;
use crate::errors::{ErrorSender, ScanError, ScanResult};
use crate::mutations::MutationMap;
use crate::oracle::ConnectionOracle;
use crate::report::ReportSink;
use crate::request::{build, DesyncType, Phase, Target};
use crate::scheduler::VulnCounts;
use crate::state::{ScanState, SmuggleTestRecord, TestStatus};
use crate::stats::ScanStats;

/// A receiver shared by the whole pool. Whoever is free takes the next job.
pub struct JobQueue<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for JobQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> JobQueue<T> {
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(receiver)),
        }
    }

    pub async fn next(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}

#[derive(Debug)]
pub struct BaselineOutcome {
    pub target: Target,
    pub elapsed: Duration,
}

/// Everything a worker shares with the rest of the pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub oracle: ConnectionOracle,
    pub state: Arc<ScanState>,
    pub vulns: Arc<VulnCounts>,
    pub mutations: Arc<MutationMap>,
    pub headers: Arc<Vec<String>>,
    pub stop_after: u32,
    pub max_errors: u32,
    pub errors: ErrorSender,
    pub stats: Arc<ScanStats>,
    pub report: Arc<ReportSink>,
}

#[derive(Clone)]
pub struct Worker {
    id: usize,
    ctx: WorkerContext,
    calibrator: BaselineCalibrator,
}

impl Worker {
    pub fn new(id: usize, ctx: WorkerContext) -> Self {
        let calibrator = BaselineCalibrator::new(ctx.oracle.clone(), ctx.headers.to_vec());
        Self {
            id,
            ctx,
            calibrator,
        }
    }

    pub fn with_calibrator(mut self, calibrator: BaselineCalibrator) -> Self {
        self.calibrator = calibrator;
        self
    }

    /// Calibration jobs until that queue closes, then detection jobs until
    /// that one closes too.
    pub async fn run(
        self,
        baseline_jobs: JobQueue<Target>,
        baseline_results: mpsc::UnboundedSender<BaselineOutcome>,
        detection_jobs: JobQueue<SmuggleTestRecord>,
        detection_results: mpsc::UnboundedSender<SmuggleTestRecord>,
    ) {
        self.run_baselines(baseline_jobs, baseline_results).await;
        self.run_detection(detection_jobs, detection_results).await;
        trace!("Worker {} finished", self.id);
    }

    pub async fn run_baselines(
        &self,
        jobs: JobQueue<Target>,
        results: mpsc::UnboundedSender<BaselineOutcome>,
    ) {
        while let Some(target) = jobs.next().await {
            match self.calibrator.measure(&target).await {
                Ok(elapsed) => {
                    self.ctx.report.verbose(format!(
                        "Baseline for {}: {}ms",
                        target,
                        elapsed.as_millis()
                    ));
                    let _ = results.send(BaselineOutcome { target, elapsed });
                }
                Err(e) => {
                    self.ctx.stats.add_baseline_failure();
                    let _ = self.ctx.errors.send(e);
                }
            }
        }
    }

    pub async fn run_detection(
        &self,
        jobs: JobQueue<SmuggleTestRecord>,
        results: mpsc::UnboundedSender<SmuggleTestRecord>,
    ) {
        while let Some(record) = jobs.next().await {
            if self.stop_after_reached(record.target()).await {
                trace!(
                    "Worker {} skipping {} {} {}: stop-after reached",
                    self.id,
                    record.method(),
                    record.target(),
                    record.mutation()
                );
                self.ctx.stats.add_skipped();
                self.ctx.report.progress().inc(1);
                continue;
            }
            if let Some(record) = self.detect(record).await {
                let _ = results.send(record);
            }
        }
    }

    /// The dispatcher checks the gate before queueing, but a finding may
    /// land while the record waits in the channel.
    async fn stop_after_reached(&self, target: &Target) -> bool {
        self.ctx
            .vulns
            .reached(target.key(), self.ctx.stop_after)
            .await
    }

    async fn over_error_budget(&self, target: &Target) -> bool {
        self.ctx.max_errors > 0
            && self.ctx.state.error_count(target.key()).await >= self.ctx.max_errors
    }

    /// Runs CL.TE then TE.CL on one record. A confirmed CL.TE ends the
    /// record without sending the TE.CL pair. Returns `None` when the
    /// target is over its error budget and nothing was sent.
    pub async fn detect(&self, mut record: SmuggleTestRecord) -> Option<SmuggleTestRecord> {
        if self.over_error_budget(record.target()).await {
            trace!(
                "Dropping {} {} {}: error budget exhausted",
                record.method(),
                record.target(),
                record.mutation()
            );
            self.ctx.stats.add_dropped();
            self.ctx.report.progress().inc(1);
            return None;
        }

        self.ctx.report.verbose(format!(
            "Testing {} {} {} (timeout {}ms)",
            record.method(),
            record.target(),
            record.mutation(),
            record.timeout().as_millis()
        ));

        let Some(te) = self.ctx.mutations.get(record.mutation()).cloned() else {
            let _ = self
                .ctx
                .errors
                .send(ScanError::UnknownMutation(record.mutation().to_string()));
            record.resolve(TestStatus::Error);
            return Some(record);
        };

        let mut failed_stages = 0;
        for desync_type in [DesyncType::Clte, DesyncType::Tecl] {
            if failed_stages > 0 && self.over_error_budget(record.target()).await {
                failed_stages += 1;
                break;
            }

            match self.stage(&record, desync_type, &te).await {
                Ok(true) => {
                    debug!(
                        "{} confirmed for {} {} {}",
                        desync_type,
                        record.method(),
                        record.target(),
                        record.mutation()
                    );
                    // Counted before the next job is taken so the stop-after
                    // gate sees it as early as possible.
                    self.ctx.vulns.increment(record.target().key()).await;
                    record.resolve(desync_type.into());
                    return Some(record);
                }
                Ok(false) => {}
                Err(e) => {
                    failed_stages += 1;
                    if e.counts_against_target() {
                        self.ctx.state.increment_errors(record.target().key()).await;
                    }
                    let _ = self.ctx.errors.send(e);
                }
            }
        }

        record.resolve(if failed_stages >= 2 {
            TestStatus::Error
        } else {
            TestStatus::Safe
        });
        Some(record)
    }

    /// Probe, and only if the probe hangs, verify. `Ok(true)` means the
    /// probe timed out and the verify came back in time.
    async fn stage(
        &self,
        record: &SmuggleTestRecord,
        desync_type: DesyncType,
        te: &[u8],
    ) -> ScanResult<bool> {
        let target = record.target();
        let timeout = record.timeout();

        let probe = build(
            desync_type,
            Phase::Probe,
            record.method(),
            target,
            te,
            &self.ctx.headers,
        );
        if !self.ctx.oracle.send(target, &probe, timeout).await?.timed_out() {
            return Ok(false);
        }

        let verify = build(
            desync_type,
            Phase::Verify,
            record.method(),
            target,
            te,
            &self.ctx.headers,
        );
        if self.ctx.oracle.send(target, &verify, timeout).await?.timed_out() {
            return Err(ScanError::Inconclusive {
                target: target.to_string(),
                desync_type,
                mutation: record.mutation().to_string(),
            });
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutations::catalog;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn context(
        max_errors: u32,
        state: Arc<ScanState>,
    ) -> (WorkerContext, mpsc::UnboundedReceiver<ScanError>) {
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let ctx = WorkerContext {
            oracle: ConnectionOracle::new(false),
            state,
            vulns: Arc::new(VulnCounts::new()),
            mutations: Arc::new(catalog().clone()),
            headers: Arc::new(vec!["Connection: close".to_string()]),
            stop_after: 0,
            max_errors,
            errors: err_tx,
            stats: Arc::new(ScanStats::new()),
            report: Arc::new(ReportSink::new(None, false).unwrap()),
        };
        (ctx, err_rx)
    }

    fn worker(max_errors: u32, state: Arc<ScanState>) -> (Worker, mpsc::UnboundedReceiver<ScanError>) {
        let (ctx, err_rx) = context(max_errors, state);
        (Worker::new(0, ctx), err_rx)
    }

    /// Accepts connections, reads everything and never answers.
    async fn silent_server() -> (Target, Arc<std::sync::atomic::AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    while let Ok(n) = socket.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                    }
                });
            }
        });
        (
            Target::parse(&format!("http://{}/", addr)).unwrap(),
            hits,
        )
    }

    fn record(target: &Target) -> SmuggleTestRecord {
        SmuggleTestRecord::new(
            target.clone(),
            "POST",
            "standard",
            Duration::from_millis(300),
        )
    }

    /// Answers every request immediately and counts connections.
    async fn fast_server() -> (Target, Arc<std::sync::atomic::AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n")
                        .await;
                });
            }
        });
        (
            Target::parse(&format!("http://{}/", addr)).unwrap(),
            hits,
        )
    }

    #[tokio::test]
    async fn test_fast_backend_is_safe() {
        let (target, hits) = fast_server().await;
        let (worker, _errors) = worker(0, Arc::new(ScanState::new()));

        let result = worker.detect(record(&target)).await.unwrap();
        assert_eq!(result.status(), TestStatus::Safe);
        // One probe per stage, no verify.
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = Target::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        drop(listener);

        let state = Arc::new(ScanState::new());
        let (worker, mut errors) = worker(0, state.clone());

        let result = worker.detect(record(&target)).await.unwrap();
        assert_eq!(result.status(), TestStatus::Error);
        assert_eq!(state.error_count(target.key()).await, 2);
        assert!(matches!(errors.try_recv(), Ok(ScanError::Dial { .. })));
        assert!(matches!(errors.try_recv(), Ok(ScanError::Dial { .. })));
    }

    #[tokio::test]
    async fn test_error_budget_drops_record_without_traffic() {
        let (target, hits) = fast_server().await;
        let state = Arc::new(ScanState::new());
        state.increment_errors(target.key()).await;
        state.increment_errors(target.key()).await;
        let (worker, _errors) = worker(2, state);

        assert!(worker.detect(record(&target)).await.is_none());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(worker.ctx.stats.snapshot().tests_dropped, 1);
        assert_eq!(worker.ctx.report.progress().position(), 1);
    }

    #[tokio::test]
    async fn test_hanging_verify_is_inconclusive() {
        let (target, hits) = silent_server().await;
        let state = Arc::new(ScanState::new());
        let (worker, mut errors) = worker(0, state.clone());

        let result = worker.detect(record(&target)).await.unwrap();

        assert_eq!(result.status(), TestStatus::Error);
        assert_eq!(state.error_count(target.key()).await, 2);
        assert!(matches!(
            errors.try_recv(),
            Ok(ScanError::Inconclusive {
                desync_type: DesyncType::Clte,
                ..
            })
        ));
        assert!(matches!(
            errors.try_recv(),
            Ok(ScanError::Inconclusive {
                desync_type: DesyncType::Tecl,
                ..
            })
        ));
        assert!(errors.try_recv().is_err());
        // Probe and verify for both stages.
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_stop_after_is_checked_when_a_job_is_taken() {
        let (target, hits) = fast_server().await;
        let (mut ctx, _errors) = context(0, Arc::new(ScanState::new()));
        ctx.stop_after = 1;
        ctx.vulns.increment(target.key()).await;
        let stats = Arc::clone(&ctx.stats);
        let progress = ctx.report.progress().clone();
        let worker = Worker::new(0, ctx);

        let (job_tx, job_rx) = mpsc::channel(2);
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        job_tx.send(record(&target)).await.unwrap();
        job_tx.send(record(&target)).await.unwrap();
        drop(job_tx);

        worker.run_detection(JobQueue::new(job_rx), result_tx).await;

        assert!(result_rx.try_recv().is_err());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(stats.snapshot().tests_skipped, 2);
        assert_eq!(progress.position(), 2);
    }

    #[tokio::test]
    async fn test_unknown_mutation_is_error() {
        let (target, hits) = fast_server().await;
        let (worker, mut errors) = worker(0, Arc::new(ScanState::new()));
        let record = SmuggleTestRecord::new(target, "GET", "no-such-mutation", Duration::from_secs(1));

        let result = worker.detect(record).await.unwrap();
        assert_eq!(result.status(), TestStatus::Error);
        assert!(matches!(errors.try_recv(), Ok(ScanError::UnknownMutation(_))));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_job_queue_is_shared() {
        let (tx, rx) = mpsc::channel(4);
        let queue = JobQueue::new(rx);
        let other = queue.clone();
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        drop(tx);

        assert_eq!(queue.next().await, Some(1));
        assert_eq!(other.next().await, Some(2));
        assert_eq!(queue.next().await, None);
    }
}
