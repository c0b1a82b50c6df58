//! Background runner for remote work.
//!
//! The shell hands queued [`RemoteJob`]s to a [`SyncWorker`], which runs them
//! in submission order on its own task and sends the reports back over a
//! channel. The loop keeps reading commands while a pull or push is in
//! flight and folds the reports in when they arrive.

use checklist_core::{RemoteJob, RemoteStore, StorageBackend, SyncEngine, SyncReport};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct SyncWorker {
    jobs: Option<mpsc::UnboundedSender<Vec<RemoteJob>>>,
    reports: mpsc::UnboundedReceiver<Vec<SyncReport>>,
    /// Submitted batches whose reports haven't been received yet.
    in_flight: usize,
    task: JoinHandle<()>,
}

impl SyncWorker {
    /// Spawn the runner task over a shared engine.
    pub fn spawn<B, R>(engine: Arc<SyncEngine<B, R>>) -> Self
    where
        B: StorageBackend + 'static,
        R: RemoteStore + ?Sized + 'static,
    {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (report_tx, reports) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            Self::run_loop(engine, job_rx, report_tx).await;
        });

        Self {
            jobs: Some(job_tx),
            reports,
            in_flight: 0,
            task,
        }
    }

    async fn run_loop<B, R>(
        engine: Arc<SyncEngine<B, R>>,
        mut job_rx: mpsc::UnboundedReceiver<Vec<RemoteJob>>,
        report_tx: mpsc::UnboundedSender<Vec<SyncReport>>,
    ) where
        B: StorageBackend + 'static,
        R: RemoteStore + ?Sized + 'static,
    {
        while let Some(batch) = job_rx.recv().await {
            let mut reports = Vec::new();
            for job in batch {
                debug!("Running {:?}", job);
                reports.extend(engine.execute(job).await);
            }
            if report_tx.send(reports).is_err() {
                debug!("Report receiver dropped, stopping sync worker");
                break;
            }
        }
    }

    /// Queue a batch behind any already submitted. Empty batches are ignored.
    pub fn submit(&mut self, jobs: Vec<RemoteJob>) {
        if jobs.is_empty() {
            return;
        }
        let Some(tx) = &self.jobs else {
            return;
        };
        if tx.send(jobs).is_err() {
            warn!("Sync worker stopped, dropping remote jobs");
            return;
        }
        self.in_flight += 1;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Wait for the next finished batch.
    ///
    /// Cancel-safe, so it can sit in a `select!` branch.
    pub async fn next(&mut self) -> Option<Vec<SyncReport>> {
        let batch = self.reports.recv().await?;
        self.in_flight = self.in_flight.saturating_sub(1);
        Some(batch)
    }

    /// Stop accepting work, wait for everything submitted and return the
    /// reports not yet received.
    pub async fn finish(mut self) -> Vec<SyncReport> {
        self.jobs = None;
        let mut reports = Vec::new();
        while let Some(batch) = self.reports.recv().await {
            reports.extend(batch);
        }
        if let Err(e) = self.task.await {
            warn!("Sync worker ended abnormally: {}", e);
        }
        reports
    }
}
