//! Two-phase transfer pipeline
//!
//! A run moves through `Init → Downloading → Barrier → Uploading → Done`, or
//! ends in `Failed` from any active state. Each phase runs on its own
//! [`pool`] of `transfer.workers` workers. No upload starts until every
//! download has resolved, and any failing task aborts the whole run.

pub mod pool;


use crate::catalog;
use crate::config::Config;
use crate::downloader::{Downloader, Fetched};
use crate::error::Result;
use crate::staging::LocalStore;
use crate::store::{ObjectRepository, ensure_bucket};
use crate::types::{Event, FileTask, LocalArtifact, Phase, RunReport, RunState, TransferOutcome};
use crate::upload::UploadManager;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};

/// Buffer size of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Drives one catalog through the download and upload phases
pub struct Orchestrator {
    config: Config,
    repository: Arc<dyn ObjectRepository>,
    event_tx: broadcast::Sender<Event>,
    state_tx: watch::Sender<RunState>,
    // held for the whole of a run; runs on a shared orchestrator go one at a time
    run_lock: Mutex<()>,
}

impl Orchestrator {
    /// Create an orchestrator for `config`, writing into buckets from `repository`
    ///
    /// The configuration is validated here; nothing touches the network or the
    /// file system until [`run`](Self::run).
    pub fn new(config: Config, repository: Arc<dyn ObjectRepository>) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, _rx) = watch::channel(RunState::Init);

        Ok(Self {
            config,
            repository,
            event_tx,
            state_tx,
            run_lock: Mutex::new(()),
        })
    }

    /// Subscribe to progress events
    ///
    /// Only events sent after subscribing are received.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Current (or final) state of the most recent run
    pub fn state(&self) -> RunState {
        *self.state_tx.borrow()
    }

    /// Transfer every catalog file to the destination
    ///
    /// Files already staged are not downloaded again and objects already in the
    /// bucket are not rewritten, so a run can be repeated safely after a
    /// failure. Returns the first task failure; the state is then `Failed`.
    ///
    /// Concurrent calls on the same orchestrator are queued and run one after
    /// another, each starting again from `Init`.
    pub async fn run(&self) -> Result<RunReport> {
        let _guard = self.run_lock.lock().await;
        let started_at = Utc::now();
        self.state_tx.send_replace(RunState::Init);

        match self.execute(started_at).await {
            Ok(report) => Ok(report),
            Err(e) => {
                tracing::error!(error = %e, "Run failed");
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    async fn execute(&self, started_at: DateTime<Utc>) -> Result<RunReport> {
        let local = LocalStore::new(self.config.staging.download_dir.clone());
        local.prepare().await?;
        let store =
            ensure_bucket(self.repository.as_ref(), &self.config.destination.bucket).await?;

        let tasks = catalog::generate(&self.config.catalog, &self.config.destination);
        tracing::info!(
            tasks = tasks.len(),
            workers = self.config.transfer.workers,
            bucket = store.bucket(),
            "Task catalog built"
        );

        let downloader = Downloader::new(&self.config, local)?.with_events(self.event_tx.clone());

        self.transition(RunState::Downloading);
        let fetched = self
            .phase(Phase::Download, tasks, move |task: FileTask| {
                let downloader = downloader.clone();
                async move {
                    let fetched = downloader.fetch(&task).await?;
                    Ok::<_, crate::error::DownloadError>((task, fetched))
                }
            })
            .await?;

        // every download has resolved successfully past this point
        self.transition(RunState::Barrier);
        let report = Tally::from_downloads(&fetched);
        tracing::info!(
            downloaded = report.downloaded,
            skipped = report.download_skipped,
            staged_bytes = report.staged_bytes,
            "All downloads resolved"
        );

        let uploader = UploadManager::new(store, &self.config).with_events(self.event_tx.clone());
        let jobs: Vec<(FileTask, LocalArtifact)> = fetched
            .into_iter()
            .map(|(task, fetched)| (task, fetched.artifact))
            .collect();

        self.transition(RunState::Uploading);
        let uploads = self
            .phase(Phase::Upload, jobs, move |(task, artifact): (FileTask, LocalArtifact)| {
                let uploader = uploader.clone();
                async move { uploader.push(&artifact, &task).await }
            })
            .await?;

        self.transition(RunState::Done);
        let report = report.with_uploads(&uploads).finish(started_at);
        tracing::info!(
            tasks = report.tasks,
            uploaded = report.uploaded,
            skipped = report.upload_skipped,
            "Run complete"
        );
        Ok(report)
    }

    async fn phase<J, T, E, H, Fut>(
        &self,
        phase: Phase,
        jobs: Vec<J>,
        handler: H,
    ) -> Result<Vec<T>>
    where
        J: Send + 'static,
        T: Send + 'static,
        E: Into<crate::error::Error> + Send + 'static,
        H: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let total = jobs.len();
        tracing::info!(%phase, total, "Phase started");
        self.emit(Event::PhaseStarted { phase, total });

        match pool::run_phase(phase, self.config.transfer.workers, jobs, handler).await {
            Ok(results) => {
                tracing::info!(%phase, completed = results.len(), "Phase complete");
                self.emit(Event::PhaseComplete {
                    phase,
                    completed: results.len(),
                });
                Ok(results)
            }
            Err(e) => {
                self.emit(Event::TaskFailed {
                    phase,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn transition(&self, to: RunState) {
        let from = self.state();
        if !from.can_transition_to(to) {
            tracing::warn!(?from, ?to, "Ignoring invalid run state transition");
            return;
        }
        self.state_tx.send_replace(to);
        tracing::debug!(?from, ?to, "Run state changed");
        self.emit(Event::StateChanged { from, to });
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Counters accumulated across both phases
struct Tally {
    tasks: usize,
    downloaded: usize,
    download_skipped: usize,
    uploaded: usize,
    upload_skipped: usize,
    staged_bytes: u64,
}

impl Tally {
    fn from_downloads(fetched: &[(FileTask, Fetched)]) -> Self {
        let skipped = fetched
            .iter()
            .filter(|(_, f)| f.outcome == TransferOutcome::Skipped)
            .count();
        Self {
            tasks: fetched.len(),
            downloaded: fetched.len() - skipped,
            download_skipped: skipped,
            uploaded: 0,
            upload_skipped: 0,
            staged_bytes: fetched.iter().map(|(_, f)| f.artifact.size_bytes).sum(),
        }
    }

    fn with_uploads(mut self, outcomes: &[TransferOutcome]) -> Self {
        self.upload_skipped = outcomes
            .iter()
            .filter(|&&o| o == TransferOutcome::Skipped)
            .count();
        self.uploaded = outcomes.len() - self.upload_skipped;
        self
    }

    fn finish(self, started_at: DateTime<Utc>) -> RunReport {
        RunReport {
            tasks: self.tasks,
            downloaded: self.downloaded,
            download_skipped: self.download_skipped,
            uploaded: self.uploaded,
            upload_skipped: self.upload_skipped,
            staged_bytes: self.staged_bytes,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
