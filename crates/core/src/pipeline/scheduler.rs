//! The pipeline: job registry, stage semaphores and the control surface.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::config::PipelineConfig;
use super::error::PipelineError;
use super::run::JobRun;
use super::types::{PipelineStatus, StageStatus};
use crate::config::Config;
use crate::downloader::{Downloader, HttpDownloader};
use crate::extractor::{AudioExtractor, AudioFormat, FfmpegExtractor};
use crate::job::{Job, JobEvent, JobId, JobState};
use crate::metrics;
use crate::naming::NameAllocator;
use crate::resolver::{create_resolver, VideoResolver};
use crate::sync::FairSemaphore;

pub(crate) const DOWNLOAD_STAGE: &str = "download";
pub(crate) const TRANSCODE_STAGE: &str = "transcode";

/// One in-flight run. A retried job gets a new entry under its new attempt.
///
/// The entry stays until the run unregisters itself; `shutdown` only takes
/// the handle to await it.
struct RegistryEntry {
    job: Arc<Job>,
    handle: Option<JoinHandle<()>>,
}

/// State shared between the pipeline handle and its job runs.
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    pub(crate) resolver: Arc<dyn VideoResolver>,
    pub(crate) downloader: Arc<dyn Downloader>,
    pub(crate) extractor: Arc<dyn AudioExtractor>,
    pub(crate) download_stage: Arc<FairSemaphore>,
    pub(crate) transcode_stage: Arc<FairSemaphore>,
    pub(crate) names: NameAllocator,
    registry: Mutex<HashMap<(JobId, u32), RegistryEntry>>,
    jobs: Mutex<Vec<Arc<Job>>>,
    /// Parent of every job's cancellation token; replaced by `cancel_all`.
    scope: Mutex<CancellationToken>,
    events: broadcast::Sender<JobEvent>,
    in_flight: watch::Sender<usize>,
    accepting: AtomicBool,
    stop: CancellationToken,
}

impl Shared {
    fn child_scope(&self) -> CancellationToken {
        lock(&self.scope).child_token()
    }

    fn start_run(self: &Arc<Self>, job: &Arc<Job>, attempt: u32) -> Result<(), PipelineError> {
        let mut registry = lock(&self.registry);
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(PipelineError::ShutDown);
        }

        let run = JobRun::new(Arc::clone(self), Arc::clone(job), attempt);
        // The run cannot unregister before this insert: it needs the lock we hold.
        let handle = tokio::spawn(run.execute());
        registry.insert(
            (job.id(), attempt),
            RegistryEntry {
                job: Arc::clone(job),
                handle: Some(handle),
            },
        );
        self.in_flight.send_replace(registry.len());
        metrics::JOBS_SUBMITTED.inc();
        Ok(())
    }

    pub(crate) fn unregister(&self, job_id: JobId, attempt: u32) {
        let mut registry = lock(&self.registry);
        registry.remove(&(job_id, attempt));
        self.in_flight.send_replace(registry.len());
    }

    fn registered_jobs(&self) -> Vec<Arc<Job>> {
        lock(&self.registry)
            .values()
            .map(|entry| Arc::clone(&entry.job))
            .collect()
    }

    fn sample_throughput(&self, elapsed: Duration) {
        for job in self.registered_jobs() {
            job.sample_throughput(elapsed);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Turns submitted URLs into audio files through two fair, bounded stages.
///
/// Every job resolves its metadata and reserves an output name, then waits
/// in FIFO order for a download permit, downloads, gives the permit back,
/// and waits in FIFO order for a transcode permit. A job never holds both
/// permits at once.
///
/// Must be created and used inside a Tokio runtime.
pub struct Pipeline {
    shared: Arc<Shared>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        resolver: Arc<dyn VideoResolver>,
        downloader: Arc<dyn Downloader>,
        extractor: Arc<dyn AudioExtractor>,
    ) -> Self {
        let download_stage = Arc::new(FairSemaphore::new(
            DOWNLOAD_STAGE,
            config.effective_download_concurrency(),
        ));
        let transcode_stage = Arc::new(FairSemaphore::new(
            TRANSCODE_STAGE,
            config.effective_transcode_concurrency(),
        ));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (in_flight, _) = watch::channel(0);

        info!(
            download_concurrency = download_stage.capacity(),
            transcode_concurrency = transcode_stage.capacity(),
            output_dir = %config.output_dir.display(),
            format = %config.format,
            "Pipeline created"
        );

        let shared = Arc::new(Shared {
            config,
            resolver,
            downloader,
            extractor,
            download_stage,
            transcode_stage,
            names: NameAllocator::new(),
            registry: Mutex::new(HashMap::new()),
            jobs: Mutex::new(Vec::new()),
            scope: Mutex::new(CancellationToken::new()),
            events,
            in_flight,
            accepting: AtomicBool::new(true),
            stop: CancellationToken::new(),
        });

        let sampler = spawn_sampler(&shared);
        Self {
            shared,
            sampler: Mutex::new(Some(sampler)),
        }
    }

    /// Builds a pipeline with the default collaborators for `config`.
    pub fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let downloader = HttpDownloader::new(config.downloader.clone())?;
        Ok(Self::new(
            config.pipeline.clone(),
            create_resolver(&config.resolver),
            Arc::new(downloader),
            Arc::new(FfmpegExtractor::new(config.extractor.clone())),
        ))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.shared.config
    }

    /// Submits a URL in the configured output format.
    pub fn submit(&self, url: impl Into<String>) -> Result<Arc<Job>, PipelineError> {
        self.submit_with_format(url, self.shared.config.format)
    }

    /// Creates a job for `url` and starts its run in the background.
    ///
    /// Returns as soon as the job is registered; no network or disk work
    /// happens on the caller's task. Duplicate URLs are not deduplicated.
    pub fn submit_with_format(
        &self,
        url: impl Into<String>,
        format: AudioFormat,
    ) -> Result<Arc<Job>, PipelineError> {
        let job = Arc::new(Job::new(
            url,
            format,
            self.shared.child_scope(),
            self.shared.events.clone(),
        ));

        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(PipelineError::ShutDown);
        }
        job.emit_submitted();
        self.shared.start_run(&job, 0)?;
        lock(&self.shared.jobs).push(Arc::clone(&job));
        info!(job_id = %job.id(), url = %job.source_url(), %format, "Job submitted");
        Ok(job)
    }

    /// Submits every item behind `url`: one job per playlist entry, in
    /// playlist order, or a single job if `url` is not a playlist.
    ///
    /// Unlike [`submit`](Self::submit) this asks the resolver to list the
    /// playlist on the caller's task. If listing fails, nothing is submitted.
    pub async fn submit_expanded(
        &self,
        url: impl Into<String>,
    ) -> Result<Vec<Arc<Job>>, PipelineError> {
        let url = url.into();
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(PipelineError::ShutDown);
        }

        let entries = self
            .shared
            .resolver
            .expand(&url)
            .await
            .map_err(|source| PipelineError::Expand {
                url: url.clone(),
                source,
            })?;
        if entries.len() > 1 {
            info!(%url, entries = entries.len(), "Expanding playlist");
        }

        entries.into_iter().map(|entry| self.submit(entry)).collect()
    }

    /// Requests cancellation of one job. Returns false if it was already
    /// terminal or cancelling.
    pub fn cancel(&self, job: &Job) -> bool {
        let requested = job.request_cancel();
        if requested {
            info!(job_id = %job.id(), "Cancellation requested");
        }
        requested
    }

    /// Cancels every registered job and replaces the shared scope, so jobs
    /// still resolving abort and later submissions start with a fresh scope.
    pub fn cancel_all(&self) {
        let jobs = self.shared.registered_jobs();
        for job in &jobs {
            job.request_cancel();
        }

        let previous = std::mem::replace(&mut *lock(&self.shared.scope), CancellationToken::new());
        previous.cancel();
        info!(jobs = jobs.len(), "Cancelled all jobs");
    }

    /// Re-runs a `Failed` or `Canceled` job. A job that resolved before
    /// re-enters at the download queue; the rest start over at resolution.
    pub fn retry(&self, job: &Arc<Job>) -> Result<(), PipelineError> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            return Err(PipelineError::ShutDown);
        }

        let attempt = job
            .prepare_retry(self.shared.child_scope())
            .map_err(|state| PipelineError::NotRetryable {
                job_id: job.id(),
                state,
            })?;

        if let Err(e) = self.shared.start_run(job, attempt) {
            // Shutdown won the race; leave the job terminal again.
            job.settle_cancelled(attempt);
            return Err(e);
        }
        info!(job_id = %job.id(), attempt, "Job retried");
        Ok(())
    }

    /// Stops accepting work, cancels everything and waits for every run to
    /// finish its cleanup. Safe to call more than once.
    pub async fn shutdown(&self) {
        {
            let _registry = lock(&self.shared.registry);
            self.shared.accepting.store(false, Ordering::SeqCst);
        }
        self.cancel_all();

        // Entries stay registered; each run unregisters once its cleanup is done.
        let handles: Vec<JoinHandle<()>> = lock(&self.shared.registry)
            .values_mut()
            .filter_map(|entry| entry.handle.take())
            .collect();

        let count = handles.len();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Job run ended abnormally");
            }
        }
        {
            // A run that panicked never unregistered itself.
            let mut registry = lock(&self.shared.registry);
            registry.retain(|_, entry| entry.handle.is_some());
            self.shared.in_flight.send_replace(registry.len());
        }

        self.shared.stop.cancel();
        let sampler = lock(&self.sampler).take();
        if let Some(sampler) = sampler {
            if let Err(e) = sampler.await {
                debug!(error = %e, "Throughput sampler ended abnormally");
            }
        }

        info!(jobs = count, "Pipeline shut down");
    }

    /// Waits until no run is in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.in_flight.subscribe();
        // The sender lives as long as `self`, so this only fails if it is dropped.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Subscribes to job events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.shared.events.subscribe()
    }

    /// Submission history, in submission order.
    ///
    /// Finished jobs stay listed, so they can be inspected and retried, until
    /// [`prune_finished`](Self::prune_finished) drops them.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        lock(&self.shared.jobs).clone()
    }

    /// Forgets every `Completed`, `Failed` or `Canceled` job that has no run
    /// in flight. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let registry = lock(&self.shared.registry);
        let mut jobs = lock(&self.shared.jobs);
        let before = jobs.len();
        jobs.retain(|job| {
            !job.state().is_terminal()
                || registry.contains_key(&(job.id(), job.attempt()))
        });
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, remaining = jobs.len(), "Pruned finished jobs");
        }
        removed
    }

    pub fn get(&self, id: JobId) -> Option<Arc<Job>> {
        lock(&self.shared.jobs)
            .iter()
            .find(|job| job.id() == id)
            .cloned()
    }

    pub fn has_running_jobs(&self) -> bool {
        lock(&self.shared.jobs).iter().any(|job| job.is_running())
    }

    /// Summed throughput of all registered jobs, in bytes per second.
    pub fn throughput(&self) -> u64 {
        self.shared
            .registered_jobs()
            .iter()
            .map(|job| job.throughput())
            .sum()
    }

    pub fn status(&self) -> PipelineStatus {
        let mut jobs_by_state: BTreeMap<JobState, usize> = BTreeMap::new();
        for job in self.jobs() {
            *jobs_by_state.entry(job.state()).or_default() += 1;
        }

        // Each read takes the registry lock on its own.
        let jobs_registered = lock(&self.shared.registry).len();
        let throughput = self.throughput();

        PipelineStatus {
            accepting: self.shared.accepting.load(Ordering::SeqCst),
            download_stage: StageStatus::of(&self.shared.download_stage),
            transcode_stage: StageStatus::of(&self.shared.transcode_stage),
            jobs_registered,
            jobs_by_state,
            throughput,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shared.stop.cancel();
    }
}

fn spawn_sampler(shared: &Arc<Shared>) -> JoinHandle<()> {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let stop = shared.stop.clone();
    let period = Duration::from_millis(shared.config.throughput_interval_ms.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(shared) = weak.upgrade() else { break };
            let now = Instant::now();
            shared.sample_throughput(now.duration_since(last));
            last = now;
        }
    })
}
