//! Process-wide periodic task runner.
//!
//! Constructed once by the host runtime, handed around by reference and shut
//! down explicitly; there is no global instance.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

type JobFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

#[derive(Clone)]
struct Job {
    name: String,
    every: Duration,
    run: JobFn,
}

pub struct PeriodicScheduler {
    cancel: CancellationToken,
    started: AtomicBool,
    jobs: parking_lot::Mutex<Vec<Job>>,
    handles: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("jobs", &self.job_names())
            .field("running", &self.handles.lock().len())
            .finish()
    }
}

impl PeriodicScheduler {
    /// The scheduler stops when `parent` is cancelled or on [`shutdown`](Self::shutdown).
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            started: AtomicBool::new(false),
            jobs: parking_lot::Mutex::new(Vec::new()),
            handles: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Register a job. Jobs registered after [`start`](Self::start) start immediately.
    /// A zero interval is logged and the job is dropped.
    pub fn register<F, Fut>(&self, name: impl Into<String>, every: Duration, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if every.is_zero() {
            tracing::error!(job = %name, "Refusing periodic job with a zero interval");
            return;
        }
        let job = Job {
            name,
            every,
            run: Arc::new(move || Box::pin(f()) as JobFuture),
        };
        let mut jobs = self.jobs.lock();
        if self.started.load(Ordering::SeqCst) {
            self.spawn(job.clone());
        }
        jobs.push(job);
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().iter().map(|j| j.name.clone()).collect()
    }

    pub fn start(&self) {
        let jobs = self.jobs.lock();
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(jobs = jobs.len(), "Periodic scheduler started");
        for job in jobs.iter() {
            self.spawn(job.clone());
        }
    }

    fn spawn(&self, job: Job) {
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let first = tokio::time::Instant::now() + job.every;
            let mut ticker = tokio::time::interval_at(first, job.every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // a panicking run only loses that run
                        match tokio::spawn((job.run)()).await {
                            Ok(Ok(())) => tracing::trace!(job = %job.name, "Job run completed"),
                            Ok(Err(e)) => tracing::warn!(job = %job.name, error = %e, "Job run failed"),
                            Err(e) => tracing::error!(job = %job.name, error = %e, "Job run panicked"),
                        }
                    }
                }
            }
            tracing::debug!(job = %job.name, "Job stopped");
        });
        self.handles.lock().push(handle);
    }

    /// Cancel every job and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for h in handles {
            if let Err(e) = h.await {
                tracing::warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        tracing::info!("Periodic scheduler stopped");
    }
}
