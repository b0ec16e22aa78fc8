//! 解包作业服务
//!
//! 以有界并发运行一个作业：根证据项与解包过程中发现的嵌套压缩包共用
//! 同一个信号量。每个 `unpack` 调用的结果都会收集到 [`JobReport`]，
//! 作业结束后清理该作业的深度记录。

use crate::archive::extraction_orchestrator::{ExtractionOrchestrator, UnpackOutcome, UnpackStatus};
use crate::config::ServiceConfig;
use crate::models::{ContentItem, JobId};
use crate::utils::cancellation_manager::{CancellationManager, JobCancellation};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 作业进度计数器
#[derive(Debug, Default)]
pub struct JobProgress {
    pub archives_started: AtomicUsize,
    pub archives_finished: AtomicUsize,
    pub items_added: AtomicUsize,
    pub failures: AtomicUsize,
}

impl JobProgress {
    fn record(&self, outcome: &UnpackOutcome) {
        self.archives_finished.fetch_add(1, Ordering::Relaxed);
        self.items_added
            .fetch_add(outcome.stats.added, Ordering::Relaxed);
        if matches!(outcome.status, UnpackStatus::Failed) {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// (started, finished, added, failures)
    pub fn snapshot(&self) -> (usize, usize, usize, usize) {
        (
            self.archives_started.load(Ordering::Relaxed),
            self.archives_finished.load(Ordering::Relaxed),
            self.items_added.load(Ordering::Relaxed),
            self.failures.load(Ordering::Relaxed),
        )
    }
}

/// Outcomes of every `unpack` call made for one job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: JobId,
    pub outcomes: Vec<UnpackOutcome>,
}

impl JobReport {
    pub fn outcome(&self, item_id: i64) -> Option<&UnpackOutcome> {
        self.outcomes.iter().find(|o| o.item_id == item_id)
    }

    pub fn count(&self, status: UnpackStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn total_added(&self) -> usize {
        self.outcomes.iter().map(|o| o.stats.added).sum()
    }
}

/// Job driver over an [`ExtractionOrchestrator`]
pub struct ExtractionService {
    orchestrator: Arc<ExtractionOrchestrator>,
    semaphore: Arc<Semaphore>,
    cancellation: Arc<CancellationManager>,
    max_concurrent: usize,
}

impl ExtractionService {
    pub fn new(orchestrator: ExtractionOrchestrator, config: &ServiceConfig) -> Self {
        let max_concurrent = config.max_concurrent_items.max(1);
        info!(max_concurrent, "Initializing ExtractionService");
        Self {
            orchestrator: Arc::new(orchestrator),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            cancellation: Arc::new(CancellationManager::new()),
            max_concurrent,
        }
    }

    pub fn orchestrator(&self) -> &Arc<ExtractionOrchestrator> {
        &self.orchestrator
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn active_jobs(&self) -> usize {
        self.cancellation.active_count()
    }

    /// Run a job with a fresh id
    pub async fn run(&self, roots: Vec<ContentItem>, password: Option<String>) -> JobReport {
        self.run_job(JobId::new(), roots, password, Arc::new(JobProgress::default()))
            .await
    }

    /// Unpack `roots` and every nested archive found beneath them
    ///
    /// The password only applies to the roots; nested archives are opened
    /// without one.
    pub async fn run_job(
        &self,
        job: JobId,
        roots: Vec<ContentItem>,
        password: Option<String>,
        progress: Arc<JobProgress>,
    ) -> JobReport {
        let guard = JobCancellation::new(job, Arc::clone(&self.cancellation));
        info!(%job, roots = roots.len(), "Starting unpack job");

        let mut tasks: JoinSet<UnpackOutcome> = JoinSet::new();
        for root in roots {
            self.spawn_unpack(&mut tasks, job, root, password.clone(), &guard, &progress);
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(%job, error = %e, "Unpack task panicked or was aborted");
                    progress.failures.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            progress.record(&outcome);
            if outcome.status == UnpackStatus::Completed && !guard.token().is_cancelled() {
                for nested in &outcome.nested_archives {
                    self.spawn_unpack(&mut tasks, job, nested.clone(), None, &guard, &progress);
                }
            }
            outcomes.push(outcome);
        }

        let cleared = self.orchestrator.tracker().clear_job(job);
        let (started, finished, added, failures) = progress.snapshot();
        info!(%job, started, finished, added, failures, cleared, "Unpack job finished");
        JobReport {
            job_id: job,
            outcomes,
        }
    }

    fn spawn_unpack(
        &self,
        tasks: &mut JoinSet<UnpackOutcome>,
        job: JobId,
        item: ContentItem,
        password: Option<String>,
        guard: &JobCancellation,
        progress: &Arc<JobProgress>,
    ) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let semaphore = Arc::clone(&self.semaphore);
        let cancel = guard.token().clone();
        progress.archives_started.fetch_add(1, Ordering::Relaxed);

        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(%job, item_id = item.id, "Service closed before unpack started");
                    return UnpackOutcome::cancelled(item.id);
                }
            };
            orchestrator
                .unpack(job, &item, password.as_deref(), &cancel)
                .await
        });
    }

    /// Cancel a running job; false when it is unknown or already done
    pub fn cancel_job(&self, job: JobId) -> bool {
        self.cancellation.cancel_job(job)
    }

    /// Cancel every job and refuse new unpack calls
    pub fn shutdown(&self) {
        info!("Shutting down ExtractionService");
        self.cancellation.cancel_all();
        self.semaphore.close();
    }
}
