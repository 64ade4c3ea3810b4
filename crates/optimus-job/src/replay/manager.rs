//! Replay lifecycle management.
//!
//! The manager owns the replay state machine:
//!
//! ```text
//! accepted ── worker picks up ──▶ in_progress ── all clears ok ──▶ replayed
//!    │                                │
//!    └── timeout (syncer) ─▶ failed   └── dispatch error ──▶ failed
//! ```
//!
//! Submission is synchronous through persistence and asynchronous for
//! dispatch: a validated request is stored with status `accepted` and handed
//! to a single-consumer worker queue. Exactly one replay per manager
//! instance dispatches at a time — the single-active-per-job invariant
//! assumes serialized dispatch within an instance, and the repository's
//! conditional status update serializes across instances.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use optimus_core::id::ReplayId;
use optimus_core::job::JobSpec;
use optimus_core::project::ProjectSpec;
use optimus_core::replay::{
    ExecutionStatusTree, JobRunStatus, ReplayMessage, ReplayRequest, ReplaySpec, ReplayState,
    ReplayStatus,
};

use crate::error::{Error, Result};
use crate::executor::{
    ParallelRunner, TaskFuture, DEFAULT_CONCURRENT_LIMIT, DEFAULT_TICKET_INTERVAL,
};
use crate::metrics::{labels as metric_labels, names as metric_names, TimingGuard};
use crate::replay::planner;
use crate::scheduler::{Scheduler, RUN_STATUS_BATCH_SIZE};
use crate::store::ReplayRepository;

/// Tuning knobs for a [`ReplayManager`].
#[derive(Debug, Clone)]
pub struct ReplayManagerConfig {
    /// Depth of the dispatch queue; submits block when it is full.
    pub queue_depth: usize,
    /// Maximum concurrent clear calls per replay.
    pub clear_limit: usize,
    /// Minimum spacing between clear-call starts.
    pub clear_ticket_interval: StdDuration,
    /// How many replay records `list` returns per project.
    pub list_retention: usize,
}

impl Default for ReplayManagerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            clear_limit: DEFAULT_CONCURRENT_LIMIT,
            clear_ticket_interval: DEFAULT_TICKET_INTERVAL,
            list_retention: 100,
        }
    }
}

/// Work item handed to the dispatch worker.
struct DispatchItem {
    id: ReplayId,
    project: ProjectSpec,
}

/// Accepts, validates, persists, and dispatches replays.
pub struct ReplayManager {
    repo: Arc<dyn ReplayRepository>,
    scheduler: Arc<dyn Scheduler>,
    config: ReplayManagerConfig,
    queue: mpsc::Sender<DispatchItem>,
}

impl ReplayManager {
    /// Creates a manager and spawns its dispatch worker.
    ///
    /// Must be called within a tokio runtime; the worker exits when the
    /// manager (and every queued item) is dropped.
    #[must_use]
    pub fn new(
        config: ReplayManagerConfig,
        repo: Arc<dyn ReplayRepository>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let runner = ParallelRunner::new(config.clear_limit, config.clear_ticket_interval);
        tokio::spawn(dispatch_loop(
            rx,
            Arc::clone(&repo),
            Arc::clone(&scheduler),
            runner,
        ));
        Self {
            repo,
            scheduler,
            config,
            queue: tx,
        }
    }

    /// Validates and accepts a replay request.
    ///
    /// Atomically (i) validates, (ii) persists the spec with status
    /// `accepted`, (iii) enqueues dispatch work, and returns the replay ID.
    ///
    /// # Errors
    /// - [`Error::ReplayDateRangeInvalid`] when `end < start`
    /// - [`Error::ReplayOnPastOnly`] when `end` is in the future
    /// - [`Error::ReplayRequestConflict`] when another replay for the same
    ///   job is `accepted` or `in_progress`, regardless of window and force
    /// - [`Error::ReplayPriorRunsExist`] when an active replay overlaps the
    ///   window and `force` is not set
    pub async fn submit(
        &self,
        request: &ReplayRequest,
        jobs: &BTreeMap<String, JobSpec>,
    ) -> Result<ReplayId> {
        if let Err(err) = self.validate(request).await {
            counter!(
                metric_names::REPLAY_REQUESTS_TOTAL,
                metric_labels::STATUS => "rejected",
            )
            .increment(1);
            return Err(err);
        }

        let tree = planner::build_execution_tree(jobs, request)?;
        let mut job_snapshot = request.job.clone();
        job_snapshot.scrub_references();

        let spec = ReplaySpec {
            id: request.id,
            project: request.project.name.clone(),
            job: job_snapshot,
            start_date: request.start,
            end_date: request.end,
            status: ReplayStatus::Accepted,
            messages: Vec::new(),
            execution_tree: tree,
            created_at: request.created_at,
        };
        self.repo.save(&spec).await?;
        counter!(
            metric_names::REPLAY_REQUESTS_TOTAL,
            metric_labels::STATUS => "accepted",
        )
        .increment(1);

        self.queue
            .send(DispatchItem {
                id: request.id,
                project: request.project.clone(),
            })
            .await
            .map_err(|_| Error::storage("replay dispatch queue is closed"))?;

        info!(replay_id = %request.id, job = %request.job.name, "replay accepted");
        Ok(request.id)
    }

    /// Returns a replay by ID.
    ///
    /// # Errors
    /// Returns [`Error::ReplayNotFound`] when no record exists.
    pub async fn get(&self, id: ReplayId) -> Result<ReplaySpec> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| Error::ReplayNotFound { id: id.to_string() })
    }

    /// Returns a project's replays, newest first, bounded by the configured
    /// retention count.
    ///
    /// # Errors
    /// Propagates repository failures.
    pub async fn list(&self, project: &str) -> Result<Vec<ReplaySpec>> {
        let mut replays = self.repo.get_by_project(project).await?;
        replays.truncate(self.config.list_retention);
        Ok(replays)
    }

    /// Proxy to the scheduler's run-status query.
    ///
    /// # Errors
    /// Propagates scheduler failures.
    pub async fn get_run_status(
        &self,
        project: &ProjectSpec,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
        job_name: &str,
    ) -> Result<Vec<JobRunStatus>> {
        self.scheduler
            .get_job_run_status(project, job_name, start, end, RUN_STATUS_BATCH_SIZE)
            .await
    }

    /// Returns the replay's lifecycle status plus its execution tree
    /// annotated with the current state of every scheduled instant.
    ///
    /// # Errors
    /// Returns [`Error::ReplayNotFound`] for unknown IDs; scheduler
    /// failures propagate.
    pub async fn get_replay_state(
        &self,
        id: ReplayId,
        project: &ProjectSpec,
    ) -> Result<ReplayState> {
        let spec = self.get(id).await?;
        let batch_end = spec.end_date + chrono::Duration::days(1) - chrono::Duration::seconds(1);

        let mut tree = ExecutionStatusTree::from_tree(&spec.execution_tree);
        let names: Vec<String> = spec
            .execution_tree
            .nodes()
            .map(|(name, _)| name.to_string())
            .collect();
        for name in names {
            let runs = self
                .scheduler
                .get_job_run_status(
                    project,
                    &name,
                    spec.start_date,
                    batch_end,
                    RUN_STATUS_BATCH_SIZE,
                )
                .await?;
            tree.set_runs(&name, runs);
        }

        Ok(ReplayState {
            status: spec.status,
            tree,
        })
    }

    async fn validate(&self, request: &ReplayRequest) -> Result<()> {
        if request.end < request.start {
            return Err(Error::ReplayDateRangeInvalid {
                start: request.start,
                end: request.end,
            });
        }
        if request.end > Utc::now() {
            return Err(Error::ReplayOnPastOnly { end: request.end });
        }

        // Single-active-per-job: force never bypasses this one.
        let active = self
            .repo
            .get_by_project_and_status(&request.project.name, &ReplayStatus::CONFLICTING)
            .await?;
        if active.iter().any(|r| r.job.name == request.job.name) {
            return Err(Error::ReplayRequestConflict {
                job: request.job.name.clone(),
            });
        }

        if !request.force {
            let syncable = self
                .repo
                .get_by_project_and_status(&request.project.name, &ReplayStatus::SYNCABLE)
                .await?;
            let overlapping = syncable.iter().any(|r| {
                r.job.name == request.job.name
                    && r.start_date <= request.end
                    && request.start <= r.end_date
            });
            if overlapping {
                return Err(Error::ReplayPriorRunsExist {
                    job: request.job.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Single-consumer dispatch loop: one replay at a time per manager instance.
async fn dispatch_loop(
    mut queue: mpsc::Receiver<DispatchItem>,
    repo: Arc<dyn ReplayRepository>,
    scheduler: Arc<dyn Scheduler>,
    runner: ParallelRunner,
) {
    while let Some(item) = queue.recv().await {
        let id = item.id;
        if let Err(err) = dispatch_one(item, &repo, &scheduler, &runner).await {
            error!(replay_id = %id, "replay dispatch failed: {err}");
        }
    }
}

async fn dispatch_one(
    item: DispatchItem,
    repo: &Arc<dyn ReplayRepository>,
    scheduler: &Arc<dyn Scheduler>,
    runner: &ParallelRunner,
) -> Result<()> {
    let picked_up = repo
        .update_status(
            item.id,
            &[ReplayStatus::Accepted],
            ReplayStatus::InProgress,
            ReplayMessage::new("in_progress", "replay picked up by the dispatch worker"),
        )
        .await?;
    if !picked_up.is_success() {
        warn!(replay_id = %item.id, "replay no longer accepted, skipping dispatch");
        return Ok(());
    }

    let spec = repo
        .get(item.id)
        .await?
        .ok_or_else(|| Error::ReplayNotFound {
            id: item.id.to_string(),
        })?;

    let _timing = TimingGuard::new(|duration| {
        histogram!(metric_names::REPLAY_DISPATCH_SECONDS).record(duration.as_secs_f64());
    });

    let mut clears: Vec<TaskFuture<()>> = Vec::new();
    for (name, node) in spec.execution_tree.nodes() {
        for instant in &node.runs {
            let scheduler = Arc::clone(scheduler);
            let project = item.project.clone();
            let job_name = name.to_string();
            let scheduled_at = *instant;
            clears.push(Box::pin(async move {
                scheduler
                    .clear_job_run(&project, &job_name, scheduled_at)
                    .await
            }));
        }
    }

    let results = runner.run(clears, &CancellationToken::new()).await;
    let first_error = results.into_iter().find_map(std::result::Result::err);

    match first_error {
        Some(err) => {
            repo.update_status(
                item.id,
                &[ReplayStatus::InProgress],
                ReplayStatus::Failed,
                ReplayMessage::new("failed", format!("replay dispatch failed: {err}")),
            )
            .await?;
        }
        None => {
            repo.update_status(
                item.id,
                &[ReplayStatus::InProgress],
                ReplayStatus::Replayed,
                ReplayMessage::new("replayed", "all scheduled instants cleared"),
            )
            .await?;
            info!(replay_id = %item.id, job = %spec.job.name, "replay dispatched");
        }
    }
    Ok(())
}
