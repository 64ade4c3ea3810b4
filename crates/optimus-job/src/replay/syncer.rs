//! Replay synchronization against the external scheduler.
//!
//! The authoritative run state of a replay lives in the external scheduler,
//! polled over time. The synchronizer periodically reconciles every
//! non-terminal replay:
//!
//! - `replayed` replays aggregate the run states of every node in the
//!   stored execution tree and transition to `success` or `failed`
//! - `accepted` and `in_progress` replays older than the run timeout
//!   transition to `failed`
//!
//! Every transition is a single conditional storage write keyed on the
//! prior status; a crash before the write leaves the record untouched and
//! the next tick retries. Per-project errors are logged and skipped; only a
//! project-enumeration failure fails the whole tick.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use optimus_core::project::ProjectSpec;
use optimus_core::replay::{JobRunState, ReplayMessage, ReplaySpec, ReplayStatus};

use crate::error::Result;
use crate::metrics::names as metric_names;
use crate::scheduler::{Scheduler, RUN_STATUS_BATCH_SIZE};
use crate::store::{ProjectRepository, ReplayRepository};

/// Message recorded when every instant of a replay ran successfully.
pub const REPLAY_MESSAGE_SUCCESS: &str = "all instances for this replay are successfully run";

/// Message recorded when a replay has a failed instant and none running.
pub const REPLAY_MESSAGE_FAILED: &str = "instance run failure found";

/// Tuning knobs for a [`ReplaySyncer`].
#[derive(Debug, Clone)]
pub struct ReplaySyncerConfig {
    /// Interval between reconciliation passes.
    pub period: StdDuration,
    /// Age after which an `accepted` or `in_progress` replay fails.
    pub run_timeout: Duration,
}

impl Default for ReplaySyncerConfig {
    fn default() -> Self {
        Self {
            period: StdDuration::from_secs(30),
            run_timeout: Duration::hours(3),
        }
    }
}

/// Aggregated run-state counts for one replay.
#[derive(Debug, Default, Clone, Copy)]
struct StateSummary {
    running: usize,
    failed: usize,
    success: usize,
}

/// Reconciles in-flight replays against the scheduler's run state.
pub struct ReplaySyncer {
    replay_repo: Arc<dyn ReplayRepository>,
    project_repo: Arc<dyn ProjectRepository>,
    scheduler: Arc<dyn Scheduler>,
    config: ReplaySyncerConfig,
}

impl ReplaySyncer {
    /// Creates a syncer over the given repositories and scheduler adapter.
    #[must_use]
    pub fn new(
        config: ReplaySyncerConfig,
        replay_repo: Arc<dyn ReplayRepository>,
        project_repo: Arc<dyn ProjectRepository>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            replay_repo,
            project_repo,
            scheduler,
            config,
        }
    }

    /// Runs reconciliation passes until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.period);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("replay syncer shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.sync(Utc::now()).await {
                        error!("replay sync pass failed: {err}");
                    }
                }
            }
        }
    }

    /// One reconciliation pass over every project.
    ///
    /// # Errors
    /// Fails only when projects cannot be enumerated; per-project failures
    /// are logged and skipped.
    pub async fn sync(&self, now: DateTime<Utc>) -> Result<()> {
        let projects = self.project_repo.get_all().await?;
        for project in projects {
            if let Err(err) = self.sync_project(&project, now).await {
                error!(project = %project.name, "replay sync failed for project: {err}");
            }
        }
        counter!(metric_names::REPLAY_SYNCED_TOTAL).increment(1);
        Ok(())
    }

    async fn sync_project(&self, project: &ProjectSpec, now: DateTime<Utc>) -> Result<()> {
        let replays = self
            .replay_repo
            .get_by_project_and_status(&project.name, &ReplayStatus::SYNCABLE)
            .await?;

        for replay in replays {
            if replay.status == ReplayStatus::Replayed {
                self.sync_replayed(project, &replay).await?;
            } else {
                self.sync_timed_out(&replay, now).await?;
            }
        }
        Ok(())
    }

    /// Aggregates run states for a `replayed` replay and applies the
    /// terminal transition rules.
    async fn sync_replayed(&self, project: &ProjectSpec, replay: &ReplaySpec) -> Result<()> {
        let summary = self.instance_state_summary(project, replay).await?;

        if summary.running == 0 && summary.failed > 0 {
            self.replay_repo
                .update_status(
                    replay.id,
                    &[ReplayStatus::Replayed],
                    ReplayStatus::Failed,
                    ReplayMessage::new("failed", REPLAY_MESSAGE_FAILED),
                )
                .await?;
        } else if summary.running == 0 && summary.failed == 0 && summary.success > 0 {
            self.replay_repo
                .update_status(
                    replay.id,
                    &[ReplayStatus::Replayed],
                    ReplayStatus::Success,
                    ReplayMessage::new("success", REPLAY_MESSAGE_SUCCESS),
                )
                .await?;
            info!(replay_id = %replay.id, "replay marked successful");
        }
        Ok(())
    }

    /// Queries the scheduler for every node in the stored execution tree.
    ///
    /// The query end extends through the last requested day so the final
    /// day's instants are covered.
    async fn instance_state_summary(
        &self,
        project: &ProjectSpec,
        replay: &ReplaySpec,
    ) -> Result<StateSummary> {
        let batch_end = replay.end_date + Duration::days(1) - Duration::seconds(1);
        let mut summary = StateSummary::default();

        for (name, _) in replay.execution_tree.nodes() {
            let statuses = self
                .scheduler
                .get_job_run_status(
                    project,
                    name,
                    replay.start_date,
                    batch_end,
                    RUN_STATUS_BATCH_SIZE,
                )
                .await?;
            for status in statuses {
                match status.state {
                    JobRunState::Running => summary.running += 1,
                    JobRunState::Failed => summary.failed += 1,
                    JobRunState::Success => summary.success += 1,
                    JobRunState::Queued | JobRunState::Waiting => {}
                }
            }
        }
        Ok(summary)
    }

    /// Fails an `accepted` or `in_progress` replay that outlived the run
    /// timeout.
    async fn sync_timed_out(&self, replay: &ReplaySpec, now: DateTime<Utc>) -> Result<()> {
        if now - replay.created_at <= self.config.run_timeout {
            return Ok(());
        }
        self.replay_repo
            .update_status(
                replay.id,
                &[ReplayStatus::Accepted, ReplayStatus::InProgress],
                ReplayStatus::Failed,
                ReplayMessage::new(
                    "failed",
                    format!(
                        "replay has been running since {}",
                        replay.created_at.format("%Y-%m-%dT%H:%M:%SZ")
                    ),
                ),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use optimus_core::id::ReplayId;
    use optimus_core::job::JobSpec;
    use optimus_core::project::NamespaceSpec;
    use optimus_core::replay::{ExecutionTree, JobRunStatus};

    use crate::error::Error;
    use crate::store::memory::{InMemoryReplayRepository, InMemorySpecStore};

    /// Scheduler stub serving canned run states per job name.
    #[derive(Default)]
    struct CannedScheduler {
        states: Mutex<HashMap<String, Vec<JobRunState>>>,
    }

    impl CannedScheduler {
        fn set(&self, job: &str, states: Vec<JobRunState>) {
            self.states.lock().unwrap().insert(job.to_string(), states);
        }
    }

    #[async_trait]
    impl Scheduler for CannedScheduler {
        async fn deploy_jobs(
            &self,
            _project: &ProjectSpec,
            _namespace: &NamespaceSpec,
            _jobs: &[JobSpec],
        ) -> Result<()> {
            Ok(())
        }

        async fn delete_jobs(&self, _namespace: &NamespaceSpec, _names: &[String]) -> Result<()> {
            Ok(())
        }

        async fn list_job_names(&self, _namespace: &NamespaceSpec) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn get_job_run_status(
            &self,
            _project: &ProjectSpec,
            job_name: &str,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _batch_size: usize,
        ) -> Result<Vec<JobRunStatus>> {
            let states = self.states.lock().unwrap();
            Ok(states
                .get(job_name)
                .map(|list| {
                    list.iter()
                        .map(|state| JobRunStatus {
                            scheduled_at: start,
                            state: *state,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn clear_job_run(
            &self,
            _project: &ProjectSpec,
            _job_name: &str,
            _scheduled_at: DateTime<Utc>,
        ) -> Result<()> {
            Err(Error::scheduler("not expected in syncer tests"))
        }

        async fn verify_job(&self, _namespace: &NamespaceSpec, _job: &JobSpec) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        replay_repo: Arc<InMemoryReplayRepository>,
        scheduler: Arc<CannedScheduler>,
        syncer: ReplaySyncer,
    }

    fn fixture() -> Fixture {
        let replay_repo = Arc::new(InMemoryReplayRepository::new());
        let scheduler = Arc::new(CannedScheduler::default());
        let store = Arc::new(InMemorySpecStore::new());
        store.register_project(ProjectSpec::new("proj")).unwrap();

        let syncer = ReplaySyncer::new(
            ReplaySyncerConfig::default(),
            replay_repo.clone() as Arc<dyn ReplayRepository>,
            Arc::new(store) as Arc<dyn ProjectRepository>,
            scheduler.clone() as Arc<dyn Scheduler>,
        );
        Fixture {
            replay_repo,
            scheduler,
            syncer,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 10, 12, 0, 0).unwrap()
    }

    async fn seed_replay(
        repo: &InMemoryReplayRepository,
        status: ReplayStatus,
        created_at: DateTime<Utc>,
        nodes: &[&str],
    ) -> ReplayId {
        let mut tree = ExecutionTree::new(nodes[0]);
        for pair in nodes.windows(2) {
            tree.add_dependent(pair[0], pair[1]);
        }
        let spec = ReplaySpec {
            id: ReplayId::generate(),
            project: "proj".into(),
            job: JobSpec::named(nodes[0]),
            start_date: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2021, 1, 3, 0, 0, 0).unwrap(),
            status,
            messages: Vec::new(),
            execution_tree: tree,
            created_at,
        };
        repo.save(&spec).await.unwrap();
        spec.id
    }

    #[tokio::test]
    async fn replayed_with_all_success_becomes_success() {
        let f = fixture();
        let id = seed_replay(&f.replay_repo, ReplayStatus::Replayed, now(), &["root", "child"])
            .await;
        f.scheduler.set("root", vec![JobRunState::Success; 3]);
        f.scheduler.set("child", vec![JobRunState::Success; 3]);

        f.syncer.sync(now()).await.unwrap();

        let spec = f.replay_repo.get(id).await.unwrap().unwrap();
        assert_eq!(spec.status, ReplayStatus::Success);
        assert_eq!(spec.messages.last().unwrap().message, REPLAY_MESSAGE_SUCCESS);
    }

    #[tokio::test]
    async fn replayed_with_failure_and_none_running_becomes_failed() {
        let f = fixture();
        let id = seed_replay(&f.replay_repo, ReplayStatus::Replayed, now(), &["root"]).await;
        f.scheduler.set(
            "root",
            vec![JobRunState::Success, JobRunState::Failed, JobRunState::Success],
        );

        f.syncer.sync(now()).await.unwrap();

        let spec = f.replay_repo.get(id).await.unwrap().unwrap();
        assert_eq!(spec.status, ReplayStatus::Failed);
        assert_eq!(spec.messages.last().unwrap().message, REPLAY_MESSAGE_FAILED);
    }

    #[tokio::test]
    async fn replayed_with_running_instances_stays_put() {
        let f = fixture();
        let id = seed_replay(&f.replay_repo, ReplayStatus::Replayed, now(), &["root"]).await;
        f.scheduler.set(
            "root",
            vec![JobRunState::Running, JobRunState::Failed, JobRunState::Success],
        );

        f.syncer.sync(now()).await.unwrap();

        let spec = f.replay_repo.get(id).await.unwrap().unwrap();
        assert_eq!(spec.status, ReplayStatus::Replayed);
    }

    #[tokio::test]
    async fn accepted_replay_past_timeout_fails_with_age_message() {
        let f = fixture();
        let created = now() - Duration::hours(4);
        let id = seed_replay(&f.replay_repo, ReplayStatus::Accepted, created, &["root"]).await;

        f.syncer.sync(now()).await.unwrap();

        let spec = f.replay_repo.get(id).await.unwrap().unwrap();
        assert_eq!(spec.status, ReplayStatus::Failed);
        assert!(spec
            .messages
            .last()
            .unwrap()
            .message
            .contains("replay has been running since 2021-01-10T08:00:00Z"));
    }

    #[tokio::test]
    async fn young_accepted_replay_is_left_alone() {
        let f = fixture();
        let created = now() - Duration::hours(1);
        let id = seed_replay(&f.replay_repo, ReplayStatus::Accepted, created, &["root"]).await;

        f.syncer.sync(now()).await.unwrap();

        let spec = f.replay_repo.get(id).await.unwrap().unwrap();
        assert_eq!(spec.status, ReplayStatus::Accepted);
    }

    #[tokio::test]
    async fn terminal_replays_never_transition_again() {
        let f = fixture();
        let id = seed_replay(&f.replay_repo, ReplayStatus::Replayed, now(), &["root"]).await;
        f.scheduler.set("root", vec![JobRunState::Success]);

        f.syncer.sync(now()).await.unwrap();
        // A later tick observes failures at the scheduler, but the replay
        // is already terminal and out of the syncable set.
        f.scheduler.set("root", vec![JobRunState::Failed]);
        f.syncer.sync(now()).await.unwrap();

        let spec = f.replay_repo.get(id).await.unwrap().unwrap();
        assert_eq!(spec.status, ReplayStatus::Success);
    }

    #[tokio::test]
    async fn empty_run_states_cause_no_transition() {
        let f = fixture();
        let id = seed_replay(&f.replay_repo, ReplayStatus::Replayed, now(), &["root"]).await;

        f.syncer.sync(now()).await.unwrap();

        let spec = f.replay_repo.get(id).await.unwrap().unwrap();
        assert_eq!(spec.status, ReplayStatus::Replayed);
    }
}
