//! End-to-end replay flow over in-memory repositories.
//!
//! Exercises the full path: deploy resolved specs, accept a replay, watch
//! the dispatch worker clear every scheduled instant at the scheduler stub,
//! then let the synchronizer drive the replay to its terminal state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use optimus_core::id::ReplayId;
use optimus_core::job::{DependencyType, JobDependency, JobSpec};
use optimus_core::project::{NamespaceSpec, ProjectSpec};
use optimus_core::replay::{JobRunState, JobRunStatus, ReplayRequest, ReplayStatus};

use optimus_job::error::{Error, Result};
use optimus_job::plugin::PluginRegistry;
use optimus_job::replay::manager::{ReplayManager, ReplayManagerConfig};
use optimus_job::replay::syncer::{ReplaySyncer, ReplaySyncerConfig, REPLAY_MESSAGE_SUCCESS};
use optimus_job::resolver::dependency::DependencyResolver;
use optimus_job::resolver::priority::PriorityResolver;
use optimus_job::scheduler::Scheduler;
use optimus_job::service::JobService;
use optimus_job::store::memory::{InMemoryReplayRepository, InMemorySpecStore};
use optimus_job::store::{ProjectRepository, ReplayRepository};

/// Scheduler stub: records clear calls and serves canned run states.
#[derive(Default)]
struct StubScheduler {
    clears: Mutex<Vec<(String, DateTime<Utc>)>>,
    run_states: Mutex<HashMap<String, Vec<JobRunState>>>,
}

impl StubScheduler {
    fn set_states(&self, job: &str, states: Vec<JobRunState>) {
        self.run_states
            .lock()
            .unwrap()
            .insert(job.to_string(), states);
    }

    fn cleared(&self) -> Vec<(String, DateTime<Utc>)> {
        self.clears.lock().unwrap().clone()
    }
}

#[async_trait]
impl Scheduler for StubScheduler {
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
        let states = self.run_states.lock().unwrap();
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
        job_name: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<()> {
        self.clears
            .lock()
            .unwrap()
            .push((job_name.to_string(), scheduled_at));
        Ok(())
    }

    async fn verify_job(&self, _namespace: &NamespaceSpec, _job: &JobSpec) -> Result<()> {
        Ok(())
    }
}

struct Harness {
    project: ProjectSpec,
    namespace: NamespaceSpec,
    scheduler: Arc<StubScheduler>,
    replay_repo: Arc<dyn ReplayRepository>,
    service: JobService,
    syncer: ReplaySyncer,
}

fn harness() -> Harness {
    let project = ProjectSpec::new("a-data-project");
    let namespace = NamespaceSpec::new("default");

    let store = Arc::new(InMemorySpecStore::new());
    store.register_project(project.clone()).unwrap();

    let scheduler = Arc::new(StubScheduler::default());
    let replay_repo: Arc<dyn ReplayRepository> = Arc::new(InMemoryReplayRepository::new());

    let manager = Arc::new(ReplayManager::new(
        ReplayManagerConfig {
            clear_ticket_interval: StdDuration::from_millis(1),
            ..ReplayManagerConfig::default()
        },
        Arc::clone(&replay_repo),
        scheduler.clone(),
    ));

    let service = JobService::new(
        DependencyResolver::new(Arc::new(PluginRegistry::new())),
        PriorityResolver::new(),
        scheduler.clone(),
        Arc::clone(&manager),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );

    let syncer = ReplaySyncer::new(
        ReplaySyncerConfig::default(),
        Arc::clone(&replay_repo),
        Arc::new(store.clone()) as Arc<dyn ProjectRepository>,
        scheduler.clone(),
    );

    Harness {
        project,
        namespace,
        scheduler,
        replay_repo,
        service,
        syncer,
    }
}

fn daily_job(name: &str) -> JobSpec {
    let mut spec = JobSpec::named(name);
    spec.schedule.interval = "0 2 * * *".into();
    spec.schedule.start_date = Utc.with_ymd_and_hms(2020, 4, 5, 0, 0, 0).unwrap();
    spec
}

fn request(harness: &Harness, job: &JobSpec, start_day: u32, end_day: u32) -> ReplayRequest {
    ReplayRequest {
        id: ReplayId::generate(),
        project: harness.project.clone(),
        job: job.clone(),
        start: Utc.with_ymd_and_hms(2021, 1, start_day, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2021, 1, end_day, 0, 0, 0).unwrap(),
        force: false,
        created_at: Utc::now(),
    }
}

async fn wait_for_status(harness: &Harness, id: ReplayId, status: ReplayStatus) {
    for _ in 0..300 {
        if let Some(spec) = harness.replay_repo.get(id).await.unwrap() {
            if spec.status == status {
                return;
            }
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("replay {id} never reached {status}");
}

#[tokio::test]
async fn replay_runs_to_success_across_the_chain() {
    let h = harness();

    // upstream <- transform <- publish, all daily at 02:00.
    let upstream = daily_job("upstream");
    let mut transform = daily_job("transform");
    transform.dependencies.insert(
        "upstream".into(),
        JobDependency::unresolved(DependencyType::Intra),
    );
    let mut publish = daily_job("publish");
    publish.dependencies.insert(
        "transform".into(),
        JobDependency::unresolved(DependencyType::Intra),
    );

    h.service
        .deploy(
            &h.project,
            &h.namespace,
            vec![upstream.clone(), transform, publish],
        )
        .await
        .unwrap();

    // Dry run first: three jobs, three instants each.
    let req = request(&h, &upstream, 1, 3);
    let tree = h.service.replay_dry_run(&req).await.unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(tree.total_runs(), 9);

    // Commit and let the worker clear every instant.
    let id = h.service.replay(&req).await.unwrap();
    wait_for_status(&h, id, ReplayStatus::Replayed).await;

    let cleared = h.scheduler.cleared();
    assert_eq!(cleared.len(), 9);
    for job in ["upstream", "transform", "publish"] {
        assert_eq!(cleared.iter().filter(|(name, _)| name == job).count(), 3);
    }

    // The scheduler reports success everywhere; one sync pass finishes it.
    for job in ["upstream", "transform", "publish"] {
        h.scheduler.set_states(job, vec![JobRunState::Success; 3]);
    }
    h.syncer.sync(Utc::now()).await.unwrap();

    let spec = h.replay_repo.get(id).await.unwrap().unwrap();
    assert_eq!(spec.status, ReplayStatus::Success);
    assert_eq!(spec.messages.last().unwrap().message, REPLAY_MESSAGE_SUCCESS);

    let listed = h.service.list_replays(&h.project).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, id);
}

#[tokio::test]
async fn single_active_replay_per_job_is_enforced_end_to_end() {
    let h = harness();
    let job = daily_job("solo");
    h.service
        .deploy(&h.project, &h.namespace, vec![job.clone()])
        .await
        .unwrap();

    let first = request(&h, &job, 1, 2);
    let id = h.service.replay(&first).await.unwrap();

    // Whether the first replay is still accepted, in progress, or already
    // replayed, a second overlapping submission must be rejected.
    let second = request(&h, &job, 1, 2);
    let err = h.service.replay(&second).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ReplayRequestConflict { .. } | Error::ReplayPriorRunsExist { .. }
    ));

    // Once terminal, the same window replays again without force.
    wait_for_status(&h, id, ReplayStatus::Replayed).await;
    h.scheduler.set_states("solo", vec![JobRunState::Success; 2]);
    h.syncer.sync(Utc::now()).await.unwrap();
    wait_for_status(&h, id, ReplayStatus::Success).await;

    let third = request(&h, &job, 1, 2);
    assert!(h.service.replay(&third).await.is_ok());
}

#[tokio::test]
async fn replay_status_tree_reflects_scheduler_state() {
    let h = harness();
    let job = daily_job("reporting");
    h.service
        .deploy(&h.project, &h.namespace, vec![job.clone()])
        .await
        .unwrap();

    let req = request(&h, &job, 1, 1);
    let id = h.service.replay(&req).await.unwrap();
    wait_for_status(&h, id, ReplayStatus::Replayed).await;

    h.scheduler
        .set_states("reporting", vec![JobRunState::Running]);
    let state = h.service.replay_status(id, &h.project).await.unwrap();
    assert_eq!(state.status, ReplayStatus::Replayed);
    let node = state.tree.node("reporting").unwrap();
    assert_eq!(node.runs.len(), 1);
    assert_eq!(node.runs[0].state, JobRunState::Running);
}
