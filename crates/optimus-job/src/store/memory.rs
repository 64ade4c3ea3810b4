//! In-memory repository implementations for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process
//!   coordination
//! - **Single-process only**: State is not shared across process boundaries

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use optimus_core::id::ReplayId;
use optimus_core::job::JobSpec;
use optimus_core::project::{NamespaceSpec, ProjectSpec};
use optimus_core::replay::{ReplayMessage, ReplaySpec, ReplayStatus};

use super::{
    CasResult, JobRepositoryFactory, JobSpecRepository, ProjectJobRepository,
    ProjectJobRepositoryFactory, ProjectRepository, ReplayRepository,
};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

#[derive(Debug, Clone)]
struct JobRecord {
    spec: JobSpec,
    namespace: String,
    destination: Option<String>,
}

#[derive(Debug, Default)]
struct SpecStoreInner {
    projects: BTreeMap<String, ProjectSpec>,
    /// project name → job name → record
    jobs: BTreeMap<String, BTreeMap<String, JobRecord>>,
}

/// Shared in-memory catalog of projects and job specs.
///
/// Hand an `Arc<InMemorySpecStore>` to the factory traits to get scoped
/// repository views.
#[derive(Debug, Default)]
pub struct InMemorySpecStore {
    inner: RwLock<SpecStoreInner>,
}

impl InMemorySpecStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a project.
    ///
    /// # Errors
    /// Returns a storage error if the lock is poisoned.
    pub fn register_project(&self, project: ProjectSpec) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.projects.insert(project.name.clone(), project);
        Ok(())
    }

    /// Registers a job under a project and namespace, optionally claiming a
    /// destination URN.
    ///
    /// # Errors
    /// Returns a storage error if the lock is poisoned.
    pub fn register_job(
        &self,
        project: &str,
        namespace: &str,
        spec: JobSpec,
        destination: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.jobs.entry(project.to_string()).or_default().insert(
            spec.name.clone(),
            JobRecord {
                spec,
                namespace: namespace.to_string(),
                destination: destination.map(ToString::to_string),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl ProjectRepository for Arc<InMemorySpecStore> {
    async fn get_all(&self) -> Result<Vec<ProjectSpec>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.projects.values().cloned().collect())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<ProjectSpec>> {
        let inner = self.inner.read().map_err(poison_err)?;
        Ok(inner.projects.get(name).cloned())
    }
}

impl ProjectJobRepositoryFactory for Arc<InMemorySpecStore> {
    fn for_project(&self, project: &ProjectSpec) -> Arc<dyn ProjectJobRepository> {
        Arc::new(ProjectScopedJobs {
            store: Arc::clone(self),
            project: project.name.clone(),
        })
    }
}

impl JobRepositoryFactory for Arc<InMemorySpecStore> {
    fn for_namespace(
        &self,
        project: &ProjectSpec,
        namespace: &NamespaceSpec,
    ) -> Arc<dyn JobSpecRepository> {
        Arc::new(NamespaceScopedJobs {
            store: Arc::clone(self),
            project: project.name.clone(),
            namespace: namespace.name.clone(),
        })
    }
}

/// A project-scoped read view over [`InMemorySpecStore`].
#[derive(Debug)]
pub struct ProjectScopedJobs {
    store: Arc<InMemorySpecStore>,
    project: String,
}

#[async_trait]
impl ProjectJobRepository for ProjectScopedJobs {
    async fn get_by_destination(&self, urn: &str) -> Result<Option<(JobSpec, ProjectSpec)>> {
        let inner = self.store.inner.read().map_err(poison_err)?;
        for (project_name, jobs) in &inner.jobs {
            for record in jobs.values() {
                if record.destination.as_deref() == Some(urn) {
                    let project = inner
                        .projects
                        .get(project_name)
                        .cloned()
                        .unwrap_or_else(|| ProjectSpec::new(project_name.clone()));
                    return Ok(Some((record.spec.clone(), project)));
                }
            }
        }
        Ok(None)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<JobSpec>> {
        let inner = self.store.inner.read().map_err(poison_err)?;
        Ok(inner
            .jobs
            .get(&self.project)
            .and_then(|jobs| jobs.get(name))
            .map(|record| record.spec.clone()))
    }

    async fn get_by_name_for_project(
        &self,
        project: &str,
        name: &str,
    ) -> Result<Option<(JobSpec, ProjectSpec)>> {
        let inner = self.store.inner.read().map_err(poison_err)?;
        let Some(record) = inner.jobs.get(project).and_then(|jobs| jobs.get(name)) else {
            return Ok(None);
        };
        let project = inner
            .projects
            .get(project)
            .cloned()
            .unwrap_or_else(|| ProjectSpec::new(project));
        Ok(Some((record.spec.clone(), project)))
    }

    async fn get_all(&self) -> Result<Vec<JobSpec>> {
        let inner = self.store.inner.read().map_err(poison_err)?;
        Ok(inner
            .jobs
            .get(&self.project)
            .map(|jobs| jobs.values().map(|r| r.spec.clone()).collect())
            .unwrap_or_default())
    }
}

/// A namespace-scoped write view over [`InMemorySpecStore`].
#[derive(Debug)]
pub struct NamespaceScopedJobs {
    store: Arc<InMemorySpecStore>,
    project: String,
    namespace: String,
}

#[async_trait]
impl JobSpecRepository for NamespaceScopedJobs {
    async fn save(&self, job: JobSpec) -> Result<()> {
        let mut inner = self.store.inner.write().map_err(poison_err)?;
        let jobs = inner.jobs.entry(self.project.clone()).or_default();
        let destination = jobs.get(&job.name).and_then(|r| r.destination.clone());
        jobs.insert(
            job.name.clone(),
            JobRecord {
                spec: job,
                namespace: self.namespace.clone(),
                destination,
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut inner = self.store.inner.write().map_err(poison_err)?;
        if let Some(jobs) = inner.jobs.get_mut(&self.project) {
            jobs.remove(name);
        }
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<JobSpec>> {
        let inner = self.store.inner.read().map_err(poison_err)?;
        Ok(inner
            .jobs
            .get(&self.project)
            .map(|jobs| {
                jobs.values()
                    .filter(|r| r.namespace == self.namespace)
                    .map(|r| r.spec.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<JobSpec>> {
        let inner = self.store.inner.read().map_err(poison_err)?;
        Ok(inner
            .jobs
            .get(&self.project)
            .and_then(|jobs| jobs.get(name))
            .map(|r| r.spec.clone()))
    }
}

/// In-memory replay record storage.
#[derive(Debug, Default)]
pub struct InMemoryReplayRepository {
    replays: RwLock<BTreeMap<ReplayId, ReplaySpec>>,
}

impl InMemoryReplayRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayRepository for InMemoryReplayRepository {
    async fn save(&self, replay: &ReplaySpec) -> Result<()> {
        let mut replays = self.replays.write().map_err(poison_err)?;
        replays.insert(replay.id, replay.clone());
        Ok(())
    }

    async fn update_status(
        &self,
        id: ReplayId,
        expected: &[ReplayStatus],
        target: ReplayStatus,
        message: ReplayMessage,
    ) -> Result<CasResult> {
        let mut replays = self.replays.write().map_err(poison_err)?;
        let Some(replay) = replays.get_mut(&id) else {
            return Ok(CasResult::NotFound);
        };
        if !expected.contains(&replay.status) {
            return Ok(CasResult::StatusMismatch {
                actual: replay.status,
            });
        }
        replay.status = target;
        replay.messages.push(message);
        Ok(CasResult::Success)
    }

    async fn get(&self, id: ReplayId) -> Result<Option<ReplaySpec>> {
        let replays = self.replays.read().map_err(poison_err)?;
        Ok(replays.get(&id).cloned())
    }

    async fn get_by_project_and_status(
        &self,
        project: &str,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>> {
        let replays = self.replays.read().map_err(poison_err)?;
        Ok(replays
            .values()
            .filter(|r| r.project == project && statuses.contains(&r.status))
            .cloned()
            .collect())
    }

    async fn get_by_project(&self, project: &str) -> Result<Vec<ReplaySpec>> {
        let replays = self.replays.read().map_err(poison_err)?;
        let mut found: Vec<ReplaySpec> = replays
            .values()
            .filter(|r| r.project == project)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use optimus_core::replay::ExecutionTree;

    fn replay(project: &str, status: ReplayStatus, created_day: u32) -> ReplaySpec {
        ReplaySpec {
            id: ReplayId::generate(),
            project: project.into(),
            job: JobSpec::named("job"),
            start_date: Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2021, 1, 3, 0, 0, 0).unwrap(),
            status,
            messages: Vec::new(),
            execution_tree: ExecutionTree::new("job"),
            created_at: Utc.with_ymd_and_hms(2021, 2, created_day, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn update_status_applies_on_expected_match() {
        let repo = InMemoryReplayRepository::new();
        let spec = replay("proj", ReplayStatus::Accepted, 1);
        repo.save(&spec).await.unwrap();

        let result = repo
            .update_status(
                spec.id,
                &[ReplayStatus::Accepted],
                ReplayStatus::InProgress,
                ReplayMessage::new("in_progress", "picked up"),
            )
            .await
            .unwrap();
        assert!(result.is_success());

        let stored = repo.get(spec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReplayStatus::InProgress);
        assert_eq!(stored.messages.len(), 1);
    }

    #[tokio::test]
    async fn update_status_rejects_stale_expectation() {
        let repo = InMemoryReplayRepository::new();
        let spec = replay("proj", ReplayStatus::Replayed, 1);
        repo.save(&spec).await.unwrap();

        let result = repo
            .update_status(
                spec.id,
                &[ReplayStatus::Accepted],
                ReplayStatus::InProgress,
                ReplayMessage::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            result,
            CasResult::StatusMismatch {
                actual: ReplayStatus::Replayed
            }
        );
        // The record is untouched.
        let stored = repo.get(spec.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReplayStatus::Replayed);
        assert!(stored.messages.is_empty());
    }

    #[tokio::test]
    async fn list_is_ordered_newest_first() {
        let repo = InMemoryReplayRepository::new();
        let older = replay("proj", ReplayStatus::Success, 1);
        let newer = replay("proj", ReplayStatus::Accepted, 5);
        let other_project = replay("elsewhere", ReplayStatus::Accepted, 7);
        repo.save(&older).await.unwrap();
        repo.save(&newer).await.unwrap();
        repo.save(&other_project).await.unwrap();

        let listed = repo.get_by_project("proj").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn destination_lookup_spans_projects() {
        let store = Arc::new(InMemorySpecStore::new());
        store.register_project(ProjectSpec::new("alpha")).unwrap();
        store.register_project(ProjectSpec::new("beta")).unwrap();
        store
            .register_job(
                "beta",
                "default",
                JobSpec::named("producer"),
                Some("beta.dataset.table"),
            )
            .unwrap();

        let repo = store.for_project(&ProjectSpec::new("alpha"));
        let (job, project) = repo
            .get_by_destination("beta.dataset.table")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.name, "producer");
        assert_eq!(project.name, "beta");
        assert!(repo.get_by_destination("missing").await.unwrap().is_none());
    }
}
