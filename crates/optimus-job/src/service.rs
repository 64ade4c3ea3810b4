//! Job service façade.
//!
//! Binds the graph, resolvers, and replay manager to storage and the
//! external scheduler. Deployment persists specs, resolves dependencies
//! across the whole project (accumulating per-job errors instead of
//! short-circuiting), assigns priorities, pushes compiled jobs to the
//! scheduler, and prunes scheduler-known jobs that are no longer deployed.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use optimus_core::id::ReplayId;
use optimus_core::job::JobSpec;
use optimus_core::project::{NamespaceSpec, ProjectSpec};
use optimus_core::replay::{ExecutionTree, ReplayRequest, ReplaySpec, ReplayState};

use crate::error::{Error, Result};
use crate::metrics::{labels as metric_labels, names as metric_names};
use crate::replay::manager::ReplayManager;
use crate::replay::planner;
use crate::resolver::dependency::DependencyResolver;
use crate::resolver::priority::PriorityResolver;
use crate::scheduler::Scheduler;
use crate::store::{JobRepositoryFactory, ProjectJobRepositoryFactory};

/// Orchestrates deployment and replay entry points for job specifications.
pub struct JobService {
    dependency_resolver: DependencyResolver,
    priority_resolver: PriorityResolver,
    scheduler: Arc<dyn Scheduler>,
    replay_manager: Arc<ReplayManager>,
    project_jobs: Arc<dyn ProjectJobRepositoryFactory>,
    namespace_jobs: Arc<dyn JobRepositoryFactory>,
}

impl JobService {
    /// Creates a service over the given collaborators.
    #[must_use]
    pub fn new(
        dependency_resolver: DependencyResolver,
        priority_resolver: PriorityResolver,
        scheduler: Arc<dyn Scheduler>,
        replay_manager: Arc<ReplayManager>,
        project_jobs: Arc<dyn ProjectJobRepositoryFactory>,
        namespace_jobs: Arc<dyn JobRepositoryFactory>,
    ) -> Self {
        Self {
            dependency_resolver,
            priority_resolver,
            scheduler,
            replay_manager,
            project_jobs,
            namespace_jobs,
        }
    }

    /// Deploys job specs to a namespace.
    ///
    /// 1. Persists each submitted spec (snapshots scrubbed)
    /// 2. Resolves dependencies for every job in the project, accumulating
    ///    per-job errors
    /// 3. Assigns priority weights over the resolved set
    /// 4. Pushes the full resolved-and-prioritized project set to the
    ///    external scheduler — priorities shift with every dependency
    ///    change, so previously deployed siblings are re-pushed too
    /// 5. Deletes scheduler-known jobs missing from that full set
    ///
    /// # Errors
    /// Persistence and resolution failures are accumulated and surfaced as
    /// a single (possibly [`Error::Compound`]) error before any scheduler
    /// call; scheduler failures propagate directly.
    pub async fn deploy(
        &self,
        project: &ProjectSpec,
        namespace: &NamespaceSpec,
        specs: Vec<JobSpec>,
    ) -> Result<()> {
        let repo = self.namespace_jobs.for_namespace(project, namespace);
        let mut errors = Vec::new();
        let submitted = specs.len();

        for mut spec in specs {
            spec.scrub_references();
            if let Err(err) = repo.save(spec).await {
                errors.push(err);
            }
        }

        let (resolved, resolve_errors) = self.resolve_project_jobs(project).await?;
        errors.extend(resolve_errors);
        if let Err(err) = Error::from_accumulated(errors) {
            counter!(
                metric_names::DEPLOY_JOBS_TOTAL,
                metric_labels::STATUS => "failed",
            )
            .increment(1);
            return Err(err);
        }

        let prioritized = self.priority_resolver.resolve(resolved)?;
        self.scheduler
            .deploy_jobs(project, namespace, &prioritized)
            .await?;
        let deployed_names: Vec<&str> =
            prioritized.iter().map(|job| job.name.as_str()).collect();

        let known = self.scheduler.list_job_names(namespace).await?;
        let stale: Vec<String> = known
            .into_iter()
            .filter(|name| !deployed_names.contains(&name.as_str()))
            .collect();
        if !stale.is_empty() {
            warn!(
                namespace = %namespace.name,
                count = stale.len(),
                "removing scheduler jobs no longer present in the project"
            );
            self.scheduler.delete_jobs(namespace, &stale).await?;
        }

        counter!(
            metric_names::DEPLOY_JOBS_TOTAL,
            metric_labels::STATUS => "success",
        )
        .increment(1);
        info!(
            project = %project.name,
            namespace = %namespace.name,
            submitted,
            deployed = deployed_names.len(),
            "deployment complete"
        );
        Ok(())
    }

    /// Deletes a job from storage and the scheduler.
    ///
    /// # Errors
    /// Returns [`Error::DependencyExists`] naming a dependent job if any
    /// other job in the project depends on `spec`.
    pub async fn delete(
        &self,
        project: &ProjectSpec,
        namespace: &NamespaceSpec,
        spec: &JobSpec,
    ) -> Result<()> {
        let all = self.project_jobs.for_project(project).get_all().await?;
        if let Some(dependent) = all.iter().find(|job| {
            job.name != spec.name
                && job.dependencies.iter().any(|(declared, dep)| {
                    dep.job_name()
                        .map_or(declared == &spec.name, |resolved| resolved == spec.name)
                })
        }) {
            return Err(Error::DependencyExists {
                dependent: dependent.name.clone(),
            });
        }

        self.namespace_jobs
            .for_namespace(project, namespace)
            .delete(&spec.name)
            .await?;
        self.scheduler
            .delete_jobs(namespace, std::slice::from_ref(&spec.name))
            .await
    }

    /// Resolves every job in the project into a name-keyed map.
    ///
    /// # Errors
    /// Surfaces accumulated per-job resolution failures as a single error.
    pub async fn resolved_job_map(
        &self,
        project: &ProjectSpec,
    ) -> Result<BTreeMap<String, JobSpec>> {
        let (resolved, errors) = self.resolve_project_jobs(project).await?;
        Error::from_accumulated(errors)?;
        Ok(resolved
            .into_iter()
            .map(|job| (job.name.clone(), job))
            .collect())
    }

    /// Expands a replay request without committing it.
    ///
    /// # Errors
    /// Resolution and planning failures propagate.
    pub async fn replay_dry_run(&self, request: &ReplayRequest) -> Result<ExecutionTree> {
        let jobs = self.resolved_job_map(&request.project).await?;
        planner::build_execution_tree(&jobs, request)
    }

    /// Validates and commits a replay request; returns the replay ID.
    ///
    /// # Errors
    /// Resolution, validation, and persistence failures propagate.
    pub async fn replay(&self, request: &ReplayRequest) -> Result<ReplayId> {
        let jobs = self.resolved_job_map(&request.project).await?;
        self.replay_manager.submit(request, &jobs).await
    }

    /// Returns a replay's lifecycle status with per-instant run states.
    ///
    /// # Errors
    /// Unknown IDs and scheduler failures propagate.
    pub async fn replay_status(&self, id: ReplayId, project: &ProjectSpec) -> Result<ReplayState> {
        self.replay_manager.get_replay_state(id, project).await
    }

    /// Lists a project's recent replays, newest first.
    ///
    /// # Errors
    /// Repository failures propagate.
    pub async fn list_replays(&self, project: &ProjectSpec) -> Result<Vec<ReplaySpec>> {
        self.replay_manager.list(&project.name).await
    }

    /// Resolves dependencies for every job in the project, returning the
    /// successes alongside the per-job failures.
    async fn resolve_project_jobs(
        &self,
        project: &ProjectSpec,
    ) -> Result<(Vec<JobSpec>, Vec<Error>)> {
        let repo = self.project_jobs.for_project(project);
        let jobs = repo.get_all().await?;

        let mut resolved = Vec::with_capacity(jobs.len());
        let mut errors = Vec::new();
        for job in jobs {
            match self
                .dependency_resolver
                .resolve(project, repo.as_ref(), &job)
                .await
            {
                Ok(spec) => resolved.push(spec),
                Err(err) => errors.push(err),
            }
        }
        Ok((resolved, errors))
    }
}
