//! Dependency resolution for job specifications.
//!
//! Dependencies arrive from three sources and are merged by dependency name:
//!
//! 1. **Plugin-inferred**: the task plugin's dependency-resolver capability
//!    emits destination URNs, resolved to jobs through the project-scoped
//!    repository
//! 2. **Static**: user-declared entries, a bare name for same-project
//!    dependencies or `project/job` across projects
//! 3. **Hook-intra**: hook plugins declare the hooks they run after within
//!    the same job
//!
//! The resolver is read-only against repositories and works on a clone of
//! its input, so a failure leaves the caller's spec untouched.

use std::sync::Arc;

use metrics::histogram;
use tracing::debug;

use optimus_core::job::{DependencyType, JobDependency, JobSpec};
use optimus_core::project::ProjectSpec;

use crate::error::{Error, Result};
use crate::metrics::{labels as metric_labels, names as metric_names, TimingGuard};
use crate::plugin::{GenerateRequest, PluginRegistry};
use crate::retry::retry_with_backoff;
use crate::store::ProjectJobRepository;

/// Resolves the dependency map of job specifications.
#[derive(Clone)]
pub struct DependencyResolver {
    plugins: Arc<PluginRegistry>,
}

impl DependencyResolver {
    /// Creates a resolver backed by the given plugin registry.
    #[must_use]
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self { plugins }
    }

    /// Returns a clone of `job` with a fully hydrated dependency map.
    ///
    /// Deterministic for fixed inputs, idempotent, and side-effect free on
    /// failure.
    ///
    /// # Errors
    /// - [`Error::UnknownRuntimeDependency`] when a plugin-emitted URN
    ///   resolves to no job
    /// - [`Error::UnknownLocalDependency`] / [`Error::UnknownCrossTenantDependency`]
    ///   when a static declaration resolves to no job
    /// - Repository and plugin failures propagate unchanged
    pub async fn resolve(
        &self,
        project: &ProjectSpec,
        repo: &dyn ProjectJobRepository,
        job: &JobSpec,
    ) -> Result<JobSpec> {
        let _timing = TimingGuard::new(|duration| {
            histogram!(
                metric_names::RESOLVE_SECONDS,
                metric_labels::RESOLVER => "dependency",
            )
            .record(duration.as_secs_f64());
        });

        let mut resolved = job.clone();
        self.resolve_inferred(project, repo, &mut resolved).await?;
        Self::resolve_static(project, repo, &mut resolved).await?;
        self.resolve_hook_dependencies(&mut resolved);
        Ok(resolved)
    }

    /// Step 1: dependencies inferred from the task plugin's destinations.
    ///
    /// Skipped entirely when the task plugin does not advertise the
    /// dependency-resolver capability.
    async fn resolve_inferred(
        &self,
        project: &ProjectSpec,
        repo: &dyn ProjectJobRepository,
        spec: &mut JobSpec,
    ) -> Result<()> {
        let Some(resolver_mod) = self.plugins.dependency_mod(&spec.task.unit) else {
            debug!(
                job = %spec.name,
                unit = %spec.task.unit,
                "task plugin has no dependency resolver, keeping declared dependencies"
            );
            return Ok(());
        };

        let request = GenerateRequest {
            config: spec.task.config.clone(),
            assets: spec.assets.clone(),
            project: project.clone(),
        };
        let urns = retry_with_backoff("generate_dependencies", || {
            resolver_mod.generate_dependencies(request.clone())
        })
        .await?;

        for urn in urns {
            let Some((dep_job, dep_project)) = repo.get_by_destination(&urn).await? else {
                return Err(Error::UnknownRuntimeDependency {
                    resource: urn,
                    job: spec.name.clone(),
                });
            };

            // A plugin may list the job's own output among its inputs; the
            // self-edge would read as a single-node cycle downstream.
            if dep_job.name == spec.name {
                continue;
            }

            let kind = if dep_project.name == project.name {
                DependencyType::Intra
            } else {
                DependencyType::Inter
            };
            spec.dependencies.insert(
                dep_job.name.clone(),
                JobDependency {
                    kind,
                    job: Some(Box::new(dep_job)),
                    project: Some(dep_project),
                },
            );
        }
        Ok(())
    }

    /// Step 2: user-declared dependencies still missing their snapshots.
    async fn resolve_static(
        project: &ProjectSpec,
        repo: &dyn ProjectJobRepository,
        spec: &mut JobSpec,
    ) -> Result<()> {
        let unresolved: Vec<String> = spec
            .dependencies
            .iter()
            .filter(|(_, dep)| dep.job.is_none())
            .map(|(name, _)| name.clone())
            .collect();

        for name in unresolved {
            let kind = spec
                .dependencies
                .get(&name)
                .map(|dep| dep.kind)
                .unwrap_or_default();
            let (dep_job, dep_project) = match kind {
                DependencyType::Intra => {
                    let dep_job = repo.get_by_name(&name).await?.ok_or_else(|| {
                        Error::UnknownLocalDependency { name: name.clone() }
                    })?;
                    (dep_job, project.clone())
                }
                DependencyType::Inter => {
                    let (project_name, job_name) = name.split_once('/').ok_or_else(|| {
                        Error::UnknownCrossTenantDependency { name: name.clone() }
                    })?;
                    repo.get_by_name_for_project(project_name, job_name)
                        .await?
                        .ok_or_else(|| Error::UnknownCrossTenantDependency {
                            name: name.clone(),
                        })?
                }
                // Hook links live on the hook list, not in this map.
                DependencyType::Hook => continue,
            };

            if let Some(dep) = spec.dependencies.get_mut(&name) {
                dep.job = Some(Box::new(dep_job));
                dep.project = Some(dep_project);
            }
        }
        Ok(())
    }

    /// Step 3: wire hook ordering from plugin-declared `depends_on` lists.
    ///
    /// Hook names absent from the job are dropped silently here; the
    /// scheduler deploy step revalidates.
    fn resolve_hook_dependencies(&self, spec: &mut JobSpec) {
        let hook_units: Vec<String> = spec.hooks.iter().map(|h| h.unit.clone()).collect();
        for hook in &mut spec.hooks {
            let Some(entry) = self.plugins.get(&hook.unit) else {
                continue;
            };
            hook.depends_on = entry
                .info
                .depends_on
                .iter()
                .filter(|name| hook_units.iter().any(|unit| unit == *name))
                .cloned()
                .collect();
        }
    }
}
