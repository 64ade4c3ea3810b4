//! Persistence contracts consumed by the engine.
//!
//! The engine calls these repositories; it never supplies production
//! implementations. Replay status transitions use compare-and-swap
//! semantics — a write names the statuses it expects to find and fails
//! atomically if the stored status is stale — which is what makes worker
//! dispatch and synchronizer transitions safe across instances.
//!
//! [`memory`] provides in-memory implementations for tests and development.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use optimus_core::id::ReplayId;
use optimus_core::job::JobSpec;
use optimus_core::project::{NamespaceSpec, ProjectSpec};
use optimus_core::replay::{ReplayMessage, ReplaySpec, ReplayStatus};

use crate::error::Result;

/// Result of a conditional replay status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The transition was applied.
    Success,
    /// No replay with that ID exists.
    NotFound,
    /// The stored status matched none of the expected statuses.
    StatusMismatch {
        /// The status actually found.
        actual: ReplayStatus,
    },
}

impl CasResult {
    /// Returns true if the transition was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Project catalog.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Returns every registered project.
    async fn get_all(&self) -> Result<Vec<ProjectSpec>>;

    /// Looks up a project by name.
    async fn get_by_name(&self, name: &str) -> Result<Option<ProjectSpec>>;
}

/// Namespace-scoped job spec storage.
#[async_trait]
pub trait JobSpecRepository: Send + Sync {
    /// Inserts or replaces a job spec. Navigational snapshots must already
    /// be scrubbed by the caller.
    async fn save(&self, job: JobSpec) -> Result<()>;

    /// Removes a job spec by name.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Returns every job spec in the namespace.
    async fn get_all(&self) -> Result<Vec<JobSpec>>;

    /// Looks up a job spec by name.
    async fn get_by_name(&self, name: &str) -> Result<Option<JobSpec>>;
}

/// Project-scoped job lookups used by the dependency resolver.
#[async_trait]
pub trait ProjectJobRepository: Send + Sync {
    /// Resolves a destination URN to the job producing it, with its project.
    ///
    /// Returns `Ok(None)` when no job claims the destination; other failures
    /// propagate unchanged.
    async fn get_by_destination(&self, urn: &str) -> Result<Option<(JobSpec, ProjectSpec)>>;

    /// Looks up a job in this project by name.
    async fn get_by_name(&self, name: &str) -> Result<Option<JobSpec>>;

    /// Looks up a job in another project by name.
    async fn get_by_name_for_project(
        &self,
        project: &str,
        name: &str,
    ) -> Result<Option<(JobSpec, ProjectSpec)>>;

    /// Returns every job in this project.
    async fn get_all(&self) -> Result<Vec<JobSpec>>;
}

/// Replay record storage.
#[async_trait]
pub trait ReplayRepository: Send + Sync {
    /// Persists a new replay record.
    async fn save(&self, replay: &ReplaySpec) -> Result<()>;

    /// Transitions a replay to `target` if its stored status is one of
    /// `expected`, appending `message` to the record's message list.
    async fn update_status(
        &self,
        id: ReplayId,
        expected: &[ReplayStatus],
        target: ReplayStatus,
        message: ReplayMessage,
    ) -> Result<CasResult>;

    /// Looks up a replay by ID.
    async fn get(&self, id: ReplayId) -> Result<Option<ReplaySpec>>;

    /// Returns replays for a project whose status is in `statuses`.
    async fn get_by_project_and_status(
        &self,
        project: &str,
        statuses: &[ReplayStatus],
    ) -> Result<Vec<ReplaySpec>>;

    /// Returns replays for a project ordered by creation time, newest first.
    async fn get_by_project(&self, project: &str) -> Result<Vec<ReplaySpec>>;
}

/// Produces project-scoped job repositories.
pub trait ProjectJobRepositoryFactory: Send + Sync {
    /// Returns a repository scoped to `project`.
    fn for_project(&self, project: &ProjectSpec) -> Arc<dyn ProjectJobRepository>;
}

/// Produces namespace-scoped job repositories.
pub trait JobRepositoryFactory: Send + Sync {
    /// Returns a repository scoped to `namespace` within `project`.
    fn for_namespace(
        &self,
        project: &ProjectSpec,
        namespace: &NamespaceSpec,
    ) -> Arc<dyn JobSpecRepository>;
}
