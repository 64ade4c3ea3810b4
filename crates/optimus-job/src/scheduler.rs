//! The external workflow-scheduler contract.
//!
//! The engine compiles job specs and hands them to an external scheduler
//! (e.g. Airflow); it never executes jobs itself. Implementers supply an
//! adapter for this trait. Only two scheduler capabilities matter to the
//! replay core: querying historical run state and clearing a specific run so
//! it re-executes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use optimus_core::job::JobSpec;
use optimus_core::project::{NamespaceSpec, ProjectSpec};
use optimus_core::replay::JobRunStatus;

use crate::error::Result;

/// Page size used when fetching run states from the scheduler.
pub const RUN_STATUS_BATCH_SIZE: usize = 100;

/// Adapter interface to the external workflow scheduler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Idempotent bulk upsert of compiled jobs for a namespace.
    async fn deploy_jobs(
        &self,
        project: &ProjectSpec,
        namespace: &NamespaceSpec,
        jobs: &[JobSpec],
    ) -> Result<()>;

    /// Removes the named jobs from a namespace.
    async fn delete_jobs(&self, namespace: &NamespaceSpec, names: &[String]) -> Result<()>;

    /// Lists the names of jobs the scheduler currently knows in a namespace.
    async fn list_job_names(&self, namespace: &NamespaceSpec) -> Result<Vec<String>>;

    /// Returns every run of `job_name` scheduled in `[start, end]` with its
    /// observed state, paging internally by `batch_size`.
    async fn get_job_run_status(
        &self,
        project: &ProjectSpec,
        job_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        batch_size: usize,
    ) -> Result<Vec<JobRunStatus>>;

    /// Requests re-execution of the run scheduled at `scheduled_at`.
    async fn clear_job_run(
        &self,
        project: &ProjectSpec,
        job_name: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Dry-run deploy of a single job, validating it scheduler-side.
    async fn verify_job(&self, namespace: &NamespaceSpec, job: &JobSpec) -> Result<()>;
}
