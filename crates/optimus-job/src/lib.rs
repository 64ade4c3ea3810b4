//! # optimus-job
//!
//! The job-graph and replay engine of the Optimus orchestration control
//! plane.
//!
//! This crate implements the hard core of the system:
//!
//! - **Dependency Resolution**: Merges plugin-inferred destination URNs,
//!   static user declarations, and hook-intra links into a fully hydrated
//!   per-job dependency map
//! - **Priority Resolution**: Converts the resolved job graph into a total
//!   weight assignment consumed by the external scheduler
//! - **Replay Planning**: Expands a `(job, start, end)` request into an
//!   execution tree of per-job scheduled instants, honoring cron schedules
//!   and per-job data windows
//! - **Replay Lifecycle**: Accepts, de-duplicates, dispatches, and
//!   synchronizes replays against the external scheduler's run state
//!
//! ## Core Concepts
//!
//! - **Job Graph**: Multi-root directed graph keyed by job name, built from
//!   resolved dependencies, checked acyclic before any BFS consumer runs
//! - **Execution Tree**: The replay-scoped expansion of a job and its
//!   downstream dependents over concrete scheduled instants
//! - **Single-Active-Per-Job**: At most one non-terminal replay exists per
//!   `(project, job)` at any instant
//!
//! ## Collaborators
//!
//! The engine consumes — never supplies — the external scheduler
//! ([`scheduler::Scheduler`]), task/hook plugins ([`plugin`]), and the
//! persistence layer ([`store`]). In-memory repository implementations are
//! provided for tests.
//!
//! ## Example
//!
//! ```rust
//! use optimus_core::job::JobSpec;
//! use optimus_job::resolver::priority::PriorityResolver;
//!
//! # fn main() -> optimus_job::error::Result<()> {
//! let resolver = PriorityResolver::new();
//! let resolved = resolver.resolve(vec![JobSpec::named("ingest")])?;
//! assert_eq!(resolved[0].task.priority, Some(10_000));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod cron;
pub mod error;
pub mod executor;
pub mod graph;
pub mod metrics;
pub mod plugin;
pub mod replay;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cron::CronSchedule;
    pub use crate::error::{Error, Result};
    pub use crate::executor::ParallelRunner;
    pub use crate::graph::{JobGraph, JobNode};
    pub use crate::plugin::{DependencyResolverMod, PluginInfo, PluginRegistry};
    pub use crate::replay::manager::{ReplayManager, ReplayManagerConfig};
    pub use crate::replay::syncer::{ReplaySyncer, ReplaySyncerConfig};
    pub use crate::resolver::dependency::DependencyResolver;
    pub use crate::resolver::priority::PriorityResolver;
    pub use crate::scheduler::Scheduler;
    pub use crate::service::JobService;
    pub use crate::store::{CasResult, ReplayRepository};
}
