//! # optimus-core
//!
//! Shared primitives for the Optimus data-pipeline orchestration control
//! plane.
//!
//! This crate provides the data model consumed by the job-graph and replay
//! engine in `optimus-job`:
//!
//! - **Identifiers**: Strongly-typed ULID identifiers for replays and backups
//! - **Tenancy**: Projects and their namespaces
//! - **Job Specifications**: Versioned job specs with schedules, task windows,
//!   hooks, and a tagged dependency map
//! - **Replay Model**: Replay requests, persistent replay records, and the
//!   execution tree expanded over scheduled instants
//!
//! ## Crate Boundary
//!
//! `optimus-core` holds data and invariants only. Graph algorithms, cron
//! arithmetic, and lifecycle management live in `optimus-job`; transports and
//! persistence adapters live outside this repository entirely.
//!
//! ## Example
//!
//! ```rust
//! use optimus_core::id::ReplayId;
//! use optimus_core::replay::ReplayStatus;
//!
//! let id = ReplayId::generate();
//! assert!(!ReplayStatus::Accepted.is_terminal());
//! assert_eq!(id.to_string().len(), 26);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod backup;
pub mod error;
pub mod id;
pub mod job;
pub mod project;
pub mod replay;

pub use error::{Error, Result};
pub use id::{BackupId, ReplayId};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backup::BackupSpec;
    pub use crate::error::{Error, Result};
    pub use crate::id::{BackupId, ReplayId};
    pub use crate::job::{
        DependencyType, JobAsset, JobBehavior, JobConfigEntry, JobDependency, JobHook,
        JobSchedule, JobSpec, JobTask, TaskWindow, WindowTruncate,
    };
    pub use crate::project::{NamespaceSpec, ProjectSpec};
    pub use crate::replay::{
        ExecutionStatusTree, ExecutionTree, JobRunState, JobRunStatus, ReplayMessage,
        ReplayRequest, ReplaySpec, ReplayState, ReplayStatus,
    };
}
