//! Error types for the job-graph and replay engine.

use chrono::{DateTime, Utc};

/// The result type used throughout `optimus-job`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in resolution, planning, and replay operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cycle was detected in the job dependency graph.
    #[error("cycle detected in dependency graph: {}", path.join(" -> "))]
    CycleDetected {
        /// Job names along the cycle, first node repeated at the end.
        path: Vec<String>,
    },

    /// A job was not found while looking it up by name.
    #[error("job spec not found: {name}")]
    JobNotFound {
        /// The job name that was not found.
        name: String,
    },

    /// A graph node referenced by an edge operation does not exist.
    #[error("graph node not found: {name}")]
    GraphNodeNotFound {
        /// The missing node name.
        name: String,
    },

    /// The priority resolver produced no weight for an input job.
    #[error("priority weight not found for job: {name}")]
    PriorityNotFound {
        /// The job left without a weight.
        name: String,
    },

    /// A plugin-emitted destination URN did not resolve to any job.
    #[error("could not find destination {resource} while resolving dependencies of {job}")]
    UnknownRuntimeDependency {
        /// The destination URN that failed to resolve.
        resource: String,
        /// The job whose dependencies were being resolved.
        job: String,
    },

    /// A statically declared same-project dependency did not resolve.
    #[error("unknown local dependency: {name}")]
    UnknownLocalDependency {
        /// The declared dependency name.
        name: String,
    },

    /// A statically declared cross-project dependency did not resolve.
    #[error("unknown cross-project dependency: {name}")]
    UnknownCrossTenantDependency {
        /// The declared `project/job` dependency name.
        name: String,
    },

    /// A dependency carried a tag outside the supported set.
    #[error("unsupported dependency type: {kind}")]
    UnsupportedDependencyType {
        /// The rejected tag.
        kind: String,
    },

    /// A cron expression could not be parsed.
    #[error("invalid cron expression '{expression}': {message}")]
    CronParse {
        /// The offending expression.
        expression: String,
        /// Description of the parse failure.
        message: String,
    },

    /// A cron schedule produced no upcoming firing.
    #[error("cron expression '{expression}' has no firing after {after}")]
    CronExhausted {
        /// The expression that was evaluated.
        expression: String,
        /// The instant the evaluation started from.
        after: DateTime<Utc>,
    },

    /// The replay window is inverted.
    #[error("replay date range is invalid: end {end} is before start {start}")]
    ReplayDateRangeInvalid {
        /// Requested start day.
        start: DateTime<Utc>,
        /// Requested end day.
        end: DateTime<Utc>,
    },

    /// The replay window extends into the future.
    #[error("replay is allowed on past dates only: end {end} is after now")]
    ReplayOnPastOnly {
        /// Requested end day.
        end: DateTime<Utc>,
    },

    /// A prior replay with an overlapping window is still active.
    #[error("a prior replay for job {job} overlaps the requested window; re-run with force to override")]
    ReplayPriorRunsExist {
        /// The job with overlapping prior replays.
        job: String,
    },

    /// Another replay for the same job currently occupies the active slot.
    #[error("a replay for job {job} is already accepted or in progress")]
    ReplayRequestConflict {
        /// The job with an active replay.
        job: String,
    },

    /// A replay was not found while looking it up by ID.
    #[error("replay not found: {id}")]
    ReplayNotFound {
        /// The replay ID that was not found.
        id: String,
    },

    /// A job cannot be deleted while another job depends on it.
    #[error("job cannot be deleted: {dependent} depends on it")]
    DependencyExists {
        /// The dependent job blocking deletion.
        dependent: String,
    },

    /// The operation was cancelled before it started.
    #[error("operation cancelled")]
    Cancelled,

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A call to the external scheduler failed.
    #[error("scheduler error: {message}")]
    Scheduler {
        /// Description of the scheduler failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A plugin invocation failed.
    #[error("plugin error: {message}")]
    Plugin {
        /// Description of the plugin failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Several per-job errors accumulated by a bulk operation.
    #[error("{} error(s): [{}]", errors.len(), join_errors(errors))]
    Compound {
        /// The accumulated errors.
        errors: Vec<Error>,
    },

    /// An error from the core data model.
    #[error("model error: {0}")]
    Core(#[from] optimus_core::Error),
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new scheduler error.
    #[must_use]
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new plugin error.
    #[must_use]
    pub fn plugin(message: impl Into<String>) -> Self {
        Self::Plugin {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps accumulated errors, unwrapping the singleton case.
    ///
    /// Returns `Ok(())` when the list is empty.
    ///
    /// # Errors
    /// Returns the single error directly, or `Compound` for two or more.
    pub fn from_accumulated(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Compound { errors }),
        }
    }

    /// Returns true for failures worth retrying (deadline, connectivity).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Scheduler { source, .. } | Self::Plugin { source, .. } => source
                .as_deref()
                .and_then(|e| e.downcast_ref::<std::io::Error>())
                .is_some_and(|io| {
                    matches!(
                        io.kind(),
                        std::io::ErrorKind::ConnectionRefused
                            | std::io::ErrorKind::ConnectionReset
                            | std::io::ErrorKind::TimedOut
                    )
                }),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_displays_path() {
        let err = Error::CycleDetected {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "cycle detected in dependency graph: a -> b -> a"
        );
    }

    #[test]
    fn compound_error_joins_members() {
        let err = Error::Compound {
            errors: vec![
                Error::JobNotFound { name: "x".into() },
                Error::UnknownLocalDependency { name: "y".into() },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 error(s)"));
        assert!(msg.contains("job spec not found: x"));
        assert!(msg.contains("unknown local dependency: y"));
    }

    #[test]
    fn from_accumulated_unwraps_singleton() {
        let err = Error::from_accumulated(vec![Error::JobNotFound { name: "x".into() }])
            .unwrap_err();
        assert!(matches!(err, Error::JobNotFound { .. }));
        assert!(Error::from_accumulated(Vec::new()).is_ok());
    }

    #[test]
    fn transient_detection_covers_connection_refused() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::Plugin {
            message: "dial failed".into(),
            source: Some(Box::new(io)),
        };
        assert!(err.is_transient());
        assert!(!Error::plugin("bad request").is_transient());
    }
}
