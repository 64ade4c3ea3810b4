//! Versioned job specifications.
//!
//! A [`JobSpec`] is immutable per deployment generation. It carries the cron
//! schedule, the task definition with its data window, an ordered hook list,
//! behavioral flags, and a dependency map keyed by dependency name.
//!
//! Dependency values may hold resolved job and project snapshots. These are
//! purely navigational: [`JobSpec::scrub_references`] clears them before
//! persistence and the dependency resolver re-hydrates them on load. Graph
//! traversal always goes through the graph's name index, never through the
//! snapshots stored here.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::project::ProjectSpec;

/// Serde adapter storing a [`chrono::Duration`] as whole seconds.
///
/// Keeps persisted snapshots canonical: the same window always serializes to
/// the same integer, so tree round-trips are byte-identical.
pub mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serializes the duration as its whole-second count.
    ///
    /// # Errors
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.num_seconds().serialize(serializer)
    }

    /// Deserializes a whole-second count into a duration.
    ///
    /// # Errors
    /// Propagates deserializer errors.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        i64::deserialize(deserializer).map(Duration::seconds)
    }
}

/// A versioned job specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Spec version, bumped on every redeploy.
    pub version: i32,
    /// Job name, unique within its project.
    pub name: String,
    /// Owning team or user, informational.
    pub owner: String,
    /// Free-form description.
    pub description: String,
    /// Arbitrary labels propagated to the scheduler.
    pub labels: BTreeMap<String, String>,
    /// When and how often the job runs.
    pub schedule: JobSchedule,
    /// The unit of work this job executes.
    pub task: JobTask,
    /// Ordered asset files shipped alongside the task.
    pub assets: Vec<JobAsset>,
    /// Ordered hook list executed around the task.
    pub hooks: Vec<JobHook>,
    /// Scheduling behavior flags and retry policy.
    pub behavior: JobBehavior,
    /// Dependency map keyed by dependency name.
    pub dependencies: BTreeMap<String, JobDependency>,
}

impl JobSpec {
    /// Creates a minimal job spec with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Clears every navigational snapshot from the dependency map and hooks.
    ///
    /// Must be called before handing the spec to a persistence layer; the
    /// resolver re-hydrates the snapshots on load.
    pub fn scrub_references(&mut self) {
        for dependency in self.dependencies.values_mut() {
            dependency.job = None;
            dependency.project = None;
        }
    }

    /// Finds a hook by its plugin handle.
    #[must_use]
    pub fn hook(&self, unit: &str) -> Option<&JobHook> {
        self.hooks.iter().find(|h| h.unit == unit)
    }
}

/// Cron schedule with validity bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSchedule {
    /// First instant the job is eligible to run.
    pub start_date: DateTime<Utc>,
    /// Optional last eligible instant.
    pub end_date: Option<DateTime<Utc>>,
    /// Cron expression or descriptor alias (`@daily`, `@hourly`, ...).
    pub interval: String,
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self {
            start_date: DateTime::UNIX_EPOCH,
            end_date: None,
            interval: String::new(),
        }
    }
}

/// The unit of work a job executes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobTask {
    /// Plugin handle naming the task implementation.
    pub unit: String,
    /// Ordered plugin configuration entries.
    pub config: Vec<JobConfigEntry>,
    /// The data window the task reads from, relative to each scheduled instant.
    pub window: TaskWindow,
    /// Execution priority weight, assigned by the priority resolver.
    pub priority: Option<i32>,
}

/// A single plugin configuration entry.
///
/// Entries are ordered; plugins may be sensitive to declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfigEntry {
    /// Configuration key.
    pub name: String,
    /// Configuration value, possibly templated.
    pub value: String,
}

impl JobConfigEntry {
    /// Creates a configuration entry.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An asset file shipped with the task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAsset {
    /// Asset file name.
    pub name: String,
    /// Asset contents.
    pub value: String,
}

/// The per-task data window.
///
/// A run scheduled at instant `t` reads `[t − offset − size, t − offset]`,
/// truncated to the configured unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskWindow {
    /// Window length.
    #[serde(with = "duration_seconds")]
    pub size: Duration,
    /// Distance between the scheduled instant and the window end.
    #[serde(with = "duration_seconds")]
    pub offset: Duration,
    /// Unit the window bounds are truncated to.
    pub truncate_to: WindowTruncate,
}

impl Default for TaskWindow {
    fn default() -> Self {
        Self {
            size: Duration::hours(24),
            offset: Duration::zero(),
            truncate_to: WindowTruncate::Day,
        }
    }
}

/// Truncation unit for window bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowTruncate {
    /// Truncate to the hour.
    Hour,
    /// Truncate to midnight.
    #[default]
    Day,
    /// Truncate to the start of the ISO week.
    Week,
    /// Truncate to the first of the month.
    Month,
}

/// A hook executed around the task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHook {
    /// Plugin handle naming the hook implementation.
    pub unit: String,
    /// Ordered hook configuration entries.
    pub config: Vec<JobConfigEntry>,
    /// Names of hooks in the same job this hook runs after.
    ///
    /// Populated by the dependency resolver from the hook plugin's declared
    /// `depends_on` list, filtered to hooks actually present in the job.
    pub depends_on: Vec<String>,
}

/// Scheduling behavior flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBehavior {
    /// Whether each run must wait for the previous run to succeed.
    pub depends_on_past: bool,
    /// Whether missed past runs are backfilled on deploy.
    pub catch_up: bool,
    /// Retry policy applied by the external scheduler.
    pub retry: RetryPolicy,
    /// Notification targets per job event.
    pub notify: Vec<JobNotifier>,
}

/// Retry policy for failed runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts.
    pub count: u32,
    /// Delay between attempts.
    #[serde(with = "duration_seconds")]
    pub delay: Duration,
    /// Whether the delay grows exponentially.
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 0,
            delay: Duration::zero(),
            exponential_backoff: false,
        }
    }
}

/// Notification routing for a job event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNotifier {
    /// The event that triggers the notification (e.g. `failure`, `sla_miss`).
    pub on: String,
    /// Destination channels.
    pub channels: Vec<String>,
}

/// A single entry in a job's dependency map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDependency {
    /// How the two jobs are related.
    pub kind: DependencyType,
    /// Resolved dependency job snapshot; navigational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Box<JobSpec>>,
    /// Resolved owning project snapshot; navigational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectSpec>,
}

impl JobDependency {
    /// Creates an unresolved dependency of the given kind.
    #[must_use]
    pub fn unresolved(kind: DependencyType) -> Self {
        Self {
            kind,
            job: None,
            project: None,
        }
    }

    /// Returns the resolved dependency job name, if hydrated.
    #[must_use]
    pub fn job_name(&self) -> Option<&str> {
        self.job.as_deref().map(|j| j.name.as_str())
    }
}

/// The relationship kind between a job and one of its dependencies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Both jobs live in the same project.
    #[default]
    Intra,
    /// The dependency lives in another project.
    Inter,
    /// Dependency between hooks inside a single job.
    Hook,
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Intra => "intra",
            Self::Inter => "inter",
            Self::Hook => "hook",
        };
        write!(f, "{s}")
    }
}

impl FromStr for DependencyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "intra" => Ok(Self::Intra),
            "inter" => Ok(Self::Inter),
            "hook" => Ok(Self::Hook),
            other => Err(Error::UnsupportedDependencyType {
                kind: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_spec() -> JobSpec {
        let mut spec = JobSpec::named("transform");
        spec.dependencies.insert(
            "ingest".into(),
            JobDependency {
                kind: DependencyType::Intra,
                job: Some(Box::new(JobSpec::named("ingest"))),
                project: Some(ProjectSpec::new("analytics")),
            },
        );
        spec
    }

    #[test]
    fn scrub_references_clears_snapshots() {
        let mut spec = resolved_spec();
        spec.scrub_references();
        let dep = spec.dependencies.get("ingest").unwrap();
        assert!(dep.job.is_none());
        assert!(dep.project.is_none());
        assert_eq!(dep.kind, DependencyType::Intra);
    }

    #[test]
    fn dependency_type_parses_known_tags() {
        assert_eq!("intra".parse::<DependencyType>().unwrap(), DependencyType::Intra);
        assert_eq!("inter".parse::<DependencyType>().unwrap(), DependencyType::Inter);
        assert_eq!("hook".parse::<DependencyType>().unwrap(), DependencyType::Hook);
    }

    #[test]
    fn dependency_type_rejects_unknown_tag() {
        let err = "extra".parse::<DependencyType>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedDependencyType { kind } if kind == "extra"));
    }

    #[test]
    fn window_serializes_as_seconds() {
        let window = TaskWindow {
            size: Duration::hours(48),
            offset: Duration::zero(),
            truncate_to: WindowTruncate::Day,
        };
        let json = serde_json::to_string(&window).unwrap();
        assert!(json.contains("172800"));
        let back: TaskWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, window);
    }

    #[test]
    fn hook_lookup_by_unit() {
        let mut spec = JobSpec::named("with-hooks");
        spec.hooks.push(JobHook {
            unit: "transporter".into(),
            config: vec![],
            depends_on: vec![],
        });
        assert!(spec.hook("transporter").is_some());
        assert!(spec.hook("predator").is_none());
    }
}
