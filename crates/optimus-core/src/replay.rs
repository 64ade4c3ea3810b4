//! Replay model: requests, persistent records, and execution trees.
//!
//! A replay re-executes a job and all of its downstream dependents over a
//! historical date range. The planner expands a [`ReplayRequest`] into an
//! [`ExecutionTree`] — per affected job, the exact scheduled instants to
//! re-run. The lifecycle manager persists the tree inside a [`ReplaySpec`]
//! so the synchronizer can traverse downstream nodes without re-running the
//! dependency resolver.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::id::ReplayId;
use crate::job::JobSpec;
use crate::project::ProjectSpec;

/// Lifecycle status of a replay.
///
/// ```text
/// accepted ──▶ in_progress ──▶ replayed ──▶ {success, failed}
///    │              │
///    └── timeout ───┴── dispatch error ──▶ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    /// Validated and persisted, waiting for the dispatch worker.
    Accepted,
    /// The worker is issuing clear calls to the external scheduler.
    InProgress,
    /// Every clear call succeeded; awaiting terminal run states.
    Replayed,
    /// Every re-run completed successfully.
    Success,
    /// A re-run failed, dispatch failed, or the replay timed out.
    Failed,
}

impl ReplayStatus {
    /// Statuses the synchronizer reconciles against the external scheduler.
    pub const SYNCABLE: [Self; 3] = [Self::Replayed, Self::InProgress, Self::Accepted];

    /// Statuses that block a new replay for the same job outright.
    pub const CONFLICTING: [Self; 2] = [Self::Accepted, Self::InProgress];

    /// Returns true once the status can never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Returns true while the replay still occupies the single-active slot
    /// or awaits terminal run states.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Accepted | Self::InProgress | Self::Replayed)
    }
}

impl fmt::Display for ReplayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Accepted => "accepted",
            Self::InProgress => "in_progress",
            Self::Replayed => "replayed",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ReplayStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "in_progress" => Ok(Self::InProgress),
            "replayed" => Ok(Self::Replayed),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(Error::UnknownReplayStatus {
                value: other.to_string(),
            }),
        }
    }
}

/// A status annotation attached to a replay transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayMessage {
    /// Short machine-readable kind (usually the target status).
    pub kind: String,
    /// Human-readable detail.
    pub message: String,
}

impl ReplayMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// A user request to replay a job over a historical date range.
///
/// `start` and `end` are midnight-UTC aligned; `end` is inclusive at day
/// granularity. The planner extends through the next cron firing strictly
/// after `end` to make the instant set inclusive on both sides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequest {
    /// Identifier assigned at submission.
    pub id: ReplayId,
    /// Owning project.
    pub project: ProjectSpec,
    /// The root job to replay.
    pub job: JobSpec,
    /// First day of the window, inclusive.
    pub start: DateTime<Utc>,
    /// Last day of the window, inclusive at day granularity.
    pub end: DateTime<Utc>,
    /// Bypass the prior-overlapping-replay check (never the single-active check).
    pub force: bool,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
}

/// The persistent record of a replay.
///
/// Created by the lifecycle manager on accept; mutated only by the manager's
/// dispatch worker and the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplaySpec {
    /// Replay identifier.
    pub id: ReplayId,
    /// Owning project name.
    pub project: String,
    /// Snapshot of the root job at submission time.
    pub job: JobSpec,
    /// First day of the window, inclusive.
    pub start_date: DateTime<Utc>,
    /// Last day of the window, inclusive at day granularity.
    pub end_date: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: ReplayStatus,
    /// Messages appended on each transition.
    pub messages: Vec<ReplayMessage>,
    /// Snapshot of the expanded execution tree.
    pub execution_tree: ExecutionTree,
    /// When the replay was accepted.
    pub created_at: DateTime<Utc>,
}

/// The expanded execution tree of a replay.
///
/// Nodes are keyed by job name; each node carries the time-ordered set of
/// scheduled instants to re-run and the insertion-ordered list of its
/// dependent jobs. Ordered containers keep serialized snapshots canonical:
/// `serialize → deserialize → serialize` is byte-identical.
///
/// Tree identity is `(root job, per-node instant sets)`: equality ignores
/// the order in which dependent links were recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTree {
    root: String,
    nodes: BTreeMap<String, ExecutionNode>,
}

/// A single node in an [`ExecutionTree`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionNode {
    /// Scheduled instants to re-run, ascending.
    pub runs: BTreeSet<DateTime<Utc>>,
    /// Names of jobs that depend on this node, in insertion order.
    pub dependents: Vec<String>,
}

impl ExecutionTree {
    /// Creates a tree containing only the root node.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let mut nodes = BTreeMap::new();
        nodes.insert(root.clone(), ExecutionNode::default());
        Self { root, nodes }
    }

    /// Returns the root job name.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Ensures a node exists for `name`; existing nodes are left untouched.
    pub fn add_node(&mut self, name: impl Into<String>) {
        self.nodes.entry(name.into()).or_default();
    }

    /// Records that `child` depends on `parent`, creating both as needed.
    ///
    /// The link is recorded at most once per (parent, child) pair.
    pub fn add_dependent(&mut self, parent: &str, child: &str) {
        self.add_node(child);
        let node = self.nodes.entry(parent.to_string()).or_default();
        if !node.dependents.iter().any(|c| c == child) {
            node.dependents.push(child.to_string());
        }
    }

    /// Adds scheduled instants to a node, creating it as needed.
    pub fn add_runs<I>(&mut self, name: &str, runs: I)
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        self.nodes
            .entry(name.to_string())
            .or_default()
            .runs
            .extend(runs);
    }

    /// Returns the node for `name`, if present.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&ExecutionNode> {
        self.nodes.get(name)
    }

    /// Iterates `(name, node)` pairs in name order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &ExecutionNode)> {
        self.nodes.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Returns the number of nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the tree holds only an empty root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1 && self.nodes.values().all(|n| n.runs.is_empty())
    }

    /// Total number of scheduled instants across all nodes.
    #[must_use]
    pub fn total_runs(&self) -> usize {
        self.nodes.values().map(|n| n.runs.len()).sum()
    }
}

impl PartialEq for ExecutionTree {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .all(|(name, node)| other.nodes.get(name).is_some_and(|o| o.runs == node.runs))
    }
}

impl Eq for ExecutionTree {}

/// Observed state of a single scheduled run at the external scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobRunState {
    /// The run is queued but has not started.
    Queued,
    /// The run is waiting on upstream sensors or slots.
    Waiting,
    /// The run is executing.
    Running,
    /// The run completed successfully.
    Success,
    /// The run failed.
    Failed,
}

impl fmt::Display for JobRunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A scheduled run and its observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRunStatus {
    /// The instant the run was scheduled for.
    pub scheduled_at: DateTime<Utc>,
    /// Observed state.
    pub state: JobRunState,
}

/// An execution tree re-annotated with per-instant run states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatusTree {
    root: String,
    nodes: BTreeMap<String, StatusNode>,
}

/// A node of an [`ExecutionStatusTree`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNode {
    /// Observed runs, ascending by scheduled instant.
    pub runs: Vec<JobRunStatus>,
    /// Names of dependent jobs, in insertion order.
    pub dependents: Vec<String>,
}

impl ExecutionStatusTree {
    /// Creates a status tree mirroring the shape of an execution tree,
    /// with empty run lists.
    #[must_use]
    pub fn from_tree(tree: &ExecutionTree) -> Self {
        let nodes = tree
            .nodes()
            .map(|(name, node)| {
                (
                    name.to_string(),
                    StatusNode {
                        runs: Vec::new(),
                        dependents: node.dependents.clone(),
                    },
                )
            })
            .collect();
        Self {
            root: tree.root().to_string(),
            nodes,
        }
    }

    /// Returns the root job name.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Replaces a node's observed runs, sorting them by scheduled instant.
    pub fn set_runs(&mut self, name: &str, mut runs: Vec<JobRunStatus>) {
        runs.sort_by_key(|r| r.scheduled_at);
        self.nodes.entry(name.to_string()).or_default().runs = runs;
    }

    /// Returns the node for `name`, if present.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&StatusNode> {
        self.nodes.get(name)
    }

    /// Iterates `(name, node)` pairs in name order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &StatusNode)> {
        self.nodes.iter().map(|(name, node)| (name.as_str(), node))
    }
}

/// The outcome of a replay status query: lifecycle status plus the
/// per-instant state of every node in the stored tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayState {
    /// Current lifecycle status.
    pub status: ReplayStatus,
    /// The annotated execution tree.
    pub tree: ExecutionStatusTree,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instant(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn status_terminality() {
        assert!(ReplayStatus::Success.is_terminal());
        assert!(ReplayStatus::Failed.is_terminal());
        assert!(!ReplayStatus::Replayed.is_terminal());
        assert!(ReplayStatus::Replayed.is_active());
        assert!(!ReplayStatus::Success.is_active());
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            ReplayStatus::Accepted,
            ReplayStatus::InProgress,
            ReplayStatus::Replayed,
            ReplayStatus::Success,
            ReplayStatus::Failed,
        ] {
            let parsed: ReplayStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn tree_runs_are_ordered_and_deduplicated() {
        let mut tree = ExecutionTree::new("root");
        tree.add_runs("root", [instant(3, 2), instant(1, 2), instant(3, 2)]);
        let runs: Vec<_> = tree.node("root").unwrap().runs.iter().copied().collect();
        assert_eq!(runs, vec![instant(1, 2), instant(3, 2)]);
    }

    #[test]
    fn tree_dependent_links_are_unique() {
        let mut tree = ExecutionTree::new("root");
        tree.add_dependent("root", "child");
        tree.add_dependent("root", "child");
        assert_eq!(tree.node("root").unwrap().dependents, vec!["child"]);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn tree_identity_ignores_dependent_order() {
        let mut left = ExecutionTree::new("root");
        left.add_dependent("root", "a");
        left.add_dependent("root", "b");
        left.add_runs("a", [instant(1, 2)]);

        let mut right = ExecutionTree::new("root");
        right.add_dependent("root", "b");
        right.add_dependent("root", "a");
        right.add_runs("a", [instant(1, 2)]);

        assert_eq!(left, right);

        right.add_runs("b", [instant(2, 2)]);
        assert_ne!(left, right);
    }

    #[test]
    fn tree_serialization_roundtrip_is_bit_identical() {
        let mut tree = ExecutionTree::new("root");
        tree.add_dependent("root", "child");
        tree.add_runs("root", [instant(2, 2), instant(1, 2)]);
        tree.add_runs("child", [instant(3, 2)]);

        let first = serde_json::to_string(&tree).unwrap();
        let decoded: ExecutionTree = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&decoded).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn status_tree_mirrors_shape_and_sorts_runs() {
        let mut tree = ExecutionTree::new("root");
        tree.add_dependent("root", "child");

        let mut status = ExecutionStatusTree::from_tree(&tree);
        assert_eq!(status.root(), "root");
        assert_eq!(status.node("root").unwrap().dependents, vec!["child"]);

        status.set_runs(
            "root",
            vec![
                JobRunStatus {
                    scheduled_at: instant(2, 2),
                    state: JobRunState::Success,
                },
                JobRunStatus {
                    scheduled_at: instant(1, 2),
                    state: JobRunState::Failed,
                },
            ],
        );
        let runs = &status.node("root").unwrap().runs;
        assert_eq!(runs[0].scheduled_at, instant(1, 2));
        assert_eq!(runs[1].scheduled_at, instant(2, 2));
    }
}
