//! Priority weight assignment over the resolved job graph.
//!
//! The external scheduler orders ready tasks by an integer weight. Jobs with
//! downstream dependents should run first, so weights are assigned by a
//! breadth-first traversal from the upstream-most jobs: roots get the
//! maximum weight and each frontier below loses a fixed gap.
//!
//! For example, with chains `[j1 ← j2 ← j3]`, `[j4]`, `[j5 ← j6]`: j1, j4,
//! and j5 have no upstreams and get the maximum weight; j2 and j6 get one
//! gap less; j3 two gaps less.

use std::collections::HashMap;

use metrics::histogram;

use optimus_core::job::{DependencyType, JobSpec};

use crate::error::{Error, Result};
use crate::graph::{JobGraph, JobNode};
use crate::metrics::{labels as metric_labels, names as metric_names, TimingGuard};

/// Minimum weight a job can receive; matches the scheduler's default.
pub const MIN_PRIORITY_WEIGHT: i32 = 1;

/// Weight assigned to upstream-most jobs.
pub const MAX_PRIORITY_WEIGHT: i32 = 10_000;

/// Weight decrement per dependency depth.
pub const PRIORITY_WEIGHT_GAP: i32 = 10;

/// Assigns priority weights to jobs based on their dependency depth.
///
/// Input dependencies must already be resolved; the resolver only follows
/// hydrated job snapshots and statically declared names.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityResolver;

impl PriorityResolver {
    /// Creates a priority resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the input jobs with `task.priority` set on every spec.
    ///
    /// # Errors
    /// - [`Error::JobNotFound`] when a same-project dependency is missing
    ///   from the input set
    /// - [`Error::CycleDetected`] when the dependency graph is cyclic
    /// - [`Error::PriorityNotFound`] if a job ends up without a weight
    ///   (indicates a graph construction bug)
    pub fn resolve(&self, jobs: Vec<JobSpec>) -> Result<Vec<JobSpec>> {
        let _timing = TimingGuard::new(|duration| {
            histogram!(
                metric_names::RESOLVE_SECONDS,
                metric_labels::RESOLVER => "priority",
            )
            .record(duration.as_secs_f64());
        });

        let graph = Self::build_graph(&jobs)?;
        graph.check_acyclic()?;
        let weights = Self::assign_weights(&graph);

        let mut resolved = jobs;
        for job in &mut resolved {
            let weight =
                weights
                    .get(&job.name)
                    .copied()
                    .ok_or_else(|| Error::PriorityNotFound {
                        name: job.name.clone(),
                    })?;
            job.task.priority = Some(weight);
        }
        Ok(resolved)
    }

    /// Builds the multi-root graph with edges from dependency to dependent.
    ///
    /// Dependencies referencing jobs outside the input set are materialized
    /// as stub nodes and unconditionally marked root: their own upstreams
    /// are opaque to this project.
    fn build_graph(jobs: &[JobSpec]) -> Result<JobGraph> {
        let known: HashMap<&str, &JobSpec> =
            jobs.iter().map(|job| (job.name.as_str(), job)).collect();

        let mut graph = JobGraph::new();
        for job in jobs {
            graph.add_node(JobNode::new(job.clone()));
            for (declared_name, dependency) in &job.dependencies {
                if dependency.kind == DependencyType::Hook {
                    continue;
                }
                let dep_name = dependency
                    .job_name()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| bare_name(declared_name).to_string());

                if let Some(spec) = known.get(dep_name.as_str()) {
                    graph.add_node(JobNode::new((*spec).clone()));
                } else {
                    if dependency.kind == DependencyType::Intra {
                        return Err(Error::JobNotFound { name: dep_name });
                    }
                    graph.add_node(JobNode::stub(dep_name.clone()));
                    graph.mark_root(&dep_name)?;
                }
                graph.add_edge(&dep_name, &job.name)?;
            }

            if job.dependencies.is_empty() {
                graph.mark_root(&job.name)?;
            }
        }
        Ok(graph)
    }

    /// Breadth-first weight assignment from the roots.
    ///
    /// A job reachable at several depths keeps the weight of its deepest
    /// frontier, so a job never outweighs one of its transitive upstreams.
    fn assign_weights(graph: &JobGraph) -> HashMap<String, i32> {
        let mut weights = HashMap::new();
        let mut frontier: Vec<String> = graph
            .root_names()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        let mut weight = MAX_PRIORITY_WEIGHT;

        while !frontier.is_empty() {
            let mut next: Vec<String> = Vec::new();
            for name in &frontier {
                weights.insert(name.clone(), weight);
                for child in graph.dependents(name) {
                    if !next.iter().any(|queued| queued == child) {
                        next.push(child.to_string());
                    }
                }
            }
            frontier = next;
            weight = (weight - PRIORITY_WEIGHT_GAP).max(MIN_PRIORITY_WEIGHT);
        }
        weights
    }
}

/// Strips a `project/` prefix from a declared dependency name.
fn bare_name(declared: &str) -> &str {
    declared.split_once('/').map_or(declared, |(_, job)| job)
}
