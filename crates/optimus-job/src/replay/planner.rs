//! Replay planning: expanding a request into an execution tree.
//!
//! Given the fully resolved job map of a project and a replay request, the
//! planner computes which scheduled instants of the requested job fall in
//! the window, then walks downstream dependents attaching the instants each
//! child must re-run so it picks up the data its parents will rewrite.
//!
//! Replay dates are day-granular: `end` is inclusive at the day level, and
//! the interval helper extends collection through the next cron firing
//! strictly after the bound so daily and sub-daily schedules are inclusive
//! on both ends.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use optimus_core::job::JobSpec;
use optimus_core::replay::{ExecutionTree, ReplayRequest};

use crate::cron::CronSchedule;
use crate::error::{Error, Result};
use crate::graph::{JobGraph, JobNode};

/// Expands a replay request into an execution tree.
///
/// `jobs` must be the project's dependency-resolved job map. The tree's
/// nodes are the requested job and every transitive same-project dependent;
/// each node carries the scheduled instants to clear at the external
/// scheduler.
///
/// # Errors
/// - [`Error::JobNotFound`] when the requested job is not in the map
/// - [`Error::CycleDetected`] when the downstream topology is cyclic
/// - [`Error::CronParse`] when a job carries an invalid interval
pub fn build_execution_tree(
    jobs: &BTreeMap<String, JobSpec>,
    request: &ReplayRequest,
) -> Result<ExecutionTree> {
    let root = jobs
        .get(&request.job.name)
        .ok_or_else(|| Error::JobNotFound {
            name: request.job.name.clone(),
        })?;

    let mut graph = JobGraph::new();
    graph.add_node(JobNode::new(root.clone()));
    populate_downstream_jobs(&mut graph, &root.name, jobs)?;
    graph.check_acyclic()?;

    let root_schedule = CronSchedule::parse(&root.schedule.interval)?;
    graph.add_runs(
        &root.name,
        runs_between(&root_schedule, request.start, request.end)?,
    )?;

    populate_downstream_runs(&mut graph, jobs)?;

    let mut tree = ExecutionTree::new(root.name.clone());
    let names: Vec<String> = graph.names().map(ToString::to_string).collect();
    for name in names {
        if let Some(node) = graph.get(&name) {
            tree.add_runs(&name, node.runs.iter().copied());
        }
        for child in graph.dependents(&name) {
            tree.add_dependent(&name, child);
        }
    }
    Ok(tree)
}

/// Links every same-project dependent of `current` into the graph, depth
/// first. A job already present is linked but not re-expanded, so diamonds
/// stay single nodes.
fn populate_downstream_jobs(
    graph: &mut JobGraph,
    current: &str,
    jobs: &BTreeMap<String, JobSpec>,
) -> Result<()> {
    for (name, spec) in jobs {
        if name == current || !depends_on(spec, current) {
            continue;
        }
        let newly_added = !graph.contains(name);
        if newly_added {
            graph.add_node(JobNode::new(spec.clone()));
        }
        graph.add_edge(current, name)?;
        if newly_added {
            populate_downstream_jobs(graph, name, jobs)?;
        }
    }
    Ok(())
}

/// Returns true if `spec` declares a same-project dependency on `target`.
///
/// Cross-project dependents are never expanded; their definitions are not
/// observable in the local project map.
fn depends_on(spec: &JobSpec, target: &str) -> bool {
    spec.dependencies.iter().any(|(declared, dep)| {
        dep.kind == optimus_core::job::DependencyType::Intra
            && dep
                .job_name()
                .map_or(declared == target, |resolved| resolved == target)
    })
}

/// Walks the graph in topological order computing each child's instants
/// from its parents' instants.
///
/// For a parent instant `p`, the child re-runs the instants whose data
/// window is touched by what the parent rewrites: collection starts at `p`
/// and ends at `p − 24h + child.window.size`, day-inclusively. A child whose
/// first affected run predates its own start date skips that parent instant.
fn populate_downstream_runs(graph: &mut JobGraph, jobs: &BTreeMap<String, JobSpec>) -> Result<()> {
    let order = graph.topo_order()?;
    for parent_name in order {
        let parent_runs: Vec<DateTime<Utc>> = graph
            .get(&parent_name)
            .map(|node| node.runs.iter().copied().collect())
            .unwrap_or_default();
        if parent_runs.is_empty() {
            continue;
        }

        let children: Vec<String> = graph
            .dependents(&parent_name)
            .into_iter()
            .map(ToString::to_string)
            .collect();
        for child_name in children {
            let Some(child) = jobs.get(&child_name) else {
                continue;
            };
            let child_schedule = CronSchedule::parse(&child.schedule.interval)?;

            let mut child_runs = Vec::new();
            for parent_run in &parent_runs {
                // Pull the end back a day so the helper's day-inclusive
                // extension lands exactly one window past the parent instant.
                let parent_end = *parent_run - Duration::hours(24) + child.task.window.size;

                // One second back so a child sharing the parent's cron sees
                // its own firing at the parent instant.
                let first_affected = child_schedule.next_after(*parent_run - Duration::seconds(1))?;
                if first_affected < child.schedule.start_date {
                    continue;
                }

                child_runs.extend(runs_between(&child_schedule, *parent_run, parent_end)?);
            }
            graph.add_runs(&child_name, child_runs)?;
        }
    }
    Ok(())
}

/// Collects the firing instants of `schedule` in `[start, end]`, both ends
/// inclusive at day granularity.
///
/// The exclusive upper bound is found by stepping from the first firing
/// strictly after `end` until a firing lands on or after `end + 24h`; the
/// scan then starts at `start − 1s` so a firing exactly at `start` is kept.
/// Both moves rely on `next_after` being strict.
///
/// # Errors
/// Returns [`Error::CronExhausted`] if the schedule runs out of firings.
pub fn runs_between(
    schedule: &CronSchedule,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let mut upper = schedule.next_after(end)?;
    while upper < end + Duration::days(1) {
        upper = schedule.next_after(upper)?;
    }

    let mut runs = Vec::new();
    let mut run = schedule.next_after(start - Duration::seconds(1))?;
    while run < upper {
        runs.push(run);
        run = schedule.next_after(run)?;
    }
    Ok(runs)
}
