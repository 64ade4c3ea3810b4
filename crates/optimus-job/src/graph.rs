//! Multi-root dependency graph over job specifications.
//!
//! The graph owns its nodes; edges point from a dependency to its dependents,
//! so roots are the upstream-most jobs. Nodes are resolvable by job name
//! through the graph's name index — dependency snapshots stored on specs are
//! never followed during traversal.
//!
//! [`JobGraph::check_acyclic`] is a graph-level operation: callers run it
//! once after building and before any BFS consumer.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use optimus_core::job::JobSpec;

use crate::error::{Error, Result};

/// A node of the job graph.
#[derive(Debug, Clone)]
pub struct JobNode {
    /// The job this node represents.
    pub job: JobSpec,
    /// Scheduled instants attached during replay planning; unused otherwise.
    pub runs: BTreeSet<DateTime<Utc>>,
}

impl JobNode {
    /// Creates a node for the given job with no runs.
    #[must_use]
    pub fn new(job: JobSpec) -> Self {
        Self {
            job,
            runs: BTreeSet::new(),
        }
    }

    /// Creates a stub node carrying only a name.
    ///
    /// Used for cross-project dependencies whose definition is not visible
    /// in the local project; stubs are promoted to roots because their own
    /// upstreams are opaque.
    #[must_use]
    pub fn stub(name: impl Into<String>) -> Self {
        Self::new(JobSpec::named(name))
    }

    /// Returns the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.job.name
    }
}

/// Tri-color marks for the depth-first cycle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// A multi-root directed graph of jobs keyed by name.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    /// The underlying petgraph graph; edges run dependency → dependent.
    graph: DiGraph<JobNode, ()>,
    /// Map from job name to node index for fast lookup.
    index: HashMap<String, NodeIndex>,
    /// Insertion order for deterministic traversal and tie-breaking.
    insertion_order: Vec<NodeIndex>,
    /// Names explicitly marked as roots, in marking order.
    roots: Vec<String>,
}

impl JobGraph {
    /// Creates a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if a node with the given name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Adds a node, keyed by its job name.
    ///
    /// Idempotent: if a node with the same name already exists it is kept
    /// and the new value is discarded.
    pub fn add_node(&mut self, node: JobNode) -> NodeIndex {
        if let Some(&idx) = self.index.get(node.name()) {
            return idx;
        }
        let name = node.name().to_string();
        let idx = self.graph.add_node(node);
        self.index.insert(name, idx);
        self.insertion_order.push(idx);
        idx
    }

    /// Returns the node for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&JobNode> {
        self.index
            .get(name)
            .and_then(|&idx| self.graph.node_weight(idx))
    }

    /// Returns a mutable reference to the node for `name`, if present.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut JobNode> {
        self.index
            .get(name)
            .copied()
            .and_then(|idx| self.graph.node_weight_mut(idx))
    }

    /// Adds a directed edge from `parent` to `child` (dependency → dependent).
    ///
    /// Both endpoints must already be in the name index. The edge is added
    /// at most once per (parent, child) pair.
    ///
    /// # Errors
    /// Returns [`Error::GraphNodeNotFound`] if either endpoint is missing.
    pub fn add_edge(&mut self, parent: &str, child: &str) -> Result<()> {
        let from = self.index_of(parent)?;
        let to = self.index_of(child)?;
        if !self
            .graph
            .neighbors_directed(from, Direction::Outgoing)
            .any(|n| n == to)
        {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    /// Marks a node as a root. Idempotent.
    ///
    /// # Errors
    /// Returns [`Error::GraphNodeNotFound`] if the node is missing.
    pub fn mark_root(&mut self, name: &str) -> Result<()> {
        self.index_of(name)?;
        if !self.roots.iter().any(|r| r == name) {
            self.roots.push(name.to_string());
        }
        Ok(())
    }

    /// Returns the marked roots in marking order.
    #[must_use]
    pub fn roots(&self) -> Vec<&JobNode> {
        self.roots.iter().filter_map(|name| self.get(name)).collect()
    }

    /// Returns the marked root names in marking order.
    #[must_use]
    pub fn root_names(&self) -> Vec<&str> {
        self.roots.iter().map(String::as_str).collect()
    }

    /// Returns the dependents of `name` in deterministic (insertion) order.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(name) else {
            return Vec::new();
        };
        self.ordered_neighbors(idx)
            .into_iter()
            .filter_map(|n| self.graph.node_weight(n))
            .map(JobNode::name)
            .collect()
    }

    /// Iterates node names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.insertion_order
            .iter()
            .filter_map(|&idx| self.graph.node_weight(idx))
            .map(JobNode::name)
    }

    /// Attaches scheduled instants to a node.
    ///
    /// # Errors
    /// Returns [`Error::GraphNodeNotFound`] if the node is missing.
    pub fn add_runs<I>(&mut self, name: &str, runs: I) -> Result<()>
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        let idx = self.index_of(name)?;
        if let Some(node) = self.graph.node_weight_mut(idx) {
            node.runs.extend(runs);
        }
        Ok(())
    }

    /// Fails with the cycle path if the graph contains a cycle.
    ///
    /// Depth-first traversal with tri-color marks; on meeting an on-stack
    /// node the path is reconstructed from the recursion stack, with the
    /// entry node repeated at the end.
    ///
    /// # Errors
    /// Returns [`Error::CycleDetected`] carrying the cycle path.
    pub fn check_acyclic(&self) -> Result<()> {
        let mut marks = vec![Mark::Unvisited; self.graph.node_count()];
        let mut stack = Vec::new();
        for &start in &self.insertion_order {
            if marks[start.index()] == Mark::Unvisited {
                self.visit(start, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    /// Returns a topologically sorted list of node names.
    ///
    /// Kahn's algorithm with deterministic tie-breaking: nodes at equal
    /// depth are emitted in insertion order.
    ///
    /// # Errors
    /// Returns [`Error::CycleDetected`] if the graph contains a cycle; the
    /// reported path names one node left unsorted. Use [`Self::check_acyclic`]
    /// for a full cycle path.
    pub fn topo_order(&self) -> Result<Vec<String>> {
        let node_count = self.graph.node_count();
        if node_count == 0 {
            return Ok(Vec::new());
        }

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::with_capacity(node_count);
        for idx in self.graph.node_indices() {
            in_degree.insert(idx, 0);
        }
        for edge in self.graph.edge_indices() {
            if let Some((_, target)) = self.graph.edge_endpoints(edge) {
                *in_degree.entry(target).or_insert(0) += 1;
            }
        }

        let mut queue: std::collections::VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|&&idx| in_degree.get(&idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut result = Vec::with_capacity(node_count);
        while let Some(idx) = queue.pop_front() {
            if let Some(node) = self.graph.node_weight(idx) {
                result.push(node.name().to_string());
            }
            for neighbor in self.ordered_neighbors(idx) {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if result.len() != node_count {
            let stuck = self
                .insertion_order
                .iter()
                .find(|&&idx| in_degree.get(&idx).copied().unwrap_or(0) > 0)
                .and_then(|&idx| self.graph.node_weight(idx))
                .map_or_else(|| "unknown".to_string(), |n| n.name().to_string());
            return Err(Error::CycleDetected { path: vec![stuck] });
        }

        Ok(result)
    }

    fn index_of(&self, name: &str) -> Result<NodeIndex> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| Error::GraphNodeNotFound {
                name: name.to_string(),
            })
    }

    /// Outgoing neighbors sorted by node insertion order for determinism.
    fn ordered_neighbors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .collect();
        neighbors.sort_by_key(|n| {
            self.insertion_order
                .iter()
                .position(|&i| i == *n)
                .unwrap_or(usize::MAX)
        });
        neighbors
    }

    fn visit(
        &self,
        idx: NodeIndex,
        marks: &mut [Mark],
        stack: &mut Vec<NodeIndex>,
    ) -> Result<()> {
        marks[idx.index()] = Mark::OnStack;
        stack.push(idx);

        for child in self.ordered_neighbors(idx) {
            match marks[child.index()] {
                Mark::Unvisited => self.visit(child, marks, stack)?,
                Mark::OnStack => {
                    let entry = stack.iter().position(|&n| n == child).unwrap_or(0);
                    let mut path: Vec<String> = stack[entry..]
                        .iter()
                        .filter_map(|&n| self.graph.node_weight(n))
                        .map(|n| n.name().to_string())
                        .collect();
                    if let Some(node) = self.graph.node_weight(child) {
                        path.push(node.name().to_string());
                    }
                    return Err(Error::CycleDetected { path });
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[idx.index()] = Mark::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_of(names: &[&str]) -> JobGraph {
        let mut graph = JobGraph::new();
        for name in names {
            graph.add_node(JobNode::new(JobSpec::named(*name)));
        }
        graph
    }

    #[test]
    fn add_node_is_idempotent() {
        let mut graph = JobGraph::new();
        let mut first = JobSpec::named("a");
        first.owner = "original".into();
        graph.add_node(JobNode::new(first));

        let mut replacement = JobSpec::named("a");
        replacement.owner = "imposter".into();
        graph.add_node(JobNode::new(replacement));

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.get("a").unwrap().job.owner, "original");
    }

    #[test]
    fn add_edge_requires_both_endpoints() {
        let mut graph = graph_of(&["a"]);
        let err = graph.add_edge("a", "ghost").unwrap_err();
        assert!(matches!(err, Error::GraphNodeNotFound { name } if name == "ghost"));
    }

    #[test]
    fn add_edge_deduplicates() {
        let mut graph = graph_of(&["a", "b"]);
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("a", "b").unwrap();
        assert_eq!(graph.dependents("a"), vec!["b"]);
    }

    #[test]
    fn dependents_are_in_insertion_order() {
        let mut graph = graph_of(&["a", "b", "c"]);
        graph.add_edge("a", "c").unwrap();
        graph.add_edge("a", "b").unwrap();
        // Node insertion order wins, not edge order.
        assert_eq!(graph.dependents("a"), vec!["b", "c"]);
    }

    #[test]
    fn roots_keep_marking_order_and_deduplicate() {
        let mut graph = graph_of(&["a", "b"]);
        graph.mark_root("b").unwrap();
        graph.mark_root("a").unwrap();
        graph.mark_root("b").unwrap();
        assert_eq!(graph.root_names(), vec!["b", "a"]);
    }

    #[test]
    fn acyclic_graph_passes_check() {
        let mut graph = graph_of(&["a", "b", "c"]);
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "c").unwrap();
        graph.add_edge("a", "c").unwrap();
        assert!(graph.check_acyclic().is_ok());
    }

    #[test]
    fn cycle_check_reports_path() {
        let mut graph = graph_of(&["a", "b", "c"]);
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "c").unwrap();
        graph.add_edge("c", "a").unwrap();

        let err = graph.check_acyclic().unwrap_err();
        match err {
            Error::CycleDetected { path } => {
                assert_eq!(path, vec!["a", "b", "c", "a"]);
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut graph = graph_of(&["a"]);
        graph.add_edge("a", "a").unwrap();
        let err = graph.check_acyclic().unwrap_err();
        assert!(matches!(err, Error::CycleDetected { path } if path == vec!["a", "a"]));
    }

    #[test]
    fn topo_order_is_deterministic() {
        let mut graph = graph_of(&["a", "b", "c", "d"]);
        graph.add_edge("a", "c").unwrap();
        graph.add_edge("b", "c").unwrap();
        graph.add_edge("c", "d").unwrap();

        assert_eq!(graph.topo_order().unwrap(), vec!["a", "b", "c", "d"]);
        assert_eq!(graph.topo_order().unwrap(), graph.topo_order().unwrap());
    }

    #[test]
    fn topo_order_rejects_cycles() {
        let mut graph = graph_of(&["a", "b"]);
        graph.add_edge("a", "b").unwrap();
        graph.add_edge("b", "a").unwrap();
        assert!(matches!(
            graph.topo_order(),
            Err(Error::CycleDetected { .. })
        ));
    }

    #[test]
    fn runs_accumulate_on_nodes() {
        use chrono::TimeZone;
        let mut graph = graph_of(&["a"]);
        let t1 = Utc.with_ymd_and_hms(2021, 1, 2, 2, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2021, 1, 1, 2, 0, 0).unwrap();
        graph.add_runs("a", [t1, t2, t1]).unwrap();
        let runs: Vec<_> = graph.get("a").unwrap().runs.iter().copied().collect();
        assert_eq!(runs, vec![t2, t1]);
    }
}
