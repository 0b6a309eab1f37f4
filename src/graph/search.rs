//! Visited-set searches over strong child edges.
//!
//! Control-flow edges are not stored as links, so a block reached only through
//! an unresolved IF is a separate fragment. Callers that need to find a node
//! inside such a block search from every branch-pending fragment in turn,
//! sharing one visited set so no node is walked twice.
//
// TODO: the fragment fallback is linear in the number of pending branches; an
// end-node index maintained by the splices would make it a lookup.

use petgraph::algo::is_cyclic_directed;
use petgraph::graphmap::DiGraphMap;
use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

use crate::core::errors::{GraphError, Result};
use crate::graph::model::TaskId;
use crate::graph::state::TaskStateSets;

pub(crate) struct Search<'a> {
    sets: &'a TaskStateSets,
    visited: HashSet<TaskId>,
    limit: usize,
}

impl<'a> Search<'a> {
    pub(crate) fn new(sets: &'a TaskStateSets, limit: usize) -> Self {
        Self {
            sets,
            visited: HashSet::new(),
            limit,
        }
    }

    fn visit(&mut self, origin: TaskId, id: TaskId) -> Result<bool> {
        if !self.visited.insert(id) {
            return Ok(false);
        }
        if self.visited.len() > self.limit {
            return Err(GraphError::SearchLimitExceeded {
                origin,
                limit: self.limit,
            });
        }
        Ok(true)
    }

    /// Breadth-first from `root` until `needle` shows up
    pub(crate) fn breadth_first(&mut self, root: TaskId, needle: TaskId) -> Result<Option<TaskId>> {
        let mut queue = VecDeque::new();
        if self.visit(root, root)? {
            queue.push_back(root);
        }
        while let Some(current) = queue.pop_front() {
            if current == needle {
                return Ok(Some(current));
            }
            for child in self.sets.children_of(current) {
                if self.visit(root, child)? {
                    queue.push_back(child);
                }
            }
        }
        Ok(None)
    }

    /// Depth-first from `root` until `needle` shows up
    pub(crate) fn depth_first(&mut self, root: TaskId, needle: TaskId) -> Result<Option<TaskId>> {
        let mut stack = Vec::new();
        if self.visit(root, root)? {
            stack.push(root);
        }
        while let Some(current) = stack.pop() {
            if current == needle {
                return Ok(Some(current));
            }
            // reversed so the first child is walked first
            for child in self.sets.children_of(current).into_iter().rev() {
                if self.visit(root, child)? {
                    stack.push(child);
                }
            }
        }
        Ok(None)
    }

    /// Try every fragment root in order until one reaches `needle`
    pub(crate) fn across_fragments(
        &mut self,
        roots: &[TaskId],
        needle: TaskId,
        breadth_first: bool,
    ) -> Result<Option<TaskId>> {
        for root in roots {
            let found = if breadth_first {
                self.breadth_first(*root, needle)?
            } else {
                self.depth_first(*root, needle)?
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Every node reachable from `root`, `root` included, not crossing `stop`
    pub(crate) fn reachable(mut self, root: TaskId, stop: &[TaskId]) -> Result<Vec<TaskId>> {
        for id in stop {
            self.visited.insert(*id);
        }
        let mut out = Vec::new();
        let mut queue = VecDeque::new();
        if self.visit(root, root)? {
            queue.push_back(root);
        }
        while let Some(current) = queue.pop_front() {
            out.push(current);
            for child in self.sets.children_of(current) {
                if self.visit(root, child)? {
                    queue.push_back(child);
                }
            }
        }
        Ok(out)
    }
}

/// Whether the directed edges `(from, to)` over `nodes` close a cycle
pub(crate) fn contains_cycle<N, I, E>(nodes: I, edges: E) -> bool
where
    N: Copy + Ord + Hash,
    I: IntoIterator<Item = N>,
    E: IntoIterator<Item = (N, N)>,
{
    let mut graph: DiGraphMap<N, ()> = DiGraphMap::new();
    for node in nodes {
        graph.add_node(node);
    }
    for (from, to) in edges {
        graph.add_edge(from, to, ());
    }
    is_cyclic_directed(&graph)
}
