//! The live partition of a job's tasks.
//!
//! Four disjoint id sets (eligible, running, paused, branch-pending) plus the
//! node arena holding every task's links and counters. All collections are
//! concurrent maps: the job's single writer moves ids around while selection
//! and monitoring threads read snapshots without taking any job-wide lock.
//! A reader may observe a task that is about to move. Moves remove before they
//! insert, so at any instant an id is held by at most one set.

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::graph::model::{Task, TaskId};
use crate::graph::node::{NodeView, TaskNode};

/// Names of the live sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSet {
    Eligible,
    Running,
    Paused,
    BranchPending,
}

impl TaskSet {
    pub const ALL: [TaskSet; 4] = [
        TaskSet::Eligible,
        TaskSet::Running,
        TaskSet::Paused,
        TaskSet::BranchPending,
    ];
}

#[derive(Debug, Default)]
pub struct TaskStateSets {
    nodes: DashMap<TaskId, TaskNode>,
    eligible: DashSet<TaskId>,
    running: DashSet<TaskId>,
    paused: DashSet<TaskId>,
    branch_pending: DashSet<TaskId>,
}

impl TaskStateSets {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, which: TaskSet) -> &DashSet<TaskId> {
        match which {
            TaskSet::Eligible => &self.eligible,
            TaskSet::Running => &self.running,
            TaskSet::Paused => &self.paused,
            TaskSet::BranchPending => &self.branch_pending,
        }
    }

    pub fn contains(&self, which: TaskSet, id: TaskId) -> bool {
        self.set(which).contains(&id)
    }

    /// The set currently holding `id`, if any
    pub fn locate(&self, id: TaskId) -> Option<TaskSet> {
        TaskSet::ALL.into_iter().find(|which| self.contains(*which, id))
    }

    /// Sorted snapshot of one set
    pub fn ids(&self, which: TaskSet) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.set(which).iter().map(|id| *id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self, which: TaskSet) -> usize {
        self.set(which).len()
    }

    pub fn is_empty(&self, which: TaskSet) -> bool {
        self.set(which).is_empty()
    }

    pub(crate) fn insert(&self, which: TaskSet, id: TaskId) {
        debug_assert!(
            self.locate(id).map_or(true, |current| current == which),
            "task {} would be in two sets",
            id
        );
        self.set(which).insert(id);
    }

    pub(crate) fn remove(&self, which: TaskSet, id: TaskId) -> bool {
        self.set(which).remove(&id).is_some()
    }

    /// Drop `id` from whichever set holds it
    pub(crate) fn remove_everywhere(&self, id: TaskId) -> Option<TaskSet> {
        let found = self.locate(id)?;
        self.remove(found, id);
        Some(found)
    }

    /// Move `id` from one set to another. False if it was not in `from`.
    pub(crate) fn move_task(&self, from: TaskSet, to: TaskSet, id: TaskId) -> bool {
        if self.remove(from, id) {
            self.set(to).insert(id);
            true
        } else {
            false
        }
    }

    pub(crate) fn clear(&self, which: TaskSet) {
        self.set(which).clear();
    }

    pub(crate) fn insert_node(&self, node: TaskNode) {
        self.nodes.insert(node.id(), node);
    }

    pub fn contains_node(&self, id: TaskId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: TaskId) -> Option<NodeView> {
        self.nodes.get(&id).map(|n| n.view())
    }

    pub fn task(&self, id: TaskId) -> Option<Arc<Task>> {
        self.nodes.get(&id).map(|n| n.task().clone())
    }

    pub fn node_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.nodes.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn children_of(&self, id: TaskId) -> Vec<TaskId> {
        self.nodes
            .get(&id)
            .map(|n| n.children().to_vec())
            .unwrap_or_default()
    }

    pub fn parents_of(&self, id: TaskId) -> Vec<TaskId> {
        self.nodes
            .get(&id)
            .map(|n| n.parents().to_vec())
            .unwrap_or_default()
    }

    pub fn remaining_parents(&self, id: TaskId) -> Option<usize> {
        self.nodes.get(&id).map(|n| n.remaining_parents())
    }

    /// Run `f` against one node under its shard lock.
    ///
    /// `f` must not touch the arena again; take copies of what you need.
    pub(crate) fn with_node_mut<R>(&self, id: TaskId, f: impl FnOnce(&mut TaskNode) -> R) -> Option<R> {
        self.nodes.get_mut(&id).map(|mut n| f(&mut n))
    }

    /// Add a counted parent->child edge
    pub(crate) fn link(&self, parent: TaskId, child: TaskId) {
        self.with_node_mut(parent, |n| n.add_child(child));
        self.with_node_mut(child, |n| n.add_parent(parent));
    }
}
