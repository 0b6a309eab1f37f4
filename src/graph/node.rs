use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::graph::model::{Task, TaskId, TaskStatus};

/// One vertex of a job's dependency graph.
///
/// Links are stored as ids into the job's node arena. Counters are only ever
/// moved by linking and by termination, never recomputed from the links.
#[derive(Debug, Clone)]
pub struct TaskNode {
    task: Arc<Task>,
    parents: Vec<TaskId>,
    children: Vec<TaskId>,
    /// Parents that have not terminated yet; the node is ready at zero
    remaining_parents: usize,
    /// Children that have not terminated yet
    remaining_children: usize,
    dispatch_attempts: u32,
    scheduled_at: Option<DateTime<Utc>>,
}

impl TaskNode {
    pub fn new(task: Arc<Task>) -> Self {
        Self {
            task,
            parents: Vec::new(),
            children: Vec::new(),
            remaining_parents: 0,
            remaining_children: 0,
            dispatch_attempts: 0,
            scheduled_at: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn status(&self) -> TaskStatus {
        self.task.status()
    }

    pub fn parents(&self) -> &[TaskId] {
        &self.parents
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub fn remaining_parents(&self) -> usize {
        self.remaining_parents
    }

    pub fn remaining_children(&self) -> usize {
        self.remaining_children
    }

    pub fn dispatch_attempts(&self) -> u32 {
        self.dispatch_attempts
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    /// Record an incomplete parent. Returns false if the link already existed.
    pub(crate) fn add_parent(&mut self, parent: TaskId) -> bool {
        if self.parents.contains(&parent) {
            return false;
        }
        self.parents.push(parent);
        self.remaining_parents += 1;
        true
    }

    /// Record an incomplete child. Returns false if the link already existed.
    pub(crate) fn add_child(&mut self, child: TaskId) -> bool {
        if self.children.contains(&child) {
            return false;
        }
        self.children.push(child);
        self.remaining_children += 1;
        true
    }

    /// Swap one parent link for another, keeping the pending count as is.
    pub(crate) fn replace_parent(&mut self, old: TaskId, new: TaskId) {
        self.parents.retain(|p| *p != old);
        if !self.parents.contains(&new) {
            self.parents.push(new);
        } else {
            // both links collapse into one
            self.remaining_parents = self.remaining_parents.saturating_sub(1);
        }
    }

    pub(crate) fn clear_children(&mut self) {
        self.children.clear();
        self.remaining_children = 0;
    }

    /// One parent terminated. True exactly when this was the last one.
    pub(crate) fn release_parent(&mut self) -> bool {
        match self.remaining_parents {
            0 => false,
            1 => {
                self.remaining_parents = 0;
                true
            }
            _ => {
                self.remaining_parents -= 1;
                false
            }
        }
    }

    pub(crate) fn release_child(&mut self) {
        self.remaining_children = self.remaining_children.saturating_sub(1);
    }

    /// Retire the node: nothing will ever release it again.
    pub(crate) fn zero_counters(&mut self) {
        self.remaining_parents = 0;
        self.remaining_children = 0;
    }

    pub(crate) fn record_dispatch(&mut self) {
        self.dispatch_attempts += 1;
    }

    pub(crate) fn set_scheduled_at(&mut self, at: DateTime<Utc>) {
        self.scheduled_at = Some(at);
    }

    pub fn view(&self) -> NodeView {
        NodeView {
            id: self.id(),
            name: self.task.name().to_string(),
            status: self.status(),
            parents: self.parents.clone(),
            children: self.children.clone(),
            remaining_parents: self.remaining_parents,
            remaining_children: self.remaining_children,
            dispatch_attempts: self.dispatch_attempts,
            scheduled_at: self.scheduled_at,
        }
    }
}

/// Detached copy of a node, safe to hand to other threads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub parents: Vec<TaskId>,
    pub children: Vec<TaskId>,
    pub remaining_parents: usize,
    pub remaining_children: usize,
    pub dispatch_attempts: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
}
