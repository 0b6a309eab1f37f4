//! Scheduling events that move tasks between the live sets.
//!
//! Every operation takes the job's writer guard for its whole duration, so
//! events on one job are strictly serialized. Readers never wait on it.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::{debug, error, info, instrument};

use crate::core::errors::{GraphError, Result};
use crate::graph::job::JobGraph;
use crate::graph::model::{JobStatus, TaskId, TaskStatus};
use crate::graph::state::TaskSet;

impl JobGraph {
    /// Eligible to running
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn dispatch(&self, id: TaskId) -> Result<bool> {
        let _writer = self.lock_writer();
        if !self.sets.move_task(TaskSet::Eligible, TaskSet::Running, id) {
            return self.precondition(id, "dispatch", "eligible");
        }
        self.sets.with_node_mut(id, |node| node.record_dispatch());
        debug!("Task {} dispatched", id);
        Ok(true)
    }

    /// Running back to eligible, when the dispatch failed downstream
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn restart(&self, id: TaskId) -> Result<bool> {
        let _writer = self.lock_writer();
        if !self.sets.move_task(TaskSet::Running, TaskSet::Eligible, id) {
            return self.precondition(id, "restart", "running");
        }
        debug!("Task {} back to eligible", id);
        Ok(true)
    }

    /// Remove a finished task and release its children.
    ///
    /// The task must be running, or paused when `via_error` is set. A task
    /// killed while still eligible is accepted when `via_error` is not set.
    /// Released children that the execution layer marked skipped are
    /// terminated right away, iteratively, so a skip chain of any depth
    /// resolves in one call.
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn terminate(&self, id: TaskId, via_error: bool) -> Result<()> {
        let _writer = self.lock_writer();
        self.terminate_locked(id, via_error)
    }

    pub(crate) fn terminate_locked(&self, id: TaskId, via_error: bool) -> Result<()> {
        let mut queue = VecDeque::from([(id, via_error)]);
        let mut released = 0usize;
        while let Some((current, via_error)) = queue.pop_front() {
            for skipped in self.terminate_one(current, via_error, &mut released)? {
                queue.push_back((skipped, false));
            }
        }
        debug!("Task {} terminated, {} tasks released", id, released);
        Ok(())
    }

    // Terminates one task; returns the tasks moved to running to be skipped
    fn terminate_one(&self, id: TaskId, via_error: bool, released: &mut usize) -> Result<Vec<TaskId>> {
        let from = if self.sets.contains(TaskSet::Running, id) {
            TaskSet::Running
        } else if via_error && self.sets.contains(TaskSet::Paused, id) {
            TaskSet::Paused
        } else if !via_error && self.sets.move_task(TaskSet::Eligible, TaskSet::Running, id) {
            debug!("Task {} was killed before dispatch", id);
            TaskSet::Running
        } else {
            error!("Task {} cannot terminate: not running in job {}", id, self.id());
            return Err(GraphError::not_tracked(id, "terminate"));
        };

        if !self.is_task_flow() {
            self.sets.remove(from, id);
            return Ok(Vec::new());
        }

        let task = self
            .sets
            .task(id)
            .ok_or_else(|| self.fault("terminate", format!("task {} has no node", id)))?;

        let mut to_skip = Vec::new();
        match task.flow().filter(|_| task.is_if_initiator() && task.status() == TaskStatus::Skipped) {
            Some(flow) => {
                // the condition never ran: every target is skipped, no branch taken
                let mut targets = Vec::new();
                for name in flow.branch_targets() {
                    let target = self
                        .flow_target(id, name)
                        .map_err(|_| self.fault("terminate", format!("IF target '{}' not found", name)))?;
                    if target != id && !targets.contains(&target) {
                        targets.push(target);
                    }
                }
                for target in targets {
                    match self.sets.locate(target) {
                        Some(TaskSet::Running) | None => {}
                        Some(set) => {
                            self.sets.move_task(set, TaskSet::Running, target);
                            to_skip.push(target);
                        }
                    }
                }
            }
            _ => {
                for child in self.sets.children_of(id) {
                    let ready = self
                        .sets
                        .with_node_mut(child, |node| node.release_parent())
                        .unwrap_or(false);
                    if ready {
                        *released += 1;
                        if self.place_released(child) {
                            to_skip.push(child);
                        }
                    }
                }
            }
        }

        for parent in self.sets.parents_of(id) {
            self.sets.with_node_mut(parent, |node| node.release_child());
        }
        self.sets.remove(from, id);
        Ok(to_skip)
    }

    /// Put a child whose last parent just terminated into its set.
    /// Returns true when it went to running to be skipped.
    fn place_released(&self, child: TaskId) -> bool {
        if self.sets.contains(TaskSet::BranchPending, child) {
            debug!("Task {} released but its branch is unresolved", child);
            return false;
        }
        let status = self
            .sets
            .task(child)
            .map(|task| task.status())
            .unwrap_or_default();

        let target = if self.status() == JobStatus::Paused {
            TaskSet::Paused
        } else if status == TaskStatus::Skipped {
            TaskSet::Running
        } else if status.is_withheld() {
            TaskSet::Paused
        } else {
            TaskSet::Eligible
        };
        self.sets.insert(target, child);
        debug!("Task {} released to {:?}", child, target);
        target == TaskSet::Running
    }

    /// Eligible to paused. No-op for independent jobs.
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn pause(&self, id: TaskId) -> Result<bool> {
        if !self.is_task_flow() {
            return Ok(false);
        }
        let _writer = self.lock_writer();
        if !self.sets.move_task(TaskSet::Eligible, TaskSet::Paused, id) {
            return self.precondition(id, "pause", "eligible");
        }
        debug!("Task {} paused", id);
        Ok(true)
    }

    /// Paused to eligible. No-op for independent jobs.
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn unpause(&self, id: TaskId) -> Result<bool> {
        if !self.is_task_flow() {
            return Ok(false);
        }
        let _writer = self.lock_writer();
        if !self.sets.move_task(TaskSet::Paused, TaskSet::Eligible, id) {
            return self.precondition(id, "unpause", "paused");
        }
        debug!("Task {} unpaused", id);
        Ok(true)
    }

    /// Running to paused, for a running task that entered an error state
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn paused_on_error(&self, id: TaskId) -> Result<bool> {
        let _writer = self.lock_writer();
        if !self.sets.move_task(TaskSet::Running, TaskSet::Paused, id) {
            return self.precondition(id, "paused_on_error", "running");
        }
        debug!("Task {} paused on error", id);
        Ok(true)
    }

    /// A task found already executing after a restart: straight to running,
    /// then terminated.
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn recover_task(&self, id: TaskId) -> Result<bool> {
        let _writer = self.lock_writer();
        let moved = self.sets.move_task(TaskSet::Eligible, TaskSet::Running, id)
            || self.sets.move_task(TaskSet::Paused, TaskSet::Running, id);
        if !moved {
            return self.precondition(id, "recover_task", "eligible or paused");
        }
        self.terminate_locked(id, false)?;
        info!("Recovered task {}", id);
        Ok(true)
    }

    /// Move eligible tasks whose status is in-error to paused.
    /// Returns the moved ids.
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn restore_in_error_tasks(&self) -> Vec<TaskId> {
        self.restore_by_status(TaskStatus::InError, TaskSet::Paused)
    }

    /// Move eligible tasks whose status is running to running.
    /// Returns the moved ids.
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn restore_running_tasks(&self) -> Vec<TaskId> {
        self.restore_by_status(TaskStatus::Running, TaskSet::Running)
    }

    fn restore_by_status(&self, status: TaskStatus, to: TaskSet) -> Vec<TaskId> {
        let _writer = self.lock_writer();
        let mut moved = Vec::new();
        for id in self.sets.ids(TaskSet::Eligible) {
            let matches = self.sets.task(id).map_or(false, |t| t.status() == status);
            if matches && self.sets.move_task(TaskSet::Eligible, to, id) {
                moved.push(id);
            }
        }
        if !moved.is_empty() {
            info!("Restored {} {:?} tasks to {:?}", moved.len(), status, to);
        }
        moved
    }

    /// Drop every eligible and running task; nothing is scheduled afterwards
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn failed(&self) {
        let _writer = self.lock_writer();
        self.sets.clear(TaskSet::Eligible);
        self.sets.clear(TaskSet::Running);
        info!("Job {} failed, scheduling stopped", self.id());
    }

    /// Take a task out of `paused` without running it
    pub fn remove_paused_task(&self, id: TaskId) -> Option<TaskId> {
        if !self.is_task_flow() {
            return None;
        }
        let _writer = self.lock_writer();
        self.sets.remove(TaskSet::Paused, id).then_some(id)
    }

    /// Record when an eligible task is due
    pub fn update_scheduled_time(&self, id: TaskId, at: DateTime<Utc>) -> Result<bool> {
        let _writer = self.lock_writer();
        if !self.sets.contains(TaskSet::Eligible, id) {
            return self.precondition(id, "update_scheduled_time", "eligible");
        }
        self.sets.with_node_mut(id, |node| node.set_scheduled_at(at));
        Ok(true)
    }
}
