//! Per-job aggregate: the live sets, the node arena and the job metadata the
//! lifecycle and splice operations read for placement decisions.

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

use crate::core::config::GraphConfig;
use crate::core::errors::{GraphError, Result};
use crate::graph::builder::DependencyGraphBuilder;
use crate::graph::definition::JobDefinition;
use crate::graph::model::{JobId, JobKind, JobPriority, JobStatus, Task, TaskId};
use crate::graph::node::NodeView;
use crate::graph::state::{TaskSet, TaskStateSets};

#[derive(Debug)]
pub struct JobGraph {
    id: JobId,
    name: String,
    kind: JobKind,
    priority: JobPriority,
    status: AtomicU8,
    pub(crate) sets: TaskStateSets,
    has_children: HashSet<TaskId>,
    names: DashMap<String, Vec<TaskId>>,
    next_task_id: AtomicU64,
    config: Arc<GraphConfig>,
    writer: Mutex<()>,
}

/// Sorted copy of the four live sets, for monitoring listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub job: JobId,
    pub status: JobStatus,
    pub eligible: Vec<TaskId>,
    pub running: Vec<TaskId>,
    pub paused: Vec<TaskId>,
    pub branch_pending: Vec<TaskId>,
}

impl StateSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl JobGraph {
    /// Build the graph of a new job from tasks with pre-assigned ids
    pub fn build(
        name: impl Into<String>,
        kind: JobKind,
        priority: JobPriority,
        tasks: impl IntoIterator<Item = Task>,
        config: Arc<GraphConfig>,
    ) -> Result<Self> {
        config.validate()?;
        let id = JobId::new();
        let seed = DependencyGraphBuilder::new(id, kind).tasks(tasks).build()?;

        Ok(Self {
            id,
            name: name.into(),
            kind,
            priority,
            status: AtomicU8::new(JobStatus::Pending as u8),
            sets: seed.sets,
            has_children: seed.has_children,
            names: seed.names.into_iter().collect(),
            next_task_id: AtomicU64::new(seed.next_id),
            config,
            writer: Mutex::new(()),
        })
    }

    pub fn from_definition(definition: &JobDefinition, config: Arc<GraphConfig>) -> Result<Self> {
        let tasks = definition.to_tasks()?;
        Self::build(
            definition.name.clone(),
            definition.kind,
            definition.priority,
            tasks,
            config,
        )
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Written by the surrounding scheduler; read when placing released tasks
    pub fn set_status(&self, status: JobStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn is_task_flow(&self) -> bool {
        self.kind == JobKind::TaskFlow
    }

    pub fn eligible(&self) -> Vec<TaskId> {
        self.sets.ids(TaskSet::Eligible)
    }

    pub fn running(&self) -> Vec<TaskId> {
        self.sets.ids(TaskSet::Running)
    }

    pub fn paused(&self) -> Vec<TaskId> {
        self.sets.ids(TaskSet::Paused)
    }

    pub fn branch_pending(&self) -> Vec<TaskId> {
        self.sets.ids(TaskSet::BranchPending)
    }

    /// The live set holding `id`; `None` once it terminated
    pub fn locate(&self, id: TaskId) -> Option<TaskSet> {
        self.sets.locate(id)
    }

    pub fn sets(&self) -> &TaskStateSets {
        &self.sets
    }

    pub fn node(&self, id: TaskId) -> Option<NodeView> {
        self.sets.node(id)
    }

    pub fn task(&self, id: TaskId) -> Option<Arc<Task>> {
        self.sets.task(id)
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            job: self.id,
            status: self.status(),
            eligible: self.eligible(),
            running: self.running(),
            paused: self.paused(),
            branch_pending: self.branch_pending(),
        }
    }

    /// Whether the task had children when the graph was built
    pub fn has_children(&self, id: TaskId) -> bool {
        self.has_children.contains(&id)
    }

    /// The most recent still-tracked task registered under `name`, or the
    /// most recent one when every copy has left the live sets
    pub fn task_id_by_name(&self, name: &str) -> Result<TaskId> {
        let ids = self.names.get(name).ok_or_else(|| GraphError::unknown_task(name))?;
        let found = ids
            .iter()
            .rev()
            .find(|id| self.sets.locate(**id).is_some())
            .or_else(|| ids.last())
            .copied();
        found.ok_or_else(|| GraphError::unknown_task(name))
    }

    /// Resolve a flow target named by `initiator`'s script. Loop and replicate
    /// copies reuse names, so the copy whose weak parent is the initiator wins.
    pub(crate) fn flow_target(&self, initiator: TaskId, name: &str) -> Result<TaskId> {
        let own = self.names.get(name).and_then(|ids| {
            ids.iter().rev().copied().find(|id| {
                self.sets.task(*id).and_then(|task| task.weak_parent()) == Some(initiator)
            })
        });
        match own {
            Some(id) => Ok(id),
            None => self.task_id_by_name(name),
        }
    }

    /// Children of `id` plus the targets of its IF script, if it has one
    pub fn children_with_if_branches(&self, id: TaskId) -> Vec<TaskId> {
        let mut out = self.sets.children_of(id);
        if let Some(flow) = self.sets.task(id).and_then(|t| t.flow().cloned()) {
            for name in flow.branch_targets() {
                match self.flow_target(id, name) {
                    Ok(target) if !out.contains(&target) => out.push(target),
                    Ok(_) => {}
                    Err(_) => warn!("IF target '{}' of task {} is not in job {}", name, id, self.id),
                }
            }
        }
        out
    }

    /// Hand out a task id no task of this job has used
    pub fn allocate_task_id(&self) -> TaskId {
        TaskId(self.next_task_id.fetch_add(1, Ordering::AcqRel))
    }

    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    /// Record tasks added by a splice under their names; ids are never
    /// handed out again.
    pub(crate) fn register_tasks(&self, tasks: &[Arc<Task>]) {
        for task in tasks {
            self.names.entry(task.name().to_string()).or_default().push(task.id());
            self.next_task_id.fetch_max(task.id().0 + 1, Ordering::AcqRel);
        }
    }

    /// Outcome of a transition whose source set did not hold the task
    pub(crate) fn precondition(&self, id: TaskId, operation: &str, expected: &str) -> Result<bool> {
        if self.config.strict_preconditions {
            return Err(GraphError::not_tracked(id, operation));
        }
        warn!(
            "Ignoring {} of task {} in job {}: task is not {}",
            operation, id, self.id, expected
        );
        Ok(false)
    }

    pub(crate) fn fault(&self, operation: &str, message: impl Into<String>) -> GraphError {
        let message = message.into();
        error!("Structural fault in job {} during {}: {}", self.id, operation, message);
        GraphError::structural(self.id, operation, message)
    }
}
