use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::errors::{GraphError, Result};
use crate::graph::model::{JobId, JobKind, Task, TaskId, TaskStatus};
use crate::graph::node::TaskNode;
use crate::graph::search::contains_cycle;
use crate::graph::state::{TaskSet, TaskStateSets};

/// Everything the builder hands over to the job aggregate
#[derive(Debug)]
pub struct GraphSeed {
    pub sets: TaskStateSets,
    /// Tasks that had at least one child at build time
    pub has_children: HashSet<TaskId>,
    pub names: HashMap<String, Vec<TaskId>>,
    /// Next free task id
    pub next_id: u64,
}

/// Builds the initial node graph of one job from its flat task list.
///
/// Runs once per job. Entry points (no dependencies, not the target of any
/// IF action) seed `eligible`; IF targets seed `branch_pending`.
pub struct DependencyGraphBuilder {
    job: JobId,
    kind: JobKind,
    tasks: Vec<Arc<Task>>,
}

impl DependencyGraphBuilder {
    pub fn new(job: JobId, kind: JobKind) -> Self {
        Self {
            job,
            kind,
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(Arc::new(task));
        self
    }

    pub fn tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks.into_iter().map(Arc::new));
        self
    }

    pub fn build(self) -> Result<GraphSeed> {
        let mut names: HashMap<String, Vec<TaskId>> = HashMap::new();
        let mut ids = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id()) {
                return Err(GraphError::validation_task(
                    format!("duplicate task id {}", task.id()),
                    task.name(),
                ));
            }
            names.entry(task.name().to_string()).or_default().push(task.id());
        }
        let next_id = self.tasks.iter().map(|t| t.id().0 + 1).max().unwrap_or(0);

        let seed = match self.kind {
            JobKind::Independent => self.build_independent(names, next_id),
            JobKind::TaskFlow => self.build_task_flow(names, next_id)?,
        };

        info!(
            "Built graph for job {}: {} tasks, {} eligible, {} branch-pending",
            self.job,
            seed.sets.node_count(),
            seed.sets.len(TaskSet::Eligible),
            seed.sets.len(TaskSet::BranchPending)
        );
        Ok(seed)
    }

    // No links and no counters: every submitted task can run
    fn build_independent(&self, names: HashMap<String, Vec<TaskId>>, next_id: u64) -> GraphSeed {
        let sets = TaskStateSets::new();
        for task in &self.tasks {
            sets.insert_node(TaskNode::new(task.clone()));
            if task.status() == TaskStatus::Submitted {
                sets.insert(TaskSet::Eligible, task.id());
            }
        }
        GraphSeed {
            sets,
            has_children: HashSet::new(),
            names,
            next_id,
        }
    }

    fn build_task_flow(&self, names: HashMap<String, Vec<TaskId>>, next_id: u64) -> Result<GraphSeed> {
        // names that cannot be entry points because an IF action targets them
        let branch_targets: HashSet<&str> = self
            .tasks
            .iter()
            .filter_map(|task| task.flow().map(|flow| (task.name(), flow)))
            .flat_map(|(name, flow)| {
                flow.branch_targets()
                    .into_iter()
                    .filter(move |target| *target != name)
            })
            .collect();

        for target in &branch_targets {
            if !names.contains_key(*target) {
                return Err(GraphError::validation(format!(
                    "flow target '{}' is not a task of job {}",
                    target, self.job
                )));
            }
        }

        let mut nodes: HashMap<TaskId, TaskNode> = self
            .tasks
            .iter()
            .map(|task| (task.id(), TaskNode::new(task.clone())))
            .collect();

        let mut has_children = HashSet::new();
        for task in &self.tasks {
            for dep in task.dependencies() {
                let parent = nodes.get_mut(dep).ok_or_else(|| {
                    GraphError::validation_task(format!("unknown dependency {}", dep), task.name())
                })?;
                parent.add_child(task.id());
                has_children.insert(*dep);
                if let Some(child) = nodes.get_mut(&task.id()) {
                    child.add_parent(*dep);
                }
            }
        }

        let edges = self
            .tasks
            .iter()
            .flat_map(|task| task.dependencies().iter().map(move |dep| (*dep, task.id())));
        if contains_cycle(self.tasks.iter().map(|task| task.id()), edges) {
            return Err(GraphError::validation(format!(
                "dependency cycle between tasks of job {}",
                self.job
            )));
        }

        let sets = TaskStateSets::new();
        for task in &self.tasks {
            let is_branch_target =
                branch_targets.contains(task.name()) || task.weak_parent().is_some();
            if is_branch_target {
                sets.insert(TaskSet::BranchPending, task.id());
            } else if task.dependencies().is_empty() {
                debug!("Task {} ({}) is an entry point", task.id(), task.name());
                sets.insert(TaskSet::Eligible, task.id());
            }
        }
        for (_, node) in nodes {
            sets.insert_node(node);
        }

        Ok(GraphSeed {
            sets,
            has_children,
            names,
            next_id,
        })
    }
}
