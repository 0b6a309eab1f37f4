//! Live rewrites of the graph when a flow action fires.
//!
//! Each splice resolves every node it needs first and only then touches links,
//! so a structural fault returns with the graph exactly as it was.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::core::errors::{GraphError, Result};
use crate::graph::job::JobGraph;
use crate::graph::model::{FlowActionType, JobStatus, Task, TaskId, TaskStatus};
use crate::graph::node::TaskNode;
use crate::graph::search::{contains_cycle, Search};
use crate::graph::state::TaskSet;

/// Which side of an IF the condition picked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    If,
    Else,
}

/// Nodes involved in resolving one IF action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchResolution {
    pub initiator: TaskId,
    /// First task of the taken branch
    pub start: TaskId,
    /// Last task of the taken branch, linked to the join
    pub end: TaskId,
    pub join: Option<TaskId>,
    /// First task of the branch that will never run
    pub not_taken: Option<TaskId>,
}

/// One unrolled loop body, built with fresh ids
#[derive(Debug)]
pub struct LoopSplice {
    pub tree: Vec<Task>,
    /// Copy of the loop target, the first task of the new iteration
    pub start: TaskId,
    /// Copy of the initiator, the last task of the new iteration
    pub end: TaskId,
}

/// One replicated block, built with fresh ids
#[derive(Debug)]
pub struct ReplicateSplice {
    pub tree: Vec<Task>,
    pub start: TaskId,
    /// End task of the block being replicated
    pub original_end: TaskId,
    /// Its copy inside `tree`
    pub new_end: TaskId,
}

impl JobGraph {
    /// Assemble the resolution of the IF script carried by `initiator`
    pub fn branch_resolution(&self, initiator: TaskId, taken: Branch, end: TaskId) -> Result<BranchResolution> {
        const OP: &str = "resolve_branch";
        let task = self
            .task(initiator)
            .ok_or_else(|| GraphError::not_tracked(initiator, OP))?;
        let flow = task
            .flow()
            .filter(|flow| flow.action == FlowActionType::If)
            .ok_or_else(|| self.fault(OP, format!("task {} carries no IF script", initiator)))?;

        let lookup = |name: &Option<String>| -> Result<Option<TaskId>> {
            match name {
                Some(name) => self
                    .flow_target(initiator, name)
                    .map(Some)
                    .map_err(|_| self.fault(OP, format!("flow target '{}' not found", name))),
                None => Ok(None),
            }
        };
        let target = lookup(&flow.target)?;
        let target_else = lookup(&flow.target_else)?;
        let (start, not_taken) = match taken {
            Branch::If => (target, target_else),
            Branch::Else => (target_else, target),
        };
        let start = start.ok_or_else(|| self.fault(OP, format!("task {} has no {:?} target", initiator, taken)))?;

        Ok(BranchResolution {
            initiator,
            start,
            end,
            join: lookup(&flow.continuation)?,
            not_taken,
        })
    }

    /// Plug the taken branch of an IF in and drop the other one.
    ///
    /// The initiator becomes a counted parent of the branch start. With a
    /// join, the branch end is searched from every branch-pending fragment,
    /// its children move onto the join and the join becomes its only child.
    /// The not-taken branch and its exclusive descendants are retired. The
    /// caller terminates the initiator afterwards.
    #[instrument(skip(self), fields(job = %self.id()))]
    pub fn resolve_branch(&self, resolution: &BranchResolution) -> Result<()> {
        const OP: &str = "resolve_branch";
        let _writer = self.lock_writer();
        let r = resolution;
        self.require_flow(OP)?;
        self.require_initiator(OP, r.initiator)?;
        if !self.sets.contains(TaskSet::BranchPending, r.start) {
            return Err(self.fault(OP, format!("branch start {} is not pending", r.start)));
        }

        let end = match r.join {
            Some(join) => {
                if !self.sets.contains(TaskSet::BranchPending, join) {
                    return Err(self.fault(OP, format!("join {} is not pending", join)));
                }
                let roots = self.sets.ids(TaskSet::BranchPending);
                let found = Search::new(&self.sets, self.config().search_limit)
                    .across_fragments(&roots, r.end, true)?
                    .ok_or_else(|| self.fault(OP, format!("branch end {} not found", r.end)))?;
                Some((found, join))
            }
            None => None,
        };

        let mut stop = vec![r.start];
        stop.extend(r.join);
        let retired = match r.not_taken {
            Some(root) if root != r.start => self.retired_branch(root, &stop)?,
            _ => Vec::new(),
        };

        self.sets.link(r.initiator, r.start);
        if let Some((end, join)) = end.filter(|(end, join)| end != join) {
            for child in self.sets.children_of(end) {
                if child == join {
                    continue;
                }
                self.sets.with_node_mut(child, |node| node.replace_parent(end, join));
                self.sets.with_node_mut(join, |node| node.add_child(child));
            }
            self.sets.with_node_mut(end, |node| node.clear_children());
            self.sets.link(end, join);
        }

        self.sets.remove(TaskSet::BranchPending, r.start);
        if let Some(join) = r.join {
            self.sets.remove(TaskSet::BranchPending, join);
        }
        for id in &retired {
            self.sets.with_node_mut(*id, |node| node.zero_counters());
            self.sets.remove_everywhere(*id);
        }

        info!(
            "Resolved IF of task {} towards {}, {} tasks retired",
            r.initiator,
            r.start,
            retired.len()
        );
        Ok(())
    }

    /// Append one iteration of a loop after the initiator.
    ///
    /// The initiator's children move to the new end, the new start becomes
    /// runnable and the initiator leaves the live sets without releasing
    /// anything.
    #[instrument(skip(self, splice), fields(job = %self.id(), tasks = splice.tree.len()))]
    pub fn splice_loop(&self, initiator: TaskId, splice: LoopSplice) -> Result<()> {
        const OP: &str = "splice_loop";
        let _writer = self.lock_writer();
        self.require_flow(OP)?;
        let from = self.require_initiator(OP, initiator)?;
        let tree = self.validate_tree(OP, &splice.tree, &[splice.start, splice.end])?;

        for task in &splice.tree {
            if task.id() == splice.start {
                continue;
            }
            for dep in task.dependencies() {
                if !tree.contains(dep) && *dep != initiator {
                    return Err(self.fault(
                        OP,
                        format!("dependency {} of {} is outside the loop body", dep, task.id()),
                    ));
                }
            }
        }

        let tasks = self.insert_tree(splice.tree, splice.start, &tree);

        for child in self.sets.children_of(initiator) {
            self.sets.with_node_mut(child, |node| node.replace_parent(initiator, splice.end));
            self.sets.with_node_mut(splice.end, |node| node.add_child(child));
        }
        self.sets.with_node_mut(initiator, |node| node.clear_children());

        if let Some(start) = self.sets.task(splice.start) {
            if self.status() == JobStatus::Paused {
                start.set_status(TaskStatus::Paused);
            }
            let to = if start.status() == TaskStatus::Paused {
                TaskSet::Paused
            } else {
                TaskSet::Eligible
            };
            self.sets.insert(to, splice.start);
        }

        self.sets.remove(from, initiator);
        for parent in self.sets.parents_of(initiator) {
            self.sets.with_node_mut(parent, |node| node.release_child());
        }
        self.register_tasks(&tasks);

        info!(
            "Loop of task {} spliced: {} tasks, start {}, end {}",
            initiator,
            tasks.len(),
            splice.start,
            splice.end
        );
        Ok(())
    }

    /// Add a copy of a block next to the original.
    ///
    /// The copy starts under the same initiator and its end inherits the
    /// original end's children, so both blocks converge on the same
    /// successors. The new start is left in no live set: it waits on a
    /// counted edge from the initiator, so the copy is only scheduled once
    /// the caller terminates the initiator.
    #[instrument(skip(self, splice), fields(job = %self.id(), tasks = splice.tree.len()))]
    pub fn splice_replicate(&self, initiator: TaskId, splice: ReplicateSplice) -> Result<()> {
        const OP: &str = "splice_replicate";
        let _writer = self.lock_writer();
        self.require_flow(OP)?;
        self.require_initiator(OP, initiator)?;
        let tree = self.validate_tree(OP, &splice.tree, &[splice.start, splice.new_end])?;

        let mut search = Search::new(&self.sets, self.config().search_limit);
        let original_end = match search.depth_first(initiator, splice.original_end)? {
            Some(found) => found,
            None => {
                debug!("End {} not below {}, searching pending branches", splice.original_end, initiator);
                let roots = self.sets.ids(TaskSet::BranchPending);
                search
                    .across_fragments(&roots, splice.original_end, false)?
                    .ok_or_else(|| self.fault(OP, format!("block end {} not found", splice.original_end)))?
            }
        };

        let tasks = self.insert_tree(splice.tree, splice.start, &tree);
        for child in self.sets.children_of(original_end) {
            self.sets.link(splice.new_end, child);
        }
        self.sets.link(initiator, splice.start);
        self.register_tasks(&tasks);

        info!(
            "Replicated block of task {}: {} tasks, start {}, end {} mirrors {}",
            initiator,
            tasks.len(),
            splice.start,
            splice.new_end,
            original_end
        );
        Ok(())
    }

    fn require_flow(&self, operation: &str) -> Result<()> {
        if self.is_task_flow() {
            Ok(())
        } else {
            Err(self.fault(operation, "job has no flow semantics"))
        }
    }

    // The set the initiator is in; it has not terminated yet
    fn require_initiator(&self, operation: &str, initiator: TaskId) -> Result<TaskSet> {
        [TaskSet::Running, TaskSet::Eligible]
            .into_iter()
            .find(|set| self.sets.contains(*set, initiator))
            .ok_or_else(|| self.fault(operation, format!("initiator {} is not running", initiator)))
    }

    /// Check a new subtree: fresh unique ids, required members present,
    /// no cycle among its own edges. Returns its id set.
    fn validate_tree(&self, operation: &str, tree: &[Task], required: &[TaskId]) -> Result<HashSet<TaskId>> {
        let mut ids = HashSet::with_capacity(tree.len());
        for task in tree {
            if self.sets.contains_node(task.id()) || !ids.insert(task.id()) {
                return Err(self.fault(operation, format!("task id {} is already in use", task.id())));
            }
        }
        for id in required {
            if !ids.contains(id) {
                return Err(self.fault(operation, format!("task {} is missing from the new tree", id)));
            }
        }

        let members = &ids;
        let edges = tree.iter().flat_map(move |task| {
            task.dependencies()
                .iter()
                .filter(move |dep| members.contains(*dep))
                .map(move |dep| (*dep, task.id()))
        });
        if contains_cycle(ids.iter().copied(), edges) {
            return Err(self.fault(operation, "new tree contains a dependency cycle"));
        }
        Ok(ids)
    }

    /// Create nodes for a validated tree and link its inner edges. The start's
    /// own dependencies are not linked; tasks below an IF wait in
    /// `branch_pending`.
    fn insert_tree(&self, tree: Vec<Task>, start: TaskId, ids: &HashSet<TaskId>) -> Vec<Arc<Task>> {
        let tasks: Vec<Arc<Task>> = tree.into_iter().map(Arc::new).collect();
        for task in &tasks {
            self.sets.insert_node(TaskNode::new(task.clone()));
        }
        for task in tasks.iter().filter(|t| t.id() != start) {
            for dep in task.dependencies().iter().filter(|d| ids.contains(*d)) {
                self.sets.link(*dep, task.id());
            }
            if task.weak_parent().is_some() {
                self.sets.insert(TaskSet::BranchPending, task.id());
            }
        }
        tasks
    }

    /// The not-taken branch below `root`: its exclusive descendants plus every
    /// pending IF target whose initiator lies inside it, with their own
    /// exclusive descendants, until nothing more joins
    fn retired_branch(&self, root: TaskId, stop: &[TaskId]) -> Result<Vec<TaskId>> {
        let mut roots = vec![root];
        loop {
            let members = self.exclusive_descendants(&roots, stop)?;
            let nested: Vec<TaskId> = self
                .sets
                .ids(TaskSet::BranchPending)
                .into_iter()
                .filter(|id| !members.contains(id) && !stop.contains(id))
                .filter(|id| {
                    self.sets
                        .task(*id)
                        .and_then(|task| task.weak_parent())
                        .map_or(false, |parent| members.contains(&parent))
                })
                .collect();
            if nested.is_empty() {
                let mut out: Vec<TaskId> = members.into_iter().collect();
                out.sort_unstable();
                return Ok(out);
            }
            debug!("{} nested branch targets join the retired branch", nested.len());
            roots.extend(nested);
        }
    }

    /// Nodes below `roots` (inclusive) whose every parent is itself in that
    /// set, not crossing `stop`
    fn exclusive_descendants(&self, roots: &[TaskId], stop: &[TaskId]) -> Result<HashSet<TaskId>> {
        let mut members = HashSet::new();
        for root in roots {
            members.extend(Search::new(&self.sets, self.config().search_limit).reachable(*root, stop)?);
        }
        loop {
            let shared: Vec<TaskId> = members
                .iter()
                .copied()
                .filter(|id| !roots.contains(id))
                .filter(|id| self.sets.parents_of(*id).iter().any(|p| !members.contains(p)))
                .collect();
            if shared.is_empty() {
                return Ok(members);
            }
            for id in shared {
                members.remove(&id);
            }
        }
    }
}
