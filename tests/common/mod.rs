//! Shared fixtures for the integration tests

#![allow(dead_code)]

use jobgraph::{GraphConfig, JobGraph, JobKind, JobPriority, Task, TaskId};
use std::sync::Arc;

pub fn config() -> Arc<GraphConfig> {
    Arc::new(GraphConfig::conservative())
}

pub fn flow_job(tasks: Vec<Task>) -> JobGraph {
    JobGraph::build("test", JobKind::TaskFlow, JobPriority::Normal, tasks, config()).unwrap()
}

/// Random DAG: every task depends on a few tasks with lower ids
pub fn random_dag(seed: u64, size: u64) -> Vec<Task> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..size)
        .map(|id| {
            let mut deps: Vec<TaskId> = Vec::new();
            if id > 0 {
                for _ in 0..rng.usize(0..4) {
                    let dep = TaskId(rng.u64(0..id));
                    if !deps.contains(&dep) {
                        deps.push(dep);
                    }
                }
            }
            Task::new(TaskId(id), format!("task-{}", id)).with_dependencies(deps)
        })
        .collect()
}

/// Dispatch and terminate eligible tasks until none is left
pub fn drain(job: &JobGraph) -> Vec<TaskId> {
    let mut order = Vec::new();
    while let Some(id) = job.eligible().first().copied() {
        assert!(job.dispatch(id).unwrap());
        job.terminate(id, false).unwrap();
        order.push(id);
    }
    order
}
