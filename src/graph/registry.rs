//! Registry of live jobs
//!
//! Each entry is its own aggregate; the registry only hands out shared
//! handles and never coordinates mutations across jobs.

use dashmap::DashMap;
use std::sync::Arc;

use crate::graph::job::JobGraph;
use crate::graph::model::{JobId, TaskId};

/// Registry for job graphs
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<JobId, Arc<JobGraph>>>,
}

impl JobRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and get a shared handle to it
    pub fn insert(&self, job: JobGraph) -> Arc<JobGraph> {
        let job = Arc::new(job);
        self.jobs.insert(job.id(), Arc::clone(&job));
        job
    }

    pub fn get(&self, id: JobId) -> Option<Arc<JobGraph>> {
        self.jobs.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, id: JobId) -> Option<Arc<JobGraph>> {
        self.jobs.remove(&id).map(|(_, job)| job)
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All jobs, highest priority first, ties by name
    pub fn by_priority(&self) -> Vec<Arc<JobGraph>> {
        let mut jobs: Vec<Arc<JobGraph>> = self.jobs.iter().map(|e| Arc::clone(e.value())).collect();
        jobs.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.name().cmp(b.name()))
        });
        jobs
    }

    /// Eligible tasks of every job that has some, in job priority order
    pub fn eligible_by_priority(&self) -> Vec<(JobId, Vec<TaskId>)> {
        self.by_priority()
            .into_iter()
            .filter_map(|job| {
                let eligible = job.eligible();
                (!eligible.is_empty()).then(|| (job.id(), eligible))
            })
            .collect()
    }
}
