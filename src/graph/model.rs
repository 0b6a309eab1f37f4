use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use uuid::Uuid;

/// Task identifier, unique within a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status of a task, owned by the execution layer
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Submitted = 0,
    Running = 1,
    Paused = 2,
    InError = 3,
    Skipped = 4,
    Finished = 5,
}

impl TaskStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TaskStatus::Submitted),
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Paused),
            3 => Some(TaskStatus::InError),
            4 => Some(TaskStatus::Skipped),
            5 => Some(TaskStatus::Finished),
            _ => None,
        }
    }

    /// Statuses that keep a released task out of `eligible`
    pub fn is_withheld(self) -> bool {
        matches!(self, TaskStatus::Paused | TaskStatus::InError)
    }
}

/// Status of a whole job, owned by the surrounding scheduler
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending = 0,
    Running = 1,
    Paused = 2,
    InError = 3,
    Finished = 4,
    Failed = 5,
    Canceled = 6,
}

impl JobStatus {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(JobStatus::Pending),
            1 => Some(JobStatus::Running),
            2 => Some(JobStatus::Paused),
            3 => Some(JobStatus::InError),
            4 => Some(JobStatus::Finished),
            5 => Some(JobStatus::Failed),
            6 => Some(JobStatus::Canceled),
            _ => None,
        }
    }
}

/// Whether the job's tasks are connected at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Tasks with dependencies and flow scripts
    #[default]
    TaskFlow,
    /// Independent tasks, every submitted one runnable at once
    Independent,
}

/// Scheduling priority, lowest first so that `Ord` sorts naturally
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Idle,
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

/// Control-flow action carried by a task's flow script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowActionType {
    #[default]
    Continue,
    If,
    Loop,
    Replicate,
}

/// Flow script metadata: which action a task triggers and on which targets.
///
/// Targets are task names. For `If`, `target` is the branch taken when the
/// condition holds, `target_else` the other branch and `continuation` the
/// join task both branches merge into. For `Loop`, `target` is the first
/// task of the loop body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowScript {
    pub action: FlowActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
    pub target_else: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

impl FlowScript {
    pub fn if_else(
        target: impl Into<String>,
        target_else: impl Into<String>,
        continuation: Option<String>,
    ) -> Self {
        Self {
            action: FlowActionType::If,
            target: Some(target.into()),
            target_else: Some(target_else.into()),
            continuation,
        }
    }

    pub fn looping(target: impl Into<String>) -> Self {
        Self {
            action: FlowActionType::Loop,
            target: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn replicate() -> Self {
        Self {
            action: FlowActionType::Replicate,
            ..Self::default()
        }
    }

    pub fn is_if(&self) -> bool {
        self.action == FlowActionType::If
    }

    /// If, else and join target names of an IF script; empty for other actions
    pub fn branch_targets(&self) -> Vec<&str> {
        if !self.is_if() {
            return Vec::new();
        }
        [&self.target, &self.target_else, &self.continuation]
            .into_iter()
            .filter_map(|t| t.as_deref())
            .collect()
    }
}

/// Definition of one task, as far as the dependency graph is concerned.
///
/// Everything but the status is fixed at creation. The status is written by
/// the execution layer and read here to decide where released tasks go.
#[derive(Debug, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    name: String,
    #[serde(default)]
    dependencies: Vec<TaskId>,
    #[serde(default)]
    flow: Option<FlowScript>,
    /// Control-flow edge: the IF initiator this task is a branch target of
    #[serde(default)]
    weak_parent: Option<TaskId>,
    #[serde(with = "atomic_status")]
    status: AtomicU8,
}

impl Task {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            dependencies: Vec::new(),
            flow: None,
            weak_parent: None,
            status: AtomicU8::new(TaskStatus::Submitted as u8),
        }
    }

    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    pub fn with_flow(mut self, flow: FlowScript) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn with_weak_parent(mut self, parent: TaskId) -> Self {
        self.weak_parent = Some(parent);
        self
    }

    pub fn with_status(self, status: TaskStatus) -> Self {
        self.set_status(status);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[TaskId] {
        &self.dependencies
    }

    pub fn flow(&self) -> Option<&FlowScript> {
        self.flow.as_ref()
    }

    pub fn weak_parent(&self) -> Option<TaskId> {
        self.weak_parent
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_status(&self, status: TaskStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Whether this task triggers an IF action
    pub fn is_if_initiator(&self) -> bool {
        self.flow.as_ref().map_or(false, FlowScript::is_if)
    }
}

// Serialization helpers for the atomic status
mod atomic_status {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(atomic: &AtomicU8, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let status = TaskStatus::from_u8(atomic.load(Ordering::Relaxed)).unwrap_or_default();
        status.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<AtomicU8, D::Error>
    where
        D: Deserializer<'de>,
    {
        let status = TaskStatus::deserialize(deserializer)?;
        Ok(AtomicU8::new(status as u8))
    }
}
