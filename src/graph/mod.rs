// Dependency-graph core: model, live sets, lifecycle events and splices

pub mod builder;
pub mod definition;
pub mod job;
pub mod lifecycle;
pub mod model;
pub mod mutation;
pub mod node;
pub mod registry;
pub(crate) mod search;
pub mod state;

pub use builder::{DependencyGraphBuilder, GraphSeed};
pub use definition::{JobDefinition, TaskDefinition};
pub use job::{JobGraph, StateSnapshot};
pub use model::{
    FlowActionType, FlowScript, JobId, JobKind, JobPriority, JobStatus, Task, TaskId, TaskStatus,
};
pub use mutation::{Branch, BranchResolution, LoopSplice, ReplicateSplice};
pub use node::{NodeView, TaskNode};
pub use registry::JobRegistry;
pub use state::{TaskSet, TaskStateSets};
