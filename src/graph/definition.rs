//! Declarative job definitions, keyed by task name.
//!
//! A definition only carries what the graph needs: names, dependencies and
//! flow scripts. Converting it assigns task ids in declaration order.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::core::errors::{GraphError, Result};
use crate::graph::model::{FlowScript, JobKind, JobPriority, Task, TaskId, TaskStatus};
use crate::graph::search::contains_cycle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: JobKind,
    #[serde(default)]
    pub priority: JobPriority,
    pub tasks: Vec<TaskDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub flow: Option<FlowScript>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            flow: None,
            status: TaskStatus::Submitted,
        }
    }

    pub fn depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_flow(mut self, flow: FlowScript) -> Self {
        self.flow = Some(flow);
        self
    }
}

impl JobDefinition {
    pub fn new(name: impl Into<String>, kind: JobKind) -> Self {
        Self {
            name: name.into(),
            kind,
            priority: JobPriority::default(),
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, task: TaskDefinition) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let definition: JobDefinition = serde_yaml::from_str(yaml)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GraphError::io(format!("read {}", path.display()), e))?;
        Self::from_yaml_str(&content)
    }

    /// Check names, references and acyclicity of the explicit dependencies
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for task in &self.tasks {
            if !names.insert(task.name.as_str()) {
                return Err(GraphError::validation_task("duplicate task name", &task.name));
            }
        }

        for task in &self.tasks {
            for dep in &task.dependencies {
                if dep == &task.name {
                    return Err(GraphError::validation_task("task depends on itself", &task.name));
                }
                if !names.contains(dep.as_str()) {
                    return Err(GraphError::validation_task(
                        format!("unknown dependency '{}'", dep),
                        &task.name,
                    ));
                }
            }
            if let Some(flow) = &task.flow {
                let targets = [&flow.target, &flow.target_else, &flow.continuation];
                for target in targets.into_iter().flatten() {
                    if !names.contains(target.as_str()) {
                        return Err(GraphError::validation_task(
                            format!("unknown flow target '{}'", target),
                            &task.name,
                        ));
                    }
                }
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<()> {
        let nodes = self.tasks.iter().map(|task| task.name.as_str());
        let edges = self.tasks.iter().flat_map(|task| {
            task.dependencies
                .iter()
                .map(move |dep| (dep.as_str(), task.name.as_str()))
        });
        if contains_cycle(nodes, edges) {
            return Err(GraphError::validation("dependency cycle between tasks"));
        }
        Ok(())
    }

    /// Turn the definition into tasks with ids `0..n` in declaration order
    pub fn to_tasks(&self) -> Result<Vec<Task>> {
        self.validate()?;
        let ids: HashMap<&str, TaskId> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| (task.name.as_str(), TaskId(index as u64)))
            .collect();

        // IF targets keep a control-flow edge back to their initiator
        let mut weak_parents: HashMap<&str, TaskId> = HashMap::new();
        for task in &self.tasks {
            if let Some(flow) = &task.flow {
                for target in flow.branch_targets() {
                    if target != task.name {
                        weak_parents.entry(target).or_insert(ids[task.name.as_str()]);
                    }
                }
            }
        }

        Ok(self
            .tasks
            .iter()
            .map(|def| {
                let id = ids[def.name.as_str()];
                let mut task = Task::new(id, def.name.clone())
                    .with_dependencies(def.dependencies.iter().map(|d| ids[d.as_str()]))
                    .with_status(def.status);
                if let Some(flow) = &def.flow {
                    task = task.with_flow(flow.clone());
                }
                if let Some(parent) = weak_parents.get(def.name.as_str()) {
                    task = task.with_weak_parent(*parent);
                }
                task
            })
            .collect())
    }
}
