//! In-memory model of frameworks, executors, and tasks.
//!
//! Ownership is strictly tree-shaped: the agent owns frameworks, frameworks
//! own executors, executors own their tasks. Nothing outside the agent actor
//! holds references into this tree; external collaborators carry
//! `(framework_id, executor_id)` pairs and look records up on dispatch.
//!
//! Accounting invariant: an executor's resource vector always equals the sum
//! of its launched tasks' resources. Queued tasks are not yet accounted.

use std::collections::BTreeMap;
use std::path::PathBuf;

use armada_id::{ExecutorId, FrameworkId, TaskId};
use armada_resources::Resources;
use tracing::warn;

use crate::protocol::{ExecutorInfo, FrameworkInfo, Task, TaskDescription, TaskState};
use crate::updates::PendingUpdates;

/// An executor record. Lives from the first task needing it until its child
/// process exits or its framework is removed.
#[derive(Debug)]
pub struct Executor {
    pub id: ExecutorId,
    pub info: ExecutorInfo,
    pub framework_id: FrameworkId,

    /// Work directory allocated at creation.
    pub directory: PathBuf,

    /// Message endpoint; `None` until the executor registers, then set once
    /// and immutable for the executor's lifetime.
    pub endpoint: Option<String>,

    /// Sum of the resources of all launched tasks.
    pub resources: Resources,

    /// Tasks waiting for the executor to register, keyed for deterministic
    /// flush order.
    pub queued_tasks: BTreeMap<TaskId, TaskDescription>,

    /// Tasks handed to the executor, with their current state.
    pub launched_tasks: BTreeMap<TaskId, Task>,
}

impl Executor {
    fn new(framework_id: FrameworkId, info: ExecutorInfo, directory: PathBuf) -> Self {
        Self {
            id: info.executor_id.clone(),
            info,
            framework_id,
            directory,
            endpoint: None,
            resources: Resources::new(),
            queued_tasks: BTreeMap::new(),
            launched_tasks: BTreeMap::new(),
        }
    }

    /// Whether the executor process has registered back.
    pub fn is_registered(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Moves a task into the launched set and accounts its resources.
    ///
    /// The master enforces unique task ids; a duplicate here means the
    /// registry has been corrupted.
    pub fn add_task(&mut self, description: &TaskDescription) -> &Task {
        assert!(
            !self.launched_tasks.contains_key(&description.task_id),
            "task {} already launched on executor {}",
            description.task_id,
            self.id
        );

        let task = Task {
            task_id: description.task_id.clone(),
            name: description.name.clone(),
            framework_id: self.framework_id.clone(),
            executor_id: self.id.clone(),
            agent_id: description.agent_id.clone(),
            resources: description.resources.clone(),
            state: TaskState::Starting,
        };

        self.resources += &task.resources;
        self.launched_tasks
            .entry(task.task_id.clone())
            .or_insert(task)
    }

    /// Drops a task wherever it lives. A launched task's resources are
    /// credited back to the executor's vector.
    pub fn remove_task(&mut self, task_id: &TaskId) {
        self.queued_tasks.remove(task_id);

        if let Some(task) = self.launched_tasks.remove(task_id) {
            self.resources -= &task.resources;
        }
    }

    /// Records a state observation for a launched task.
    pub fn update_task_state(&mut self, task_id: &TaskId, state: TaskState) {
        if let Some(task) = self.launched_tasks.get_mut(task_id) {
            task.state = state;
        }
    }

    /// Whether the task is known to this executor, queued or launched.
    pub fn has_task(&self, task_id: &TaskId) -> bool {
        self.queued_tasks.contains_key(task_id) || self.launched_tasks.contains_key(task_id)
    }
}

/// A framework record. Lives from its first assigned task until it has no
/// executors left or the master kills it.
#[derive(Debug)]
pub struct Framework {
    pub id: FrameworkId,
    pub info: FrameworkInfo,

    /// The framework scheduler's current endpoint; the master forwards
    /// changes over the framework's lifetime.
    pub scheduler: String,

    pub executors: BTreeMap<ExecutorId, Executor>,

    /// Status updates awaiting master acknowledgement.
    pub updates: PendingUpdates,
}

impl Framework {
    pub fn new(id: FrameworkId, info: FrameworkInfo, scheduler: String) -> Self {
        Self {
            id,
            info,
            scheduler,
            executors: BTreeMap::new(),
            updates: PendingUpdates::new(),
        }
    }

    /// Creates an executor record. The caller has already checked the id is
    /// unused; a collision here means the registry has been corrupted.
    pub fn create_executor(&mut self, info: ExecutorInfo, directory: PathBuf) -> &mut Executor {
        let id = info.executor_id.clone();
        assert!(
            !self.executors.contains_key(&id),
            "executor {} already exists in framework {}",
            id,
            self.id
        );

        let executor = Executor::new(self.id.clone(), info, directory);
        self.executors.entry(id).or_insert(executor)
    }

    pub fn executor(&mut self, executor_id: &ExecutorId) -> Option<&mut Executor> {
        self.executors.get_mut(executor_id)
    }

    /// Finds the executor owning `task_id`, scanning queued and launched
    /// tasks.
    pub fn executor_for_task(&mut self, task_id: &TaskId) -> Option<&mut Executor> {
        self.executors
            .values_mut()
            .find(|executor| executor.has_task(task_id))
    }

    /// Every launched task across all executors, for re-registration.
    pub fn launched_tasks(&self) -> impl Iterator<Item = &Task> {
        self.executors
            .values()
            .flat_map(|executor| executor.launched_tasks.values())
    }

    /// Drops an executor record without touching its process.
    pub fn destroy_executor(&mut self, executor_id: &ExecutorId) {
        if self.executors.remove(executor_id).is_none() {
            warn!(
                framework_id = %self.id,
                executor_id = %executor_id,
                "Destroying unknown executor"
            );
        }
    }
}
