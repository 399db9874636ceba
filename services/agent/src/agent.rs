//! The agent core: a single-threaded actor owning the framework registry and
//! driving the executor/task state machines.
//!
//! Every mutation of the registry happens inside this actor. Inbound events
//! arrive from four sources: the master, framework schedulers (relayed
//! through the master), executor processes, and internal dispatches (the
//! reaper and the retry timer). Outbound sends never block the event loop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use armada_id::{AgentId, ExecutorId, FrameworkId, TaskId};
use armada_resources::Resources;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::actors::{Actor, ActorError, ActorHandle};
use crate::config::Config;
use crate::isolation::{IsolationBackend, UNMANAGED_PID};
use crate::protocol::{
    AgentInfo, ExecutorContext, ExecutorInfo, FrameworkInfo, Message, StatusUpdate,
    TaskDescription, TaskState, TaskStatus,
};
use crate::reaper::ReaperEvent;
use crate::registry::Framework;
use crate::remote::MessageSender;

/// How long a relayed status update waits for a master acknowledgement
/// before it is re-sent.
pub const STATUS_UPDATE_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Events delivered to the agent's mailbox.
pub enum AgentEvent {
    /// A protocol message from a peer, with its reply endpoint.
    Protocol { from: String, message: Message },

    /// Dispatched by the reaper when a watched executor process exits.
    ExecutorExited {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    },

    /// Status-update retry timer, roughly once per second.
    Tick,

    /// Read-only state snapshot for the introspection endpoints.
    Snapshot(oneshot::Sender<Overview>),

    /// Remove every framework (cascading executor kills) and stop.
    Shutdown,
}

impl std::fmt::Debug for AgentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentEvent::Protocol { from, message } => f
                .debug_struct("Protocol")
                .field("from", from)
                .field("message", message)
                .finish(),
            AgentEvent::ExecutorExited {
                framework_id,
                executor_id,
                status,
            } => f
                .debug_struct("ExecutorExited")
                .field("framework_id", framework_id)
                .field("executor_id", executor_id)
                .field("status", status)
                .finish(),
            AgentEvent::Tick => f.write_str("Tick"),
            AgentEvent::Snapshot(_) => f.write_str("Snapshot"),
            AgentEvent::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Where the agent stands with the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    Reregistering,
}

/// Counters surfaced by the introspection endpoints.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub starting_tasks: u64,
    pub running_tasks: u64,
    pub finished_tasks: u64,
    pub failed_tasks: u64,
    pub killed_tasks: u64,
    pub lost_tasks: u64,
    pub valid_status_updates: u64,
    pub invalid_status_updates: u64,
    pub valid_framework_messages: u64,
    pub invalid_framework_messages: u64,
}

impl Stats {
    fn record_task_state(&mut self, state: TaskState) {
        match state {
            TaskState::Starting => self.starting_tasks += 1,
            TaskState::Running => self.running_tasks += 1,
            TaskState::Finished => self.finished_tasks += 1,
            TaskState::Failed => self.failed_tasks += 1,
            TaskState::Killed => self.killed_tasks += 1,
            TaskState::Lost => self.lost_tasks += 1,
        }
    }
}

/// Read-only snapshot handed to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub agent_id: Option<AgentId>,
    pub state: RegistrationState,
    pub master: Option<String>,
    pub hostname: String,
    pub endpoint: String,
    pub start_time: DateTime<Utc>,
    pub uptime_secs: f64,
    pub frameworks: Vec<FrameworkOverview>,
    pub tasks: Vec<TaskOverview>,
    pub stats: Stats,
    pub vars: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkOverview {
    pub id: FrameworkId,
    pub name: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOverview {
    pub task_id: TaskId,
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    pub name: String,
    pub state: TaskState,
    pub cpus: f64,
    pub mem: f64,
}

/// The agent actor.
pub struct Agent {
    conf: Config,
    info: AgentInfo,
    /// This agent's advertised message endpoint.
    endpoint: String,

    agent_id: Option<AgentId>,
    state: RegistrationState,
    master: Option<String>,

    frameworks: BTreeMap<FrameworkId, Framework>,

    isolation: Arc<dyn IsolationBackend>,
    sender: Arc<dyn MessageSender>,
    reaper: Option<ActorHandle<ReaperEvent>>,

    stats: Stats,
    retry_interval: Duration,
    started_at: Instant,
    start_time: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        conf: Config,
        info: AgentInfo,
        endpoint: String,
        isolation: Arc<dyn IsolationBackend>,
        sender: Arc<dyn MessageSender>,
        reaper: Option<ActorHandle<ReaperEvent>>,
    ) -> Self {
        Self {
            conf,
            info,
            endpoint,
            agent_id: None,
            state: RegistrationState::Unregistered,
            master: None,
            frameworks: BTreeMap::new(),
            isolation,
            sender,
            reaper,
            stats: Stats::default(),
            retry_interval: STATUS_UPDATE_RETRY_INTERVAL,
            started_at: Instant::now(),
            start_time: Utc::now(),
        }
    }

    /// Overrides the status-update retry interval (tests shorten it).
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.state
    }

    pub fn agent_id(&self) -> Option<&AgentId> {
        self.agent_id.as_ref()
    }

    pub fn master(&self) -> Option<&str> {
        self.master.as_deref()
    }

    pub fn framework(&self, framework_id: &FrameworkId) -> Option<&Framework> {
        self.frameworks.get(framework_id)
    }

    pub fn framework_count(&self) -> usize {
        self.frameworks.len()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Processes one mailbox event. Exposed so tests can drive the agent
    /// without spawning the actor loop.
    pub async fn handle_event(&mut self, event: AgentEvent) -> Result<bool, ActorError> {
        match event {
            AgentEvent::Protocol { from, message } => return self.deliver(&from, message).await,
            AgentEvent::ExecutorExited {
                framework_id,
                executor_id,
                status,
            } => self.executor_exited(framework_id, executor_id, status).await,
            AgentEvent::Tick => self.tick().await,
            AgentEvent::Snapshot(reply) => {
                let _ = reply.send(self.overview());
            }
            AgentEvent::Shutdown => {
                self.shutdown().await;
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Processes one protocol message from `from`.
    pub async fn deliver(&mut self, from: &str, message: Message) -> Result<bool, ActorError> {
        match message {
            Message::NewMasterDetected { master } => self.new_master_detected(master).await,
            Message::NoMasterDetected => self.no_master_detected(),
            Message::AgentRegistered { agent_id } => self.registered(agent_id),
            Message::AgentReregistered { agent_id } => self.reregistered(agent_id)?,
            Message::RunTask {
                framework,
                framework_id,
                scheduler,
                task,
            } => self.run_task(framework, framework_id, scheduler, task).await,
            Message::KillTask {
                framework_id,
                task_id,
            } => self.kill_task(framework_id, task_id).await,
            Message::KillFramework { framework_id } => {
                info!(framework_id = %framework_id, "Asked to kill framework");
                self.remove_framework(&framework_id, true).await;
            }
            Message::UpdateFramework {
                framework_id,
                scheduler,
            } => self.update_framework(framework_id, scheduler),
            Message::StatusUpdateAck {
                framework_id,
                task_id,
                ..
            } => self.status_update_acknowledged(framework_id, task_id),
            Message::RegisterExecutor {
                framework_id,
                executor_id,
            } => self.register_executor(from, framework_id, executor_id).await,
            Message::StatusUpdate { update, .. } => self.status_update(update).await,
            Message::FrameworkMessage {
                agent_id,
                framework_id,
                executor_id,
                data,
            } => {
                // The master relays scheduler messages; anything else comes
                // from an executor.
                if Some(from) == self.master.as_deref() {
                    self.scheduler_message(agent_id, framework_id, executor_id, data)
                        .await;
                } else {
                    self.executor_message(agent_id, framework_id, executor_id, data)
                        .await;
                }
            }
            Message::Ping => self.sender.send(from, Message::Pong).await,
            Message::Pong => {}
            other => {
                warn!(from = %from, message = ?other, "Dropping unexpected message");
            }
        }

        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Registration state machine
    // -------------------------------------------------------------------------

    async fn new_master_detected(&mut self, master: String) {
        info!(master = %master, "New master detected");
        self.master = Some(master.clone());

        match self.agent_id.clone() {
            None => {
                // Agent started before any master was known.
                self.state = RegistrationState::Registering;
                self.sender
                    .send(
                        &master,
                        Message::RegisterAgent {
                            agent: self.info.clone(),
                        },
                    )
                    .await;
            }
            Some(agent_id) => {
                // Failover: re-register, carrying every launched task so the
                // new master can rebuild its picture of this node.
                self.state = RegistrationState::Reregistering;
                let tasks = self
                    .frameworks
                    .values()
                    .flat_map(|framework| framework.launched_tasks())
                    .cloned()
                    .collect();
                self.sender
                    .send(
                        &master,
                        Message::ReregisterAgent {
                            agent_id,
                            agent: self.info.clone(),
                            tasks,
                        },
                    )
                    .await;
            }
        }
    }

    fn no_master_detected(&mut self) {
        // Frameworks stay; status updates keep accumulating until a master
        // shows up again.
        info!("Lost master(s), waiting for a new one");
        self.master = None;
    }

    fn registered(&mut self, agent_id: AgentId) {
        info!(agent_id = %agent_id, "Registered with master");
        self.agent_id = Some(agent_id);
        self.state = RegistrationState::Registered;
    }

    fn reregistered(&mut self, agent_id: AgentId) -> Result<(), ActorError> {
        if self.agent_id.as_ref() != Some(&agent_id) {
            return Err(ActorError::Fatal(format!(
                "re-registered with wrong id {} (expected {})",
                agent_id,
                self.agent_id
                    .as_ref()
                    .map(|id| id.as_str())
                    .unwrap_or("none"),
            )));
        }

        info!(agent_id = %agent_id, "Re-registered with master");
        self.state = RegistrationState::Registered;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Task lifecycle
    // -------------------------------------------------------------------------

    async fn run_task(
        &mut self,
        framework_info: FrameworkInfo,
        framework_id: FrameworkId,
        scheduler: String,
        task: TaskDescription,
    ) {
        info!(
            task_id = %task.task_id,
            framework_id = %framework_id,
            "Got assigned task"
        );

        let framework = self.frameworks.entry(framework_id.clone()).or_insert_with(|| {
            Framework::new(framework_id.clone(), framework_info, scheduler)
        });

        // The task's embedded executor spec wins; otherwise the framework's
        // default executor is used.
        let executor_info = task
            .executor
            .clone()
            .unwrap_or_else(|| framework.info.executor.clone());
        let executor_id = executor_info.executor_id.clone();

        if let Some(executor) = framework.executors.get_mut(&executor_id) {
            if task
                .executor
                .as_ref()
                .is_some_and(|spec| *spec != executor.info)
            {
                warn!(
                    executor_id = %executor_id,
                    "Task embeds an executor spec that diverges from the \
                     existing executor; reusing the existing one"
                );
            }

            match executor.endpoint.clone() {
                Some(endpoint) => {
                    // Executor is up: hand the task over immediately.
                    executor.add_task(&task);

                    let framework_info = framework.info.clone();
                    let scheduler = framework.scheduler.clone();
                    let executor_info = executor.info.clone();
                    let resources = executor.resources.clone();

                    self.sender
                        .send(
                            &endpoint,
                            Message::RunTask {
                                framework: framework_info.clone(),
                                framework_id: framework_id.clone(),
                                scheduler,
                                task,
                            },
                        )
                        .await;

                    self.isolation
                        .resources_changed(
                            &framework_id,
                            &framework_info,
                            &executor_info,
                            &resources,
                        )
                        .await;
                }
                None => {
                    // Executor launched but not yet registered: park the task.
                    executor.queued_tasks.insert(task.task_id.clone(), task);
                }
            }
        } else {
            // First task for this executor: allocate a work directory, queue
            // the task, and ask the isolation backend to launch the child.
            let directory = match unique_work_directory(
                &self.conf.work_dir,
                self.agent_id.as_ref(),
                &framework_id,
                &executor_id,
            ) {
                Ok(directory) => directory,
                Err(e) => {
                    warn!(
                        framework_id = %framework_id,
                        executor_id = %executor_id,
                        error = %e,
                        "Failed to allocate work directory; dropping task"
                    );
                    return;
                }
            };

            let framework_info = framework.info.clone();
            let executor = framework.create_executor(executor_info, directory.clone());
            executor.queued_tasks.insert(task.task_id.clone(), task);
            let executor_info = executor.info.clone();

            match self
                .isolation
                .launch_executor(&framework_id, &framework_info, &executor_info, &directory)
                .await
            {
                Ok(pid) if pid != UNMANAGED_PID => {
                    if let Some(reaper) = &self.reaper {
                        let watch = ReaperEvent::Watch {
                            framework_id: framework_id.clone(),
                            executor_id: executor_id.clone(),
                            pid,
                        };
                        if reaper.try_send(watch).is_err() {
                            warn!(pid, "Reaper unreachable; executor exit will go unnoticed");
                        }
                    }
                }
                Ok(_) => {
                    // Pid 0: the backend manages the child's lifecycle itself.
                }
                Err(e) => {
                    warn!(
                        framework_id = %framework_id,
                        executor_id = %executor_id,
                        error = %e,
                        "Isolation backend failed to launch executor"
                    );
                }
            }
        }
    }

    async fn kill_task(&mut self, framework_id: FrameworkId, task_id: TaskId) {
        info!(task_id = %task_id, framework_id = %framework_id, "Asked to kill task");

        enum Outcome {
            NoFramework,
            NoTask,
            RemovedQueued {
                framework_info: FrameworkInfo,
                executor_id: ExecutorId,
                executor_info: ExecutorInfo,
                resources: Resources,
            },
            Forward {
                endpoint: String,
            },
        }

        let outcome = match self.frameworks.get_mut(&framework_id) {
            None => Outcome::NoFramework,
            Some(framework) => {
                let framework_info = framework.info.clone();
                match framework.executor_for_task(&task_id) {
                    None => Outcome::NoTask,
                    Some(executor) => match executor.endpoint.clone() {
                        Some(endpoint) => Outcome::Forward { endpoint },
                        None => {
                            // Not running yet: drop it locally and report the
                            // kill ourselves.
                            executor.remove_task(&task_id);
                            Outcome::RemovedQueued {
                                framework_info,
                                executor_id: executor.id.clone(),
                                executor_info: executor.info.clone(),
                                resources: executor.resources.clone(),
                            }
                        }
                    },
                }
            }
        };

        match outcome {
            Outcome::NoFramework => {
                warn!(
                    task_id = %task_id,
                    framework_id = %framework_id,
                    "Cannot kill task: no such framework"
                );
                let update = self.synthetic_update(&framework_id, None, &task_id, TaskState::Lost);
                self.send_status_to_master(update, false).await;
            }
            Outcome::NoTask => {
                warn!(
                    task_id = %task_id,
                    framework_id = %framework_id,
                    "Cannot kill task: no such task"
                );
                let update = self.synthetic_update(&framework_id, None, &task_id, TaskState::Lost);
                self.send_status_to_master(update, false).await;
            }
            Outcome::RemovedQueued {
                framework_info,
                executor_id,
                executor_info,
                resources,
            } => {
                self.isolation
                    .resources_changed(&framework_id, &framework_info, &executor_info, &resources)
                    .await;
                let update = self.synthetic_update(
                    &framework_id,
                    Some(executor_id),
                    &task_id,
                    TaskState::Killed,
                );
                self.send_status_to_master(update, false).await;
            }
            Outcome::Forward { endpoint } => {
                // The executor reports the kill through a status update.
                self.sender
                    .send(
                        &endpoint,
                        Message::KillTask {
                            framework_id,
                            task_id,
                        },
                    )
                    .await;
            }
        }
    }

    fn update_framework(&mut self, framework_id: FrameworkId, scheduler: String) {
        if let Some(framework) = self.frameworks.get_mut(&framework_id) {
            info!(
                framework_id = %framework_id,
                scheduler = %scheduler,
                "Updating framework scheduler endpoint"
            );
            framework.scheduler = scheduler;
        }
    }

    // -------------------------------------------------------------------------
    // Executor protocol
    // -------------------------------------------------------------------------

    async fn register_executor(
        &mut self,
        from: &str,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    ) {
        info!(
            executor_id = %executor_id,
            framework_id = %framework_id,
            from = %from,
            "Executor registration"
        );

        let Some(framework) = self.frameworks.get_mut(&framework_id) else {
            warn!(
                framework_id = %framework_id,
                "Unknown framework; telling executor to exit"
            );
            self.sender.send(from, Message::KillExecutor).await;
            return;
        };

        let framework_info = framework.info.clone();
        let scheduler = framework.scheduler.clone();

        let flushed = match framework.executors.get_mut(&executor_id) {
            None => {
                warn!(
                    executor_id = %executor_id,
                    framework_id = %framework_id,
                    "Unexpected executor registration; telling it to exit"
                );
                self.sender.send(from, Message::KillExecutor).await;
                return;
            }
            Some(executor) if executor.endpoint.is_some() => {
                warn!(
                    executor_id = %executor_id,
                    framework_id = %framework_id,
                    "Executor is already registered; telling duplicate to exit"
                );
                self.sender.send(from, Message::KillExecutor).await;
                return;
            }
            Some(executor) => {
                executor.endpoint = Some(from.to_string());

                // Promote queued tasks in id order; each becomes a RunTask
                // message after the registration reply below.
                let queued = std::mem::take(&mut executor.queued_tasks);
                for description in queued.values() {
                    executor.add_task(description);
                }

                (
                    executor.info.clone(),
                    executor.resources.clone(),
                    queued.into_values().collect::<Vec<_>>(),
                )
            }
        };
        let (executor_info, resources, descriptions) = flushed;

        self.isolation
            .resources_changed(&framework_id, &framework_info, &executor_info, &resources)
            .await;

        let context = ExecutorContext {
            framework_id: framework_id.clone(),
            executor_id,
            agent_id: self.current_agent_id(),
            hostname: self.info.hostname.clone(),
            data: executor_info.data.clone(),
        };
        self.sender
            .send(from, Message::ExecutorRegistered { context })
            .await;

        for task in descriptions {
            self.sender
                .send(
                    from,
                    Message::RunTask {
                        framework: framework_info.clone(),
                        framework_id: framework_id.clone(),
                        scheduler: scheduler.clone(),
                        task,
                    },
                )
                .await;
        }
    }

    async fn status_update(&mut self, update: StatusUpdate) {
        let task_id = update.status.task_id.clone();
        let state = update.status.state;

        info!(
            task_id = %task_id,
            framework_id = %update.framework_id,
            state = %state,
            "Status update"
        );

        enum Outcome {
            UnknownFramework,
            UnknownTask,
            Accepted {
                executor_endpoint: Option<String>,
                credit: Option<(FrameworkInfo, ExecutorInfo, Resources)>,
            },
        }

        let outcome = match self.frameworks.get_mut(&update.framework_id) {
            None => Outcome::UnknownFramework,
            Some(framework) => {
                let framework_info = framework.info.clone();
                match framework.executor_for_task(&task_id) {
                    None => Outcome::UnknownTask,
                    Some(executor) => {
                        executor.update_task_state(&task_id, state);
                        let executor_endpoint = executor.endpoint.clone();

                        // Terminal states release the task's resources.
                        let credit = if state.is_terminal() {
                            executor.remove_task(&task_id);
                            Some((
                                framework_info,
                                executor.info.clone(),
                                executor.resources.clone(),
                            ))
                        } else {
                            None
                        };

                        Outcome::Accepted {
                            executor_endpoint,
                            credit,
                        }
                    }
                }
            }
        };

        match outcome {
            Outcome::UnknownFramework => {
                warn!(
                    framework_id = %update.framework_id,
                    "Status update for unknown framework"
                );
                self.stats.invalid_status_updates += 1;
            }
            Outcome::UnknownTask => {
                warn!(
                    task_id = %task_id,
                    framework_id = %update.framework_id,
                    "Status update for unknown task"
                );
                self.stats.invalid_status_updates += 1;
            }
            Outcome::Accepted {
                executor_endpoint,
                credit,
            } => {
                self.stats.valid_status_updates += 1;
                self.stats.record_task_state(state);

                if let Some((framework_info, executor_info, resources)) = credit {
                    self.isolation
                        .resources_changed(
                            &update.framework_id,
                            &framework_info,
                            &executor_info,
                            &resources,
                        )
                        .await;
                }

                // Relay reliably and park for retry until the master acks.
                self.send_status_to_master(update.clone(), true).await;
                let deadline = Instant::now() + self.retry_interval;
                if let Some(framework) = self.frameworks.get_mut(&update.framework_id) {
                    framework.updates.insert(deadline, update.clone());
                }

                // Ack the executor so it can retire its local copy.
                if let Some(endpoint) = executor_endpoint {
                    let ack = Message::StatusUpdateAck {
                        agent_id: self.current_agent_id(),
                        framework_id: update.framework_id.clone(),
                        task_id,
                    };
                    self.sender.send(&endpoint, ack).await;
                }
            }
        }
    }

    fn status_update_acknowledged(&mut self, framework_id: FrameworkId, task_id: TaskId) {
        if let Some(framework) = self.frameworks.get_mut(&framework_id) {
            if framework.updates.acknowledge(&task_id) {
                info!(
                    task_id = %task_id,
                    framework_id = %framework_id,
                    "Status update acknowledged"
                );
            }
        }
    }

    // -------------------------------------------------------------------------
    // Opaque message forwarding
    // -------------------------------------------------------------------------

    async fn scheduler_message(
        &mut self,
        agent_id: AgentId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        let endpoint = match self.frameworks.get_mut(&framework_id) {
            None => {
                warn!(framework_id = %framework_id, "Dropping message: no such framework");
                self.stats.invalid_framework_messages += 1;
                return;
            }
            Some(framework) => match framework.executor(&executor_id) {
                None => {
                    warn!(
                        executor_id = %executor_id,
                        framework_id = %framework_id,
                        "Dropping message: no such executor"
                    );
                    self.stats.invalid_framework_messages += 1;
                    return;
                }
                Some(executor) => match executor.endpoint.clone() {
                    None => {
                        warn!(
                            executor_id = %executor_id,
                            framework_id = %framework_id,
                            "Dropping message: executor not running"
                        );
                        self.stats.invalid_framework_messages += 1;
                        return;
                    }
                    Some(endpoint) => endpoint,
                },
            },
        };

        self.sender
            .send(
                &endpoint,
                Message::FrameworkMessage {
                    agent_id,
                    framework_id,
                    executor_id,
                    data,
                },
            )
            .await;
        self.stats.valid_framework_messages += 1;
    }

    async fn executor_message(
        &mut self,
        agent_id: AgentId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    ) {
        let scheduler = match self.frameworks.get(&framework_id) {
            None => {
                warn!(
                    framework_id = %framework_id,
                    "Dropping executor message: no such framework"
                );
                self.stats.invalid_framework_messages += 1;
                return;
            }
            Some(framework) => framework.scheduler.clone(),
        };

        self.sender
            .send(
                &scheduler,
                Message::FrameworkMessage {
                    agent_id,
                    framework_id,
                    executor_id,
                    data,
                },
            )
            .await;
        self.stats.valid_framework_messages += 1;
    }

    // -------------------------------------------------------------------------
    // Executor exits and removal
    // -------------------------------------------------------------------------

    async fn executor_exited(
        &mut self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    ) {
        let known = self
            .frameworks
            .get(&framework_id)
            .map(|framework| framework.executors.contains_key(&executor_id))
            .unwrap_or(false);

        if !known {
            warn!(
                executor_id = %executor_id,
                framework_id = %framework_id,
                status,
                "Unknown executor exited"
            );
            return;
        }

        info!(
            executor_id = %executor_id,
            framework_id = %framework_id,
            status,
            "Executor exited"
        );

        let exited = Message::ExitedExecutor {
            agent_id: self.current_agent_id(),
            framework_id: framework_id.clone(),
            executor_id: executor_id.clone(),
            status,
        };
        self.send_to_master(exited).await;

        // The process is already gone; don't kill it again.
        self.remove_executor(&framework_id, &executor_id, false).await;

        let framework_empty = self
            .frameworks
            .get(&framework_id)
            .map(|framework| framework.executors.is_empty())
            .unwrap_or(false);
        if framework_empty {
            self.remove_framework(&framework_id, true).await;
        }
    }

    async fn remove_executor(
        &mut self,
        framework_id: &FrameworkId,
        executor_id: &ExecutorId,
        kill: bool,
    ) {
        let Some(framework) = self.frameworks.get_mut(framework_id) else {
            return;
        };
        let framework_info = framework.info.clone();
        let Some(executor) = framework.executors.get_mut(executor_id) else {
            return;
        };
        let endpoint = executor.endpoint.clone();
        let executor_info = executor.info.clone();

        if kill {
            info!(
                executor_id = %executor_id,
                framework_id = %framework_id,
                "Killing executor"
            );
            if let Some(endpoint) = endpoint {
                self.sender.send(&endpoint, Message::KillExecutor).await;
            }
            self.isolation
                .kill_executor(framework_id, &framework_info, &executor_info)
                .await;
        }

        if let Some(framework) = self.frameworks.get_mut(framework_id) {
            framework.destroy_executor(executor_id);
        }
    }

    async fn remove_framework(&mut self, framework_id: &FrameworkId, kill_executors: bool) {
        let Some(framework) = self.frameworks.remove(framework_id) else {
            return;
        };

        info!(framework_id = %framework_id, "Cleaning up framework");

        for executor in framework.executors.values() {
            if kill_executors {
                if let Some(endpoint) = &executor.endpoint {
                    self.sender.send(endpoint, Message::KillExecutor).await;
                }
                self.isolation
                    .kill_executor(framework_id, &framework.info, &executor.info)
                    .await;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Timers and shutdown
    // -------------------------------------------------------------------------

    async fn tick(&mut self) {
        let now = Instant::now();
        let deadline = now + self.retry_interval;

        let mut resend = Vec::new();
        for framework in self.frameworks.values_mut() {
            for update in framework.updates.drain_due(now) {
                resend.push(update.clone());
                // Park the survivor under a fresh deadline so a lost ack does
                // not grow a new bucket every interval.
                framework.updates.insert(deadline, update);
            }
        }

        for update in resend {
            warn!(
                task_id = %update.status.task_id,
                framework_id = %update.framework_id,
                "Resending unacknowledged status update"
            );
            self.send_status_to_master(update, true).await;
        }
    }

    async fn shutdown(&mut self) {
        info!(
            frameworks = self.frameworks.len(),
            "Shutting down; removing all frameworks"
        );

        let ids: Vec<_> = self.frameworks.keys().cloned().collect();
        for framework_id in ids {
            self.remove_framework(&framework_id, true).await;
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn current_agent_id(&self) -> AgentId {
        self.agent_id
            .clone()
            .unwrap_or_else(|| AgentId::new("unassigned"))
    }

    fn synthetic_update(
        &self,
        framework_id: &FrameworkId,
        executor_id: Option<ExecutorId>,
        task_id: &TaskId,
        state: TaskState,
    ) -> StatusUpdate {
        StatusUpdate {
            framework_id: framework_id.clone(),
            agent_id: self.current_agent_id(),
            executor_id,
            status: TaskStatus {
                task_id: task_id.clone(),
                state,
                data: Vec::new(),
            },
            timestamp: Utc::now(),
            sequence: 0,
        }
    }

    async fn send_status_to_master(&self, update: StatusUpdate, reliable: bool) {
        self.send_to_master(Message::StatusUpdate { update, reliable })
            .await;
    }

    async fn send_to_master(&self, message: Message) {
        match &self.master {
            Some(master) => self.sender.send(master, message).await,
            None => {
                // Reliable updates are parked in the retry buckets and will
                // go out once a master is known.
                warn!("No master known; dropping outbound message");
            }
        }
    }

    fn overview(&self) -> Overview {
        let frameworks = self
            .frameworks
            .values()
            .map(|framework| FrameworkOverview {
                id: framework.id.clone(),
                name: framework.info.name.clone(),
                user: framework.info.user.clone(),
            })
            .collect();

        let tasks = self
            .frameworks
            .values()
            .flat_map(|framework| framework.launched_tasks())
            .map(|task| TaskOverview {
                task_id: task.task_id.clone(),
                framework_id: task.framework_id.clone(),
                agent_id: task.agent_id.clone(),
                name: task.name.clone(),
                state: task.state,
                cpus: task.resources.get_scalar("cpus", 0.0),
                mem: task.resources.get_scalar("mem", 0.0),
            })
            .collect();

        Overview {
            agent_id: self.agent_id.clone(),
            state: self.state,
            master: self.master.clone(),
            hostname: self.info.hostname.clone(),
            endpoint: self.endpoint.clone(),
            start_time: self.start_time,
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            frameworks,
            tasks,
            stats: self.stats.clone(),
            vars: self.conf.vars(),
        }
    }
}

#[async_trait]
impl Actor for Agent {
    type Message = AgentEvent;

    fn name(&self) -> &str {
        "agent"
    }

    async fn handle(&mut self, msg: AgentEvent) -> Result<bool, ActorError> {
        self.handle_event(msg).await
    }

    async fn on_start(&mut self) -> Result<(), ActorError> {
        info!(
            hostname = %self.info.hostname,
            resources = %self.info.resources,
            endpoint = %self.endpoint,
            "Agent started"
        );
        Ok(())
    }

    async fn on_stop(&mut self) {
        info!("Agent stopped");
    }
}

/// Allocates `<work_dir>/agent-<id>/fw-<framework>-<executor>/<N>` with the
/// smallest `N` not yet taken. The same framework/executor pair may be
/// launched repeatedly on one node over time; the integer suffix keeps their
/// directories apart.
fn unique_work_directory(
    work_dir: &Path,
    agent_id: Option<&AgentId>,
    framework_id: &FrameworkId,
    executor_id: &ExecutorId,
) -> std::io::Result<PathBuf> {
    let agent = agent_id.map(|id| id.as_str()).unwrap_or("unassigned");
    let base = work_dir
        .join(format!("agent-{}", agent))
        .join(format!("fw-{}-{}", framework_id, executor_id));

    let mut n: u64 = 0;
    loop {
        let candidate = base.join(n.to_string());
        if !candidate.exists() {
            std::fs::create_dir_all(&candidate)?;
            return Ok(candidate);
        }
        n += 1;
    }
}
