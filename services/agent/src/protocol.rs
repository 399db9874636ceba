//! Wire protocol between the master, the agent, and executors.
//!
//! Messages are internally tagged serde records carried in an [`Envelope`]
//! that names the sender's endpoint. The encoding is schema-evolvable:
//! unknown fields are ignored on decode and new optional fields default, so
//! peers on adjacent protocol revisions interoperate.
//!
//! Several shapes are shared between directions. `RunTask` is the same
//! record master→agent and agent→executor; likewise `KillTask` and
//! `StatusUpdateAck`. A `StatusUpdate` message from an executor leaves
//! `reliable` at its default; the agent's relay to the master sets it.

use armada_id::{AgentId, ExecutorId, FrameworkId, TaskId};
use armada_resources::Resources;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wrapper naming the sending endpoint, so the receiver can reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base URL of the sender's message endpoint.
    pub from: String,
    pub message: Message,
}

/// The state of a task as reported through status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl TaskState {
    /// Terminal states: no further updates are expected for the task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Failed | TaskState::Killed | TaskState::Lost
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
            TaskState::Killed => "killed",
            TaskState::Lost => "lost",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the agent advertises about itself at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub hostname: String,
    /// May differ from `hostname` when a public DNS override is configured.
    pub public_hostname: String,
    pub resources: Resources,
    #[serde(default)]
    pub attributes: String,
}

/// A framework (tenant) as described by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub name: String,
    pub user: String,
    /// Default executor used for tasks that do not embed their own.
    pub executor: ExecutorInfo,
}

/// How to launch and size an executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    /// Location of the executor binary or launch command.
    pub uri: String,
    #[serde(default)]
    pub resources: Resources,
    /// Opaque payload handed back to the executor on registration.
    #[serde(default)]
    pub data: Vec<u8>,
}

/// A task as assigned by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_id: TaskId,
    pub name: String,
    pub agent_id: AgentId,
    pub resources: Resources,
    #[serde(default)]
    pub data: Vec<u8>,
    /// Embedded executor spec; absent means "use the framework default".
    #[serde(default)]
    pub executor: Option<ExecutorInfo>,
}

/// A launched task tracked by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub name: String,
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub agent_id: AgentId,
    pub resources: Resources,
    pub state: TaskState,
}

/// A single task state observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// A status update flowing executor → agent → master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub framework_id: FrameworkId,
    pub agent_id: AgentId,
    #[serde(default)]
    pub executor_id: Option<ExecutorId>,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    /// Reserved for the durable per-stream variant of the pipeline.
    #[serde(default)]
    pub sequence: i64,
}

/// Working context handed to an executor when its registration is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorContext {
    pub framework_id: FrameworkId,
    pub executor_id: ExecutorId,
    pub agent_id: AgentId,
    pub hostname: String,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Every message exchanged between the master, the agent, and executors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // Master election, from the detector or the master itself.
    NewMasterDetected {
        master: String,
    },
    NoMasterDetected,

    // Agent -> master.
    RegisterAgent {
        agent: AgentInfo,
    },
    ReregisterAgent {
        agent_id: AgentId,
        agent: AgentInfo,
        tasks: Vec<Task>,
    },
    ExitedExecutor {
        agent_id: AgentId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    },

    // Master -> agent.
    AgentRegistered {
        agent_id: AgentId,
    },
    AgentReregistered {
        agent_id: AgentId,
    },
    RunTask {
        framework: FrameworkInfo,
        framework_id: FrameworkId,
        /// The framework scheduler's current endpoint.
        scheduler: String,
        task: TaskDescription,
    },
    KillTask {
        framework_id: FrameworkId,
        task_id: TaskId,
    },
    KillFramework {
        framework_id: FrameworkId,
    },
    UpdateFramework {
        framework_id: FrameworkId,
        scheduler: String,
    },
    StatusUpdateAck {
        agent_id: AgentId,
        framework_id: FrameworkId,
        task_id: TaskId,
    },

    // Executor <-> agent.
    RegisterExecutor {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    },
    ExecutorRegistered {
        context: ExecutorContext,
    },
    KillExecutor,
    StatusUpdate {
        update: StatusUpdate,
        #[serde(default)]
        reliable: bool,
    },

    // Opaque scheduler <-> executor payloads relayed through the agent.
    FrameworkMessage {
        agent_id: AgentId,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },

    Ping,
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_status(state: TaskState) -> TaskStatus {
        TaskStatus {
            task_id: TaskId::new("t1"),
            state,
            data: Vec::new(),
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Finished.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Killed.is_terminal());
        assert!(TaskState::Lost.is_terminal());
        assert!(!TaskState::Starting.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn test_message_tagging() {
        let json = serde_json::to_string(&Message::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);

        let json = serde_json::to_string(&Message::NewMasterDetected {
            master: "http://master:5050".to_string(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"new_master_detected""#));
    }

    #[test]
    fn test_status_update_reliable_defaults_false() {
        let update = StatusUpdate {
            framework_id: FrameworkId::new("f1"),
            agent_id: AgentId::new("agent-1"),
            executor_id: None,
            status: task_status(TaskState::Running),
            timestamp: Utc::now(),
            sequence: 0,
        };

        // An executor's encoder does not know about the reliable flag.
        let json = format!(
            r#"{{"type":"status_update","update":{}}}"#,
            serde_json::to_string(&update).unwrap()
        );
        let decoded: Message = serde_json::from_str(&json).unwrap();
        match decoded {
            Message::StatusUpdate { reliable, .. } => assert!(!reliable),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_unknown_fields_ignored() {
        // A newer peer may add fields; older agents must not choke.
        let json = r#"{"type":"kill_task","framework_id":"f1","task_id":"t1","grace_seconds":30}"#;
        let decoded: Message = serde_json::from_str(json).unwrap();
        assert!(matches!(decoded, Message::KillTask { .. }));
    }

    #[test]
    fn test_task_description_executor_defaults_none() {
        let json = r#"{"task_id":"t1","name":"crunch","agent_id":"agent-1","resources":{"cpus":{"scalar":1.0}}}"#;
        let decoded: TaskDescription = serde_json::from_str(json).unwrap();
        assert!(decoded.executor.is_none());
        assert!(decoded.data.is_empty());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope {
            from: "http://executor:7070".to_string(),
            message: Message::RegisterExecutor {
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
            },
        };

        let json = serde_json::to_string(&envelope).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
