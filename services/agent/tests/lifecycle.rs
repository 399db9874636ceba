//! Integration tests: framework/executor/task lifecycle.
//!
//! The agent is driven directly through its event handlers, with the mock
//! isolation backend standing in for process launching and a recording
//! sender capturing every outbound message.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use armada_agent::agent::{Agent, AgentEvent};
use armada_agent::config::Config;
use armada_agent::isolation::{IsolationCall, MockIsolation};
use armada_agent::protocol::{
    AgentInfo, ExecutorInfo, FrameworkInfo, Message, TaskDescription, TaskState,
};
use armada_agent::remote::RecordingSender;
use armada_id::{AgentId, ExecutorId, FrameworkId, TaskId};
use armada_resources::Resources;

const MASTER: &str = "http://master:5050";
const EXECUTOR: &str = "http://executor:7070";
const SCHEDULER: &str = "http://scheduler:9090";

static WORK_DIR_SEQ: AtomicU32 = AtomicU32::new(0);

struct Harness {
    agent: Agent,
    isolation: Arc<MockIsolation>,
    sender: Arc<RecordingSender>,
}

fn harness() -> Harness {
    let isolation = Arc::new(MockIsolation::new());
    let sender = Arc::new(RecordingSender::new());

    let conf = Config {
        work_dir: std::env::temp_dir().join(format!(
            "armada-lifecycle-{}-{}",
            std::process::id(),
            WORK_DIR_SEQ.fetch_add(1, Ordering::SeqCst)
        )),
        ..Config::default()
    };

    let info = AgentInfo {
        hostname: "node-1".to_string(),
        public_hostname: "node-1".to_string(),
        resources: "cpus:4;mem:4096".parse().unwrap(),
        attributes: String::new(),
    };

    let agent = Agent::new(
        conf,
        info,
        "http://node-1:5051".to_string(),
        isolation.clone(),
        sender.clone(),
        None,
    );

    Harness {
        agent,
        isolation,
        sender,
    }
}

async fn register(harness: &mut Harness) {
    harness
        .agent
        .deliver(
            "detector",
            Message::NewMasterDetected {
                master: MASTER.to_string(),
            },
        )
        .await
        .unwrap();
    harness
        .agent
        .deliver(
            MASTER,
            Message::AgentRegistered {
                agent_id: AgentId::new("agent-1"),
            },
        )
        .await
        .unwrap();
    harness.sender.take();
}

fn executor_info(id: &str) -> ExecutorInfo {
    ExecutorInfo {
        executor_id: ExecutorId::new(id),
        uri: "/usr/local/bin/executor".to_string(),
        resources: Resources::new(),
        data: b"ctx".to_vec(),
    }
}

fn framework_info() -> FrameworkInfo {
    FrameworkInfo {
        name: "analytics".to_string(),
        user: "svc-analytics".to_string(),
        executor: executor_info("e1"),
    }
}

fn run_task(task: &str, resources: &str) -> Message {
    Message::RunTask {
        framework: framework_info(),
        framework_id: FrameworkId::new("f1"),
        scheduler: SCHEDULER.to_string(),
        task: TaskDescription {
            task_id: TaskId::new(task),
            name: task.to_string(),
            agent_id: AgentId::new("agent-1"),
            resources: resources.parse().unwrap(),
            data: Vec::new(),
            executor: None,
        },
    }
}

#[tokio::test]
async fn test_happy_path_launch_register_flush() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(MASTER, run_task("t1", "cpus:1;mem:256"))
        .await
        .unwrap();

    // The executor is launched and its first task parked until registration.
    let launches: Vec<_> = h
        .isolation
        .calls()
        .into_iter()
        .filter(|call| matches!(call, IsolationCall::Launch { .. }))
        .collect();
    assert_eq!(launches.len(), 1);
    match &launches[0] {
        IsolationCall::Launch {
            framework_id,
            executor_id,
            directory,
        } => {
            assert_eq!(*framework_id, FrameworkId::new("f1"));
            assert_eq!(*executor_id, ExecutorId::new("e1"));
            assert!(directory.ends_with("agent-agent-1/fw-f1-e1/0"));
        }
        other => panic!("unexpected call {:?}", other),
    }

    let framework = h.agent.framework(&FrameworkId::new("f1")).unwrap();
    let executor = framework.executors.get(&ExecutorId::new("e1")).unwrap();
    assert!(!executor.is_registered());
    assert!(executor.queued_tasks.contains_key(&TaskId::new("t1")));

    h.agent
        .deliver(
            EXECUTOR,
            Message::RegisterExecutor {
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
            },
        )
        .await
        .unwrap();

    // Registration reply first, then the queued task.
    let to_executor = h.sender.sent_to(EXECUTOR);
    assert_eq!(to_executor.len(), 2);
    match &to_executor[0] {
        Message::ExecutorRegistered { context } => {
            assert_eq!(context.framework_id, FrameworkId::new("f1"));
            assert_eq!(context.executor_id, ExecutorId::new("e1"));
            assert_eq!(context.agent_id, AgentId::new("agent-1"));
            assert_eq!(context.hostname, "node-1");
            assert_eq!(context.data, b"ctx".to_vec());
        }
        other => panic!("expected registration reply, got {:?}", other),
    }
    match &to_executor[1] {
        Message::RunTask { task, .. } => assert_eq!(task.task_id, TaskId::new("t1")),
        other => panic!("expected run task, got {:?}", other),
    }

    // The cap reflects the flushed task.
    let expected: Resources = "cpus:1;mem:256".parse().unwrap();
    assert_eq!(h.isolation.resource_updates(), vec![expected]);

    let framework = h.agent.framework(&FrameworkId::new("f1")).unwrap();
    let executor = framework.executors.get(&ExecutorId::new("e1")).unwrap();
    assert!(executor.queued_tasks.is_empty());
    assert_eq!(
        executor.launched_tasks.get(&TaskId::new("t1")).unwrap().state,
        TaskState::Starting
    );
}

#[tokio::test]
async fn test_queue_and_flush_preserves_both_tasks() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(MASTER, run_task("t1", "cpus:1;mem:256"))
        .await
        .unwrap();
    h.agent
        .deliver(MASTER, run_task("t2", "cpus:1;mem:128"))
        .await
        .unwrap();

    {
        let framework = h.agent.framework(&FrameworkId::new("f1")).unwrap();
        let executor = framework.executors.get(&ExecutorId::new("e1")).unwrap();
        assert_eq!(executor.queued_tasks.len(), 2);
        assert!(executor.launched_tasks.is_empty());
        // Only one launch for the shared executor.
        assert_eq!(
            h.isolation
                .calls()
                .iter()
                .filter(|call| matches!(call, IsolationCall::Launch { .. }))
                .count(),
            1
        );
    }

    h.agent
        .deliver(
            EXECUTOR,
            Message::RegisterExecutor {
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
            },
        )
        .await
        .unwrap();

    let run_tasks: Vec<_> = h
        .sender
        .sent_to(EXECUTOR)
        .into_iter()
        .filter_map(|message| match message {
            Message::RunTask { task, .. } => Some(task.task_id),
            _ => None,
        })
        .collect();
    assert_eq!(run_tasks, vec![TaskId::new("t1"), TaskId::new("t2")]);

    let framework = h.agent.framework(&FrameworkId::new("f1")).unwrap();
    let executor = framework.executors.get(&ExecutorId::new("e1")).unwrap();
    assert!(executor.queued_tasks.is_empty());
    assert_eq!(executor.launched_tasks.len(), 2);
    assert_eq!(executor.resources.get_scalar("mem", 0.0), 384.0);
}

#[tokio::test]
async fn test_early_kill_of_queued_task() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(MASTER, run_task("t1", "cpus:1;mem:256"))
        .await
        .unwrap();
    h.sender.take();

    h.agent
        .deliver(
            MASTER,
            Message::KillTask {
                framework_id: FrameworkId::new("f1"),
                task_id: TaskId::new("t1"),
            },
        )
        .await
        .unwrap();

    // Task is gone from the queue; the cap update carries zero task cost.
    let framework = h.agent.framework(&FrameworkId::new("f1")).unwrap();
    let executor = framework.executors.get(&ExecutorId::new("e1")).unwrap();
    assert!(executor.queued_tasks.is_empty());
    assert_eq!(h.isolation.resource_updates(), vec![Resources::new()]);

    // The agent reports the kill itself, unreliably.
    let to_master = h.sender.sent_to(MASTER);
    assert_eq!(to_master.len(), 1);
    match &to_master[0] {
        Message::StatusUpdate { update, reliable } => {
            assert!(!reliable);
            assert_eq!(update.status.state, TaskState::Killed);
            assert_eq!(update.status.task_id, TaskId::new("t1"));
            assert_eq!(update.executor_id, Some(ExecutorId::new("e1")));
        }
        other => panic!("expected status update, got {:?}", other),
    }

    // Nothing goes to the never-registered executor.
    assert!(h.sender.sent_to(EXECUTOR).is_empty());
}

#[tokio::test]
async fn test_kill_task_unknown_framework_reports_lost() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(
            MASTER,
            Message::KillTask {
                framework_id: FrameworkId::new("ghost"),
                task_id: TaskId::new("t1"),
            },
        )
        .await
        .unwrap();

    let to_master = h.sender.sent_to(MASTER);
    assert_eq!(to_master.len(), 1);
    match &to_master[0] {
        Message::StatusUpdate { update, reliable } => {
            assert!(!reliable);
            assert_eq!(update.status.state, TaskState::Lost);
        }
        other => panic!("expected status update, got {:?}", other),
    }
}

#[tokio::test]
async fn test_executor_exit_removes_executor_and_framework() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(MASTER, run_task("t1", "cpus:1;mem:256"))
        .await
        .unwrap();
    h.agent
        .deliver(
            EXECUTOR,
            Message::RegisterExecutor {
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
            },
        )
        .await
        .unwrap();
    h.sender.take();

    h.agent
        .handle_event(AgentEvent::ExecutorExited {
            framework_id: FrameworkId::new("f1"),
            executor_id: ExecutorId::new("e1"),
            status: 0,
        })
        .await
        .unwrap();

    let to_master = h.sender.sent_to(MASTER);
    assert_eq!(to_master.len(), 1);
    match &to_master[0] {
        Message::ExitedExecutor {
            framework_id,
            executor_id,
            status,
            ..
        } => {
            assert_eq!(*framework_id, FrameworkId::new("f1"));
            assert_eq!(*executor_id, ExecutorId::new("e1"));
            assert_eq!(*status, 0);
        }
        other => panic!("expected exited executor, got {:?}", other),
    }

    // Last executor gone: the framework goes with it, and the already-dead
    // process is not re-killed.
    assert_eq!(h.agent.framework_count(), 0);
    assert!(!h
        .isolation
        .calls()
        .iter()
        .any(|call| matches!(call, IsolationCall::Kill { .. })));
}

#[tokio::test]
async fn test_kill_framework_cascades_to_executors() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(MASTER, run_task("t1", "cpus:1;mem:256"))
        .await
        .unwrap();
    h.agent
        .deliver(
            EXECUTOR,
            Message::RegisterExecutor {
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
            },
        )
        .await
        .unwrap();
    h.sender.take();

    h.agent
        .deliver(
            MASTER,
            Message::KillFramework {
                framework_id: FrameworkId::new("f1"),
            },
        )
        .await
        .unwrap();

    assert_eq!(h.agent.framework_count(), 0);
    assert_eq!(h.sender.sent_to(EXECUTOR), vec![Message::KillExecutor]);
    assert!(h
        .isolation
        .calls()
        .iter()
        .any(|call| matches!(call, IsolationCall::Kill { .. })));
}

#[tokio::test]
async fn test_embedded_executor_spec_reuses_existing_executor() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(MASTER, run_task("t1", "cpus:1;mem:256"))
        .await
        .unwrap();

    // A second task embeds a diverging spec under the same executor id.
    let mut diverging = executor_info("e1");
    diverging.uri = "/somewhere/else".to_string();
    h.agent
        .deliver(
            MASTER,
            Message::RunTask {
                framework: framework_info(),
                framework_id: FrameworkId::new("f1"),
                scheduler: SCHEDULER.to_string(),
                task: TaskDescription {
                    task_id: TaskId::new("t2"),
                    name: "t2".to_string(),
                    agent_id: AgentId::new("agent-1"),
                    resources: "cpus:1".parse().unwrap(),
                    data: Vec::new(),
                    executor: Some(diverging),
                },
            },
        )
        .await
        .unwrap();

    // Still one executor, one launch, original spec intact.
    let framework = h.agent.framework(&FrameworkId::new("f1")).unwrap();
    assert_eq!(framework.executors.len(), 1);
    let executor = framework.executors.get(&ExecutorId::new("e1")).unwrap();
    assert_eq!(executor.info.uri, "/usr/local/bin/executor");
    assert_eq!(executor.queued_tasks.len(), 2);
    assert_eq!(
        h.isolation
            .calls()
            .iter()
            .filter(|call| matches!(call, IsolationCall::Launch { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_framework_message_forwarding_and_counters() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(MASTER, run_task("t1", "cpus:1;mem:256"))
        .await
        .unwrap();

    // Executor not yet registered: a scheduler message is dropped.
    h.agent
        .deliver(
            MASTER,
            Message::FrameworkMessage {
                agent_id: AgentId::new("agent-1"),
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
                data: b"hello".to_vec(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.agent.stats().invalid_framework_messages, 1);

    h.agent
        .deliver(
            EXECUTOR,
            Message::RegisterExecutor {
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
            },
        )
        .await
        .unwrap();
    h.sender.take();

    // Scheduler -> executor, relayed through the master.
    h.agent
        .deliver(
            MASTER,
            Message::FrameworkMessage {
                agent_id: AgentId::new("agent-1"),
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
                data: b"hello".to_vec(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.sender.sent_to(EXECUTOR).len(), 1);

    // Executor -> scheduler.
    h.agent
        .deliver(
            EXECUTOR,
            Message::FrameworkMessage {
                agent_id: AgentId::new("agent-1"),
                framework_id: FrameworkId::new("f1"),
                executor_id: ExecutorId::new("e1"),
                data: b"world".to_vec(),
            },
        )
        .await
        .unwrap();
    assert_eq!(h.sender.sent_to(SCHEDULER).len(), 1);

    assert_eq!(h.agent.stats().valid_framework_messages, 2);
    assert_eq!(h.agent.stats().invalid_framework_messages, 1);
}

#[tokio::test]
async fn test_relaunch_gets_a_fresh_work_directory() {
    let mut h = harness();
    register(&mut h).await;

    h.agent
        .deliver(MASTER, run_task("t1", "cpus:1;mem:256"))
        .await
        .unwrap();
    h.agent
        .handle_event(AgentEvent::ExecutorExited {
            framework_id: FrameworkId::new("f1"),
            executor_id: ExecutorId::new("e1"),
            status: 1,
        })
        .await
        .unwrap();

    // The same framework/executor pair comes back.
    h.agent
        .deliver(MASTER, run_task("t2", "cpus:1;mem:256"))
        .await
        .unwrap();

    let directories: Vec<_> = h
        .isolation
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            IsolationCall::Launch { directory, .. } => Some(directory),
            _ => None,
        })
        .collect();
    assert_eq!(directories.len(), 2);
    assert!(directories[0].ends_with("fw-f1-e1/0"));
    assert!(directories[1].ends_with("fw-f1-e1/1"));
}
