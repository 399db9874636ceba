//! The reaper harvests exited executor processes and tells the agent.
//!
//! Executors are spawned without anything waiting on them, so they turn into
//! zombies when they exit. The reaper calls `waitpid(-1, WNOHANG)` on a 1 s
//! cadence, collects whatever has exited, and dispatches `ExecutorExited`
//! for pids the agent asked it to watch.
//!
//! A pid can exit before the agent's `Watch` arrives (launch and exit race
//! on the same tick). The exit status is buffered so a late `Watch` still
//! observes it, and every pid is dispatched at most once: both paths drop
//! the record as they fire.
//!
//! The reaper's death is fatal to the agent; the bootstrap exits when this
//! actor's join handle resolves.

use std::collections::HashMap;

use armada_id::{ExecutorId, FrameworkId};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::actors::{Actor, ActorError, ActorHandle};
use crate::agent::AgentEvent;

/// Messages handled by the reaper.
#[derive(Debug)]
pub enum ReaperEvent {
    /// Register interest in an executor's pid.
    Watch {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        pid: i32,
    },

    /// Periodic non-blocking wait for exited children.
    Harvest,
}

pub struct Reaper {
    agent: ActorHandle<AgentEvent>,

    /// Watched pids and the executor each belongs to.
    watching: HashMap<i32, (FrameworkId, ExecutorId)>,

    /// Exit statuses harvested before any watch arrived.
    exited: HashMap<i32, i32>,
}

impl Reaper {
    pub fn new(agent: ActorHandle<AgentEvent>) -> Self {
        Self {
            agent,
            watching: HashMap::new(),
            exited: HashMap::new(),
        }
    }

    async fn watch(&mut self, framework_id: FrameworkId, executor_id: ExecutorId, pid: i32) {
        if let Some(status) = self.exited.remove(&pid) {
            // The child beat the watch request; report it right away.
            info!(
                pid,
                framework_id = %framework_id,
                executor_id = %executor_id,
                "Watched process had already exited"
            );
            self.dispatch_exit(framework_id, executor_id, status).await;
        } else {
            info!(pid, executor_id = %executor_id, "Watching process");
            self.watching.insert(pid, (framework_id, executor_id));
        }
    }

    async fn harvest(&mut self) {
        loop {
            let mut status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if pid <= 0 {
                break;
            }

            info!(pid, status, "Reaped exited process");

            match self.watching.remove(&pid) {
                Some((framework_id, executor_id)) => {
                    self.dispatch_exit(framework_id, executor_id, status).await;
                }
                None => {
                    // Hold on to the status until a watch arrives.
                    self.exited.insert(pid, status);
                }
            }
        }
    }

    async fn dispatch_exit(
        &self,
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        status: i32,
    ) {
        let event = AgentEvent::ExecutorExited {
            framework_id: framework_id.clone(),
            executor_id: executor_id.clone(),
            status,
        };

        if self.agent.send(event).await.is_err() {
            warn!(
                framework_id = %framework_id,
                executor_id = %executor_id,
                "Agent gone; dropping executor exit"
            );
        }
    }
}

#[async_trait]
impl Actor for Reaper {
    type Message = ReaperEvent;

    fn name(&self) -> &str {
        "reaper"
    }

    async fn handle(&mut self, msg: ReaperEvent) -> Result<bool, ActorError> {
        match msg {
            ReaperEvent::Watch {
                framework_id,
                executor_id,
                pid,
            } => self.watch(framework_id, executor_id, pid).await,
            ReaperEvent::Harvest => self.harvest().await,
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors;
    use tokio::sync::mpsc;

    fn agent_mailbox() -> (ActorHandle<AgentEvent>, mpsc::Receiver<AgentEvent>) {
        actors::mailbox("agent", 16)
    }

    #[tokio::test]
    async fn test_watch_after_exit_dispatches_immediately() {
        let (handle, mut rx) = agent_mailbox();
        let mut reaper = Reaper::new(handle);

        // Simulate a harvest that beat the watch call.
        reaper.exited.insert(4242, 0);

        reaper
            .watch(FrameworkId::new("f1"), ExecutorId::new("e1"), 4242)
            .await;

        match rx.try_recv().unwrap() {
            AgentEvent::ExecutorExited {
                framework_id,
                executor_id,
                status,
            } => {
                assert_eq!(framework_id, FrameworkId::new("f1"));
                assert_eq!(executor_id, ExecutorId::new("e1"));
                assert_eq!(status, 0);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // The buffered status is consumed; a second watch must not re-fire.
        reaper
            .watch(FrameworkId::new("f1"), ExecutorId::new("e1"), 4242)
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_real_child_is_harvested() {
        let (handle, mut rx) = agent_mailbox();
        let mut reaper = Reaper::new(handle);

        let child = std::process::Command::new("true")
            .spawn()
            .expect("spawning child");
        let pid = child.id() as i32;
        drop(child);

        reaper
            .watch(FrameworkId::new("f1"), ExecutorId::new("e1"), pid)
            .await;

        // Harvest until the exit shows up (the child needs a moment to die).
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            reaper.harvest().await;
            match rx.try_recv() {
                Ok(AgentEvent::ExecutorExited { status, .. }) => {
                    assert_eq!(status & 0x7f, 0, "child should exit cleanly");
                    break;
                }
                _ if std::time::Instant::now() > deadline => {
                    panic!("child exit never observed");
                }
                _ => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }

        // Watched mapping is gone; further harvests stay quiet.
        reaper.harvest().await;
        assert!(rx.try_recv().is_err());
        assert!(reaper.watching.is_empty());
    }
}
