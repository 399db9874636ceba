//! Isolation backend: the subsystem that physically launches, constrains,
//! and kills executor processes.
//!
//! The agent only talks to this interface; what happens behind it (plain
//! processes here, containers elsewhere) is not its concern. A mock
//! implementation is provided for tests and local development.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use anyhow::{Context, Result};
use armada_id::{ExecutorId, FrameworkId};
use armada_resources::Resources;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::protocol::{ExecutorInfo, FrameworkInfo};

/// Pid value meaning "the backend manages the child's lifecycle; do not
/// register it with the reaper".
pub const UNMANAGED_PID: i32 = 0;

/// Outbound interface to the isolation subsystem.
#[async_trait]
pub trait IsolationBackend: Send + Sync {
    /// Called once at startup, before any executor is launched. `local` is
    /// set when the agent runs inside an all-in-one local cluster.
    async fn initialize(&self, agent_endpoint: &str, conf: &Config, local: bool) -> Result<()>;

    /// Launches an executor in `directory` and returns its pid, or
    /// [`UNMANAGED_PID`] when the backend tracks the child itself.
    async fn launch_executor(
        &self,
        framework_id: &FrameworkId,
        framework: &FrameworkInfo,
        executor: &ExecutorInfo,
        directory: &Path,
    ) -> Result<i32>;

    /// Advisory update of the resource cap for an executor, called whenever
    /// its accounted task resources change.
    async fn resources_changed(
        &self,
        framework_id: &FrameworkId,
        framework: &FrameworkInfo,
        executor: &ExecutorInfo,
        resources: &Resources,
    );

    /// Requests termination; the actual exit flows back through the reaper.
    async fn kill_executor(
        &self,
        framework_id: &FrameworkId,
        framework: &FrameworkInfo,
        executor: &ExecutorInfo,
    );
}

/// Launches executors as plain child processes.
///
/// Children are spawned detached from the runtime's own reaping: the agent's
/// reaper harvests them via `waitpid(2)`, so this backend must not wait on
/// its children.
pub struct ProcessIsolation {
    switch_user: bool,
    frameworks_home: Option<PathBuf>,
    hadoop_home: Option<String>,
    endpoint: Mutex<String>,
    children: Mutex<HashMap<(FrameworkId, ExecutorId), i32>>,
}

impl ProcessIsolation {
    pub fn new(conf: &Config) -> Self {
        Self {
            switch_user: conf.switch_user,
            frameworks_home: conf.frameworks_home.clone(),
            hadoop_home: conf.hadoop_home.clone(),
            endpoint: Mutex::new(String::new()),
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the executor launch command, prepending `frameworks_home`
    /// for relative paths.
    fn resolve_command(&self, executor: &ExecutorInfo) -> String {
        let uri = executor.uri.trim();
        if !uri.starts_with('/') {
            if let Some(home) = &self.frameworks_home {
                return home.join(uri).display().to_string();
            }
        }
        uri.to_string()
    }
}

#[async_trait]
impl IsolationBackend for ProcessIsolation {
    async fn initialize(&self, agent_endpoint: &str, _conf: &Config, local: bool) -> Result<()> {
        *self.endpoint.lock().expect("endpoint lock") = agent_endpoint.to_string();
        info!(endpoint = %agent_endpoint, local, "Process isolation initialized");
        Ok(())
    }

    async fn launch_executor(
        &self,
        framework_id: &FrameworkId,
        framework: &FrameworkInfo,
        executor: &ExecutorInfo,
        directory: &Path,
    ) -> Result<i32> {
        let command_line = self.resolve_command(executor);
        let endpoint = self.endpoint.lock().expect("endpoint lock").clone();

        info!(
            framework_id = %framework_id,
            executor_id = %executor.executor_id,
            command = %command_line,
            directory = %directory.display(),
            "Launching executor"
        );

        // `su -c` when running tasks as the submitting user, plain `sh -c`
        // otherwise.
        let mut command = if self.switch_user && !framework.user.is_empty() {
            let mut c = Command::new("su");
            c.arg(&framework.user).arg("-c").arg(&command_line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&command_line);
            c
        };

        command
            .current_dir(directory)
            .env("ARMADA_AGENT_ENDPOINT", &endpoint)
            .env("ARMADA_FRAMEWORK_ID", framework_id.as_str())
            .env("ARMADA_EXECUTOR_ID", executor.executor_id.as_str())
            .env("ARMADA_WORK_DIR", directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(hadoop_home) = &self.hadoop_home {
            command.env("HADOOP_HOME", hadoop_home);
        }

        let child = command.spawn().with_context(|| {
            format!(
                "spawning executor {} of framework {}",
                executor.executor_id, framework_id
            )
        })?;

        let pid = child.id() as i32;
        // The Child handle is dropped without waiting; the reaper owns
        // harvesting.
        drop(child);

        self.children
            .lock()
            .expect("children lock")
            .insert((framework_id.clone(), executor.executor_id.clone()), pid);

        Ok(pid)
    }

    async fn resources_changed(
        &self,
        framework_id: &FrameworkId,
        _framework: &FrameworkInfo,
        executor: &ExecutorInfo,
        resources: &Resources,
    ) {
        // Plain processes carry no enforceable cap; the update is advisory.
        debug!(
            framework_id = %framework_id,
            executor_id = %executor.executor_id,
            resources = %resources,
            "Executor resource cap updated"
        );
    }

    async fn kill_executor(
        &self,
        framework_id: &FrameworkId,
        _framework: &FrameworkInfo,
        executor: &ExecutorInfo,
    ) {
        let pid = self
            .children
            .lock()
            .expect("children lock")
            .remove(&(framework_id.clone(), executor.executor_id.clone()));

        match pid {
            Some(pid) => {
                info!(
                    framework_id = %framework_id,
                    executor_id = %executor.executor_id,
                    pid,
                    "Killing executor"
                );
                let rc = unsafe { libc::kill(pid, libc::SIGKILL) };
                if rc != 0 {
                    warn!(pid, "kill(2) failed; process may already be gone");
                }
            }
            None => warn!(
                framework_id = %framework_id,
                executor_id = %executor.executor_id,
                "Asked to kill unknown executor"
            ),
        }
    }
}

/// Everything the agent asked of the isolation backend, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum IsolationCall {
    Launch {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        directory: PathBuf,
    },
    ResourcesChanged {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
        resources: Resources,
    },
    Kill {
        framework_id: FrameworkId,
        executor_id: ExecutorId,
    },
}

/// Mock backend recording every call; launches return a configurable pid.
pub struct MockIsolation {
    pid: i32,
    calls: Mutex<Vec<IsolationCall>>,
}

impl MockIsolation {
    pub fn new() -> Self {
        Self::with_pid(4242)
    }

    /// A mock whose launches return `pid`. Use [`UNMANAGED_PID`] to model a
    /// backend that manages its own children.
    pub fn with_pid(pid: i32) -> Self {
        Self {
            pid,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<IsolationCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// The resource vectors of all `resources_changed` calls, in order.
    pub fn resource_updates(&self) -> Vec<Resources> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                IsolationCall::ResourcesChanged { resources, .. } => Some(resources),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: IsolationCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl Default for MockIsolation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IsolationBackend for MockIsolation {
    async fn initialize(&self, _agent_endpoint: &str, _conf: &Config, _local: bool) -> Result<()> {
        Ok(())
    }

    async fn launch_executor(
        &self,
        framework_id: &FrameworkId,
        _framework: &FrameworkInfo,
        executor: &ExecutorInfo,
        directory: &Path,
    ) -> Result<i32> {
        self.record(IsolationCall::Launch {
            framework_id: framework_id.clone(),
            executor_id: executor.executor_id.clone(),
            directory: directory.to_path_buf(),
        });
        Ok(self.pid)
    }

    async fn resources_changed(
        &self,
        framework_id: &FrameworkId,
        _framework: &FrameworkInfo,
        executor: &ExecutorInfo,
        resources: &Resources,
    ) {
        self.record(IsolationCall::ResourcesChanged {
            framework_id: framework_id.clone(),
            executor_id: executor.executor_id.clone(),
            resources: resources.clone(),
        });
    }

    async fn kill_executor(
        &self,
        framework_id: &FrameworkId,
        _framework: &FrameworkInfo,
        executor: &ExecutorInfo,
    ) {
        self.record(IsolationCall::Kill {
            framework_id: framework_id.clone(),
            executor_id: executor.executor_id.clone(),
        });
    }
}
