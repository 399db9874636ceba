//! Minimal actor plumbing for the agent's cooperative actors.
//!
//! The agent and the reaper are each single-threaded actors: a mailbox, a
//! loop, and exclusively-owned state. Actors communicate only by message
//! passing, which keeps the registry lock-free by construction.
//!
//! There is deliberately no restart supervision here. The reaper's death is
//! fatal to the agent, so the bootstrap watches join handles instead of
//! restarting children.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Behavior of a single actor.
///
/// Actors process messages one at a time and own mutable state that is not
/// shared with other actors.
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Send + 'static;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Handle a single message.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` to stop cleanly, or `Err`
    /// on failure. A [`ActorError::Fatal`] error stops the actor and is
    /// surfaced through its join handle.
    async fn handle(&mut self, msg: Self::Message) -> Result<bool, ActorError>;

    /// Called when the actor starts.
    async fn on_start(&mut self) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when the actor is about to stop.
    async fn on_stop(&mut self) {}
}

/// Errors surfaced by actors.
#[derive(Debug, Error)]
pub enum ActorError {
    /// A recoverable failure; the actor keeps running.
    #[error("transient error: {0}")]
    Transient(String),

    /// A failure the actor cannot continue past; the actor stops and its
    /// join handle resolves to this error.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// The target actor's mailbox is full.
    #[error("mailbox full")]
    MailboxFull,

    /// The target actor has stopped.
    #[error("actor stopped")]
    ActorStopped,
}

/// Handle for sending messages to an actor.
pub struct ActorHandle<M> {
    tx: mpsc::Sender<M>,
    name: &'static str,
}

// Manual impl: a handle is clonable regardless of the message type.
impl<M> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

impl<M> ActorHandle<M> {
    /// Send a message, waiting for mailbox space.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.send(msg).await.map_err(|_| ActorError::ActorStopped)
    }

    /// Send a message without waiting.
    pub fn try_send(&self, msg: M) -> Result<(), ActorError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ActorError::MailboxFull,
            mpsc::error::TrySendError::Closed(_) => ActorError::ActorStopped,
        })
    }

    /// The name of the actor behind this handle.
    pub fn name(&self) -> &str {
        self.name
    }
}

/// Creates a mailbox ahead of actor construction.
///
/// Used to break handle cycles: the agent holds the reaper's handle and the
/// reaper holds the agent's, so one mailbox must exist before either actor.
pub fn mailbox<M>(name: &'static str, capacity: usize) -> (ActorHandle<M>, mpsc::Receiver<M>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ActorHandle { tx, name }, rx)
}

/// Spawns an actor onto a fresh mailbox.
pub fn spawn<A: Actor>(
    actor: A,
    capacity: usize,
    shutdown: watch::Receiver<bool>,
) -> (ActorHandle<A::Message>, JoinHandle<Result<(), ActorError>>) {
    let (tx, rx) = mpsc::channel(capacity);
    let name = leak_name(actor.name());
    let handle = ActorHandle { tx, name };
    let join = spawn_with(actor, rx, shutdown);
    (handle, join)
}

/// Spawns an actor onto a mailbox created with [`mailbox`].
pub fn spawn_with<A: Actor>(
    actor: A,
    rx: mpsc::Receiver<A::Message>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<(), ActorError>> {
    tokio::spawn(run_actor_loop(actor, rx, shutdown))
}

async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ActorError> {
    let name = actor.name().to_string();

    actor.on_start().await.map_err(|e| {
        error!(actor = %name, error = %e, "Actor failed to start");
        e
    })?;

    debug!(actor = %name, "Actor started");

    // A dropped shutdown sender means "never shut down this way"; stop
    // polling the channel or the closed watch would starve the mailbox.
    let mut shutdown_open = true;

    let result = loop {
        tokio::select! {
            biased;

            changed = shutdown.changed(), if shutdown_open => {
                match changed {
                    Ok(()) if *shutdown.borrow() => {
                        info!(actor = %name, "Actor received shutdown signal");
                        break Ok(());
                    }
                    Ok(()) => {}
                    Err(_) => shutdown_open = false,
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor = %name, "Actor mailbox closed");
                    break Ok(());
                };

                match actor.handle(msg).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(actor = %name, "Actor requested stop");
                        break Ok(());
                    }
                    Err(ActorError::Fatal(reason)) => {
                        error!(actor = %name, reason = %reason, "Actor failed");
                        break Err(ActorError::Fatal(reason));
                    }
                    Err(e) => {
                        error!(actor = %name, error = %e, "Actor error; continuing");
                    }
                }
            }
        }
    };

    actor.on_stop().await;
    info!(actor = %name, "Actor stopped");
    result
}

fn leak_name(name: &str) -> &'static str {
    // Actor names are a handful of short static-ish strings per process.
    Box::leak(name.to_string().into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo {
        seen: Vec<u32>,
        fail_on: Option<u32>,
    }

    #[async_trait]
    impl Actor for Echo {
        type Message = u32;

        fn name(&self) -> &str {
            "echo"
        }

        async fn handle(&mut self, msg: u32) -> Result<bool, ActorError> {
            if self.fail_on == Some(msg) {
                return Err(ActorError::Fatal(format!("bad message {}", msg)));
            }
            self.seen.push(msg);
            Ok(msg != 0)
        }
    }

    #[tokio::test]
    async fn test_actor_processes_and_stops() {
        let (_tx, shutdown) = watch::channel(false);
        let (handle, join) = spawn(
            Echo {
                seen: Vec::new(),
                fail_on: None,
            },
            16,
            shutdown,
        );

        handle.send(1).await.unwrap();
        handle.send(2).await.unwrap();
        handle.send(0).await.unwrap();

        let result = join.await.unwrap();
        assert!(result.is_ok());
        assert!(handle.send(3).await.is_err());
    }

    #[tokio::test]
    async fn test_fatal_error_surfaces_in_join() {
        let (_tx, shutdown) = watch::channel(false);
        let (handle, join) = spawn(
            Echo {
                seen: Vec::new(),
                fail_on: Some(7),
            },
            16,
            shutdown,
        );

        handle.send(7).await.unwrap();

        let result = join.await.unwrap();
        assert!(matches!(result, Err(ActorError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_actor() {
        let (tx, shutdown) = watch::channel(false);
        let (_handle, join) = spawn(
            Echo {
                seen: Vec::new(),
                fail_on: None,
            },
            16,
            shutdown,
        );

        tx.send(true).unwrap();
        let result = join.await.unwrap();
        assert!(result.is_ok());
    }
}
