//! Master detection: tells the agent which master, if any, is leading.
//!
//! With a discovery URL configured, the current leader is polled every few
//! seconds and changes are injected into the agent as
//! `NewMasterDetected` / `NoMasterDetected`. With only a static master URL,
//! it is announced once and the loop ends. The agent trusts this source;
//! masters can additionally push `NewMasterDetected` through the normal
//! message endpoint during failover.

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::actors::ActorHandle;
use crate::agent::AgentEvent;
use crate::protocol::Message;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Sender name stamped on detector-originated envelopes.
const DETECTOR_ENDPOINT: &str = "detector";

#[derive(Debug, Deserialize)]
struct LeaderResponse {
    /// Base URL of the current leading master, absent during elections.
    #[serde(default)]
    leader: Option<String>,
}

/// Runs until the agent goes away (or immediately after a one-shot static
/// announcement).
pub async fn run_detector_loop(
    master_url: Option<String>,
    discovery_url: Option<String>,
    agent: ActorHandle<AgentEvent>,
) -> Result<()> {
    let Some(discovery_url) = discovery_url else {
        if let Some(master) = master_url {
            info!(master = %master, "Static master configured");
            announce(&agent, Message::NewMasterDetected { master }).await;
        } else {
            warn!("No master URL or discovery URL configured; agent will idle");
        }
        return Ok(());
    };

    info!(url = %discovery_url, "Polling for the leading master");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let mut last_leader: Option<Option<String>> = None;
    let mut consecutive_failures = 0u32;

    loop {
        match fetch_leader(&client, &discovery_url).await {
            Ok(leader) => {
                consecutive_failures = 0;

                if last_leader.as_ref() != Some(&leader) {
                    let message = match &leader {
                        Some(master) => {
                            info!(master = %master, "Leader changed");
                            Message::NewMasterDetected {
                                master: master.clone(),
                            }
                        }
                        None => {
                            info!("No leader elected");
                            Message::NoMasterDetected
                        }
                    };

                    if !announce(&agent, message).await {
                        return Ok(());
                    }
                    last_leader = Some(leader);
                }
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures <= 3 {
                    debug!(error = %e, consecutive_failures, "Leader poll failed");
                } else {
                    warn!(error = %e, consecutive_failures, "Leader poll failing repeatedly");
                }
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

async fn fetch_leader(client: &reqwest::Client, url: &str) -> Result<Option<String>> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("leader poll failed with status {}", response.status());
    }

    let body: LeaderResponse = response.json().await?;
    Ok(body.leader)
}

/// Returns false when the agent's mailbox is gone.
async fn announce(agent: &ActorHandle<AgentEvent>, message: Message) -> bool {
    agent
        .send(AgentEvent::Protocol {
            from: DETECTOR_ENDPOINT.to_string(),
            message,
        })
        .await
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors;

    #[tokio::test]
    async fn test_static_master_announced_once() {
        let (handle, mut rx) = actors::mailbox::<AgentEvent>("agent", 16);

        run_detector_loop(Some("http://master:5050".to_string()), None, handle)
            .await
            .unwrap();

        match rx.try_recv().unwrap() {
            AgentEvent::Protocol { message, .. } => {
                assert_eq!(
                    message,
                    Message::NewMasterDetected {
                        master: "http://master:5050".to_string()
                    }
                );
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_configuration_is_quiet() {
        let (handle, mut rx) = actors::mailbox::<AgentEvent>("agent", 16);

        run_detector_loop(None, None, handle).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_leader_response_tolerates_absence() {
        let body: LeaderResponse = serde_json::from_str("{}").unwrap();
        assert!(body.leader.is_none());

        let body: LeaderResponse =
            serde_json::from_str(r#"{"leader":"http://master:5050"}"#).unwrap();
        assert_eq!(body.leader.as_deref(), Some("http://master:5050"));
    }
}
