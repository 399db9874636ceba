//! The agent's HTTP endpoint: envelope intake plus read-only introspection.
//!
//! Peers (master, executors, the detector) POST protocol envelopes to
//! `/api/v1/message`. Operators read `/info.json`, `/frameworks.json`,
//! `/tasks.json`, `/stats.json`, and `/vars`. Read routes round-trip a
//! snapshot request through the agent actor; this layer never touches the
//! registry directly.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::debug;

use crate::actors::ActorHandle;
use crate::agent::{AgentEvent, Overview};
use crate::protocol::Envelope;

#[derive(Clone)]
pub struct HttpState {
    agent: ActorHandle<AgentEvent>,
}

impl HttpState {
    pub fn new(agent: ActorHandle<AgentEvent>) -> Self {
        Self { agent }
    }

    async fn overview(&self) -> Result<Overview, StatusCode> {
        let (tx, rx) = oneshot::channel();
        self.agent
            .send(AgentEvent::Snapshot(tx))
            .await
            .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
        rx.await.map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/v1/message", post(deliver_message))
        .route("/info.json", get(info_json))
        .route("/frameworks.json", get(frameworks_json))
        .route("/tasks.json", get(tasks_json))
        .route("/stats.json", get(stats_json))
        .route("/vars", get(vars))
        .with_state(state)
}

async fn deliver_message(
    State(state): State<HttpState>,
    Json(envelope): Json<Envelope>,
) -> impl IntoResponse {
    debug!(from = %envelope.from, "Inbound envelope");

    let event = AgentEvent::Protocol {
        from: envelope.from,
        message: envelope.message,
    };

    match state.agent.send(event).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn info_json(State(state): State<HttpState>) -> Result<impl IntoResponse, StatusCode> {
    let overview = state.overview().await?;

    Ok(Json(json!({
        "build_date": option_env!("BUILD_DATE").unwrap_or("unknown"),
        "build_user": option_env!("USER").unwrap_or("unknown"),
        "start_time": overview.start_time.to_rfc3339(),
        "agent_id": overview.agent_id,
        "hostname": overview.hostname,
        "endpoint": overview.endpoint,
        "master": overview.master,
        "state": overview.state,
    })))
}

async fn frameworks_json(State(state): State<HttpState>) -> Result<impl IntoResponse, StatusCode> {
    let overview = state.overview().await?;
    Ok(Json(overview.frameworks))
}

async fn tasks_json(State(state): State<HttpState>) -> Result<impl IntoResponse, StatusCode> {
    let overview = state.overview().await?;
    Ok(Json(overview.tasks))
}

async fn stats_json(State(state): State<HttpState>) -> Result<impl IntoResponse, StatusCode> {
    let overview = state.overview().await?;

    Ok(Json(json!({
        "uptime": overview.uptime_secs,
        "total_frameworks": overview.frameworks.len(),
        "finished_tasks": overview.stats.finished_tasks,
        "killed_tasks": overview.stats.killed_tasks,
        "failed_tasks": overview.stats.failed_tasks,
        "lost_tasks": overview.stats.lost_tasks,
        "valid_status_updates": overview.stats.valid_status_updates,
        "invalid_status_updates": overview.stats.invalid_status_updates,
        "valid_framework_messages": overview.stats.valid_framework_messages,
        "invalid_framework_messages": overview.stats.invalid_framework_messages,
    })))
}

/// Line-oriented `key value` dump of statistics and configuration.
async fn vars(State(state): State<HttpState>) -> Result<impl IntoResponse, StatusCode> {
    let overview = state.overview().await?;

    let mut out = String::new();
    out.push_str(&format!(
        "build_date {}\n",
        option_env!("BUILD_DATE").unwrap_or("unknown")
    ));
    out.push_str(&format!(
        "build_user {}\n",
        option_env!("USER").unwrap_or("unknown")
    ));

    for (key, value) in &overview.vars {
        out.push_str(&format!("{} {}\n", key, value));
    }

    out.push_str(&format!("uptime {}\n", overview.uptime_secs));
    out.push_str(&format!("total_frameworks {}\n", overview.frameworks.len()));
    out.push_str(&format!("finished_tasks {}\n", overview.stats.finished_tasks));
    out.push_str(&format!("killed_tasks {}\n", overview.stats.killed_tasks));
    out.push_str(&format!("failed_tasks {}\n", overview.stats.failed_tasks));
    out.push_str(&format!("lost_tasks {}\n", overview.stats.lost_tasks));
    out.push_str(&format!(
        "valid_status_updates {}\n",
        overview.stats.valid_status_updates
    ));
    out.push_str(&format!(
        "invalid_status_updates {}\n",
        overview.stats.invalid_status_updates
    ));
    out.push_str(&format!(
        "valid_framework_messages {}\n",
        overview.stats.valid_framework_messages
    ));
    out.push_str(&format!(
        "invalid_framework_messages {}\n",
        overview.stats.invalid_framework_messages
    ));

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors;
    use crate::agent::AgentEvent;

    #[tokio::test]
    async fn test_message_intake_feeds_agent() {
        let (handle, mut rx) = actors::mailbox::<AgentEvent>("agent", 16);
        let state = HttpState::new(handle);

        let envelope = Envelope {
            from: "http://master:5050".to_string(),
            message: crate::protocol::Message::Ping,
        };

        let response = deliver_message(State(state), Json(envelope))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.try_recv().unwrap() {
            AgentEvent::Protocol { from, message } => {
                assert_eq!(from, "http://master:5050");
                assert_eq!(message, crate::protocol::Message::Ping);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_intake_rejected_when_agent_gone() {
        let (handle, rx) = actors::mailbox::<AgentEvent>("agent", 16);
        drop(rx);
        let state = HttpState::new(handle);

        let envelope = Envelope {
            from: "http://master:5050".to_string(),
            message: crate::protocol::Message::Ping,
        };

        let response = deliver_message(State(state), Json(envelope))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
