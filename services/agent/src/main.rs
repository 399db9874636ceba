//! armada-agent
//!
//! Per-node daemon of the armada cluster manager. Launches executor
//! processes on behalf of frameworks, forwards their tasks, and relays
//! status updates to the master with at-least-once delivery.

use std::ffi::CStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use armada_agent::actors;
use armada_agent::agent::{Agent, AgentEvent};
use armada_agent::config::Config;
use armada_agent::http::{router, HttpState};
use armada_agent::isolation::{IsolationBackend, ProcessIsolation};
use armada_agent::protocol::AgentInfo;
use armada_agent::reaper::{Reaper, ReaperEvent};
use armada_agent::remote::HttpSender;
use armada_agent::detector;

#[tokio::main]
async fn main() -> Result<()> {
    let conf = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(conf.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting armada agent");

    let hostname = hostname();
    let public_hostname = conf.public_dns.clone().unwrap_or_else(|| hostname.clone());
    let endpoint = format!("http://{}:{}", public_hostname, conf.listen_addr.port());

    let info = AgentInfo {
        hostname: hostname.clone(),
        public_hostname,
        resources: conf.resources.clone(),
        attributes: conf.attributes.clone(),
    };

    info!(
        hostname = %info.hostname,
        resources = %info.resources,
        endpoint = %endpoint,
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The agent and reaper hold each other's handles, so the agent's mailbox
    // is created first.
    let (agent_handle, agent_rx) = actors::mailbox::<AgentEvent>("agent", 1024);

    let reaper = Reaper::new(agent_handle.clone());
    let (reaper_handle, mut reaper_join) = actors::spawn(reaper, 256, shutdown_rx.clone());

    let isolation: Arc<dyn IsolationBackend> = Arc::new(ProcessIsolation::new(&conf));
    isolation
        .initialize(&endpoint, &conf, false)
        .await
        .context("initializing isolation backend")?;

    let sender = Arc::new(HttpSender::new(endpoint.clone()));

    let agent = Agent::new(
        conf.clone(),
        info,
        endpoint.clone(),
        Arc::clone(&isolation),
        sender,
        Some(reaper_handle.clone()),
    );
    let mut agent_join = actors::spawn_with(agent, agent_rx, shutdown_rx.clone());

    // 1 s timers: status-update retry on the agent, harvest on the reaper.
    spawn_timer(agent_handle.clone(), reaper_handle, shutdown_rx.clone());

    tokio::spawn(detector::run_detector_loop(
        conf.master_url.clone(),
        conf.master_discovery_url.clone(),
        agent_handle.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(conf.listen_addr)
        .await
        .with_context(|| format!("binding {}", conf.listen_addr))?;
    info!(addr = %conf.listen_addr, "HTTP endpoint listening");

    let app = router(HttpState::new(agent_handle.clone()));
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server failed");
        }
    });

    // The reaper's death is fatal: without it, executor exits go unnoticed.
    tokio::select! {
        result = &mut reaper_join => {
            error!(result = ?result, "Executor reaper died");
            anyhow::bail!("executor reaper died");
        }
        result = &mut agent_join => {
            match result {
                Ok(Ok(())) => info!("Agent stopped"),
                Ok(Err(e)) => {
                    error!(error = %e, "Agent failed");
                    anyhow::bail!("agent failed: {e}");
                }
                Err(e) => anyhow::bail!("agent task panicked: {e}"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; shutting down");
            // Shutdown removes every framework, cascading executor kills,
            // before the agent loop stops.
            let _ = agent_handle.send(AgentEvent::Shutdown).await;
            let _ = agent_join.await;
            let _ = shutdown_tx.send(true);
        }
    }

    server.abort();
    Ok(())
}

/// Drives both 1 s cadences until shutdown.
fn spawn_timer(
    agent: actors::ActorHandle<AgentEvent>,
    reaper: actors::ActorHandle<ReaperEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if agent.try_send(AgentEvent::Tick).is_err() {
                        break;
                    }
                    let _ = reaper.try_send(ReaperEvent::Harvest);
                }
            }
        }
    });
}

fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        if let Ok(name) = CStr::from_bytes_until_nul(&buf) {
            if let Ok(name) = name.to_str() {
                if !name.is_empty() {
                    return name.to_string();
                }
            }
        }
    }
    "localhost".to_string()
}
