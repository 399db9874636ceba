//! Armada Node Agent Library
//!
//! The agent runs on every node of an armada cluster. The master assigns it
//! tasks grouped under executors; the agent launches executor processes,
//! forwards tasks to them, relays their status updates back to the master
//! with at-least-once delivery, and survives master failover by
//! re-registering with whatever master the detector announces next.
//!
//! ## Architecture
//!
//! Three cooperative actors, each single-threaded:
//!
//! ```text
//! detector ──▶ Agent ◀──▶ master / executors (HTTP envelopes)
//!               │ ▲
//!         watch │ │ executor_exited
//!               ▼ │
//!             Reaper ──▶ waitpid(-1, WNOHANG)
//! ```
//!
//! All registry state lives inside the Agent actor; the reaper and the
//! isolation backend only ever hold `(framework_id, executor_id)` pairs.
//!
//! ## Modules
//!
//! - `agent`: the agent actor, registry ownership, protocol state machines
//! - `reaper`: child-process harvesting
//! - `isolation`: the outbound interface that launches and kills executors
//! - `updates`: the at-least-once status-update retry structure
//! - `http`: envelope intake and read-only introspection
//! - `detector`: master discovery

pub mod actors;
pub mod agent;
pub mod config;
pub mod detector;
pub mod http;
pub mod isolation;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod remote;
pub mod updates;

// Re-export commonly used types
pub use agent::{Agent, AgentEvent, Overview, RegistrationState, STATUS_UPDATE_RETRY_INTERVAL};
pub use isolation::{IsolationBackend, IsolationCall, MockIsolation, ProcessIsolation};
pub use remote::{HttpSender, MessageSender, RecordingSender};
