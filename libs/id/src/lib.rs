//! # armada-id
//!
//! Typed identifiers for the armada cluster manager.
//!
//! ## Design Principles
//!
//! - IDs are opaque byte strings assigned by the master; the agent never
//!   generates them
//! - IDs are typed to prevent mixing different resource kinds (a `TaskId`
//!   cannot be passed where an `ExecutorId` is expected)
//! - IDs have a canonical string representation with strict parsing and
//!   roundtrip serialization (parse → format → parse)
//! - IDs are `Ord` so they can key ordered containers, giving deterministic
//!   iteration wherever the protocol allows the agent to pick an order

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
