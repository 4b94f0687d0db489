//! Message routing and FSA input core of the Hornfels cluster controller.
//!
//! The controller is the per-node component of the resource manager: it
//! participates in membership, defers to (or becomes) the Designated
//! Coordinator, and turns every inbound message into either a relay or an
//! ordered input for its finite-state automaton.
//!
//! # Architecture
//!
//! ```text
//! IPC / cluster transport
//!         │
//!         ▼
//!   route_message ──relay──► Effect::{SendIpc, SendCluster, ...}
//!         │
//!         ▼ (ours to process)
//!   handle_message ──┬──► FsaQueue::raise(input, payload)
//!                    └──► synchronous handler ──reply──► route_message
//! ```
//!
//! Everything runs on the single event-loop thread. Handlers mutate one
//! [`Controller`] value and append [`Effect`]s to an [`Output`]; the
//! runtime executes the effects after each dispatch. The queue wakes the
//! loop through its [`queue::Trigger`].
//!
//! # Key Types
//!
//! - [`Controller`]: all mutable controller state
//! - [`queue::FsaQueue`]: the ordered input queue and its registers
//! - [`queue::FsaEvent`]: one queued input with cause, actions, payload
//! - [`Effect`]/[`Output`]: side effects for the runtime to execute

pub mod cib;
pub mod config;
pub mod dispatch;
pub mod effect;
pub mod error;
pub mod handlers;
pub mod hello;
pub mod queue;
pub mod router;
pub mod state;

pub use cib::{CibClient, CibStatus};
pub use config::{ControllerConfig, TransportKind};
pub use effect::{Effect, Output};
pub use error::{Error, Result};
pub use hello::{ClientRegistry, IpcClient};
pub use queue::{ActionSet, Cause, FsaEvent, FsaInput, FsaQueue, LrmEvent, Payload, PayloadKind, RaisedPayload};
pub use state::{Controller, FsaState, InputRegister, TransitionStatus};

#[cfg(test)]
mod tests;
