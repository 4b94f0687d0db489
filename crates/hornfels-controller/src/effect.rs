//! Effects produced by routing and dispatch.
//!
//! The router and dispatcher are pure with respect to the outside world:
//! they mutate the [`Controller`](crate::Controller) value and append
//! [`Effect`]s to an [`Output`]. The runtime executes the effects:
//!
//! 1. IPC and cluster sends go out over the respective transports
//! 2. Attribute and executor effects call into the owning daemons
//! 3. `Exit` terminates the process with the carried code
//!
//! This keeps every routing decision deterministic and directly assertable
//! in tests: same controller state, same message, same effects.

use serde_json::Value;

use hornfels_types::ExitCode;
use hornfels_wire::{Envelope, SubsystemCode};

use crate::queue::FsaEvent;

// ============================================================================
// Effects
// ============================================================================

/// A side effect for the runtime to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Deliver a message to a registered IPC client as a server event.
    SendIpc {
        /// Client id the message goes to.
        client: String,
        /// The message.
        msg: Envelope,
    },

    /// Send a message over the cluster transport.
    SendCluster {
        /// Destination node name; `None` broadcasts.
        peer: Option<String>,
        /// Destination subsystem code for code-addressed transports.
        code: SubsystemCode,
        /// The message.
        msg: Envelope,
        /// Whether ordered delivery is required.
        ordered: bool,
    },

    /// Hand a message to the in-process transition engine.
    TeInject {
        /// The message.
        msg: Envelope,
    },

    /// Invoke the local executor with a synthesized FSA event.
    LrmInvoke {
        /// The event carrying the executor-bound message.
        event: FsaEvent,
    },

    /// Forward a message through a proxy session.
    ProxyForward {
        /// Proxy session id.
        session: String,
        /// The message.
        msg: Envelope,
    },

    /// Drop an IPC client that failed authorization.
    DisconnectClient {
        /// Client id.
        client: String,
    },

    /// Write a node attribute through the attribute daemon.
    UpdateAttr {
        /// Target node.
        node: String,
        /// Attribute name.
        name: String,
        /// Attribute value.
        value: String,
        /// Whether the target is a remote node.
        is_remote: bool,
    },

    /// Clear failure attributes for a resource through the attribute daemon.
    ClearFailures {
        /// Target node.
        node: String,
        /// Resource id.
        resource: String,
        /// Operation name, if the clear is operation-scoped.
        operation: Option<String>,
        /// Operation interval, if the clear is interval-scoped.
        interval_ms: Option<u64>,
        /// Whether the target is a remote node.
        is_remote: bool,
    },

    /// Clear the executor's record of a resource's last failure.
    ClearLastFailure {
        /// Resource id.
        resource: String,
        /// Target node.
        node: String,
        /// Operation name, if scoped.
        operation: Option<String>,
        /// Operation interval, if scoped.
        interval_ms: Option<u64>,
    },

    /// Stop the timer guarding the outstanding scheduler calculation.
    StopSchedulerTimer,

    /// Re-evaluate the in-flight transition graph.
    TriggerGraph,

    /// Record a peer's updated message-rate limit.
    UpdateThrottle {
        /// The node the limit applies to.
        node: Option<String>,
        /// The raw throttle payload.
        payload: Option<Value>,
    },

    /// Apply a maintenance-mode update for remote nodes.
    MaintenanceNodes {
        /// The raw maintenance payload.
        payload: Option<Value>,
    },

    /// Begin an orderly local shutdown, as if SIGTERM had arrived.
    RequestShutdown,

    /// Terminate the process with the given code.
    Exit(ExitCode),
}

// ============================================================================
// Output
// ============================================================================

/// Effects accumulated while processing one inbound message or event.
///
/// The caller (the event loop) is responsible for executing the effects in
/// order after the handler returns.
#[derive(Debug, Default, PartialEq)]
pub struct Output {
    /// Effects to execute, in emission order.
    pub effects: Vec<Effect>,
}

impl Output {
    /// Creates an empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an effect.
    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Returns true if no effects were produced.
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Merges another output into this one, preserving order.
    pub fn merge(&mut self, other: Output) {
        self.effects.extend(other.effects);
    }
}
