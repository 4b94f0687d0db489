//! IPC client registry and the hello handshake.
//!
//! A local IPC client's first message must be a `hello` carrying its name
//! and protocol version. Until that handshake passes, nothing the client
//! sends reaches the dispatcher; a malformed hello disconnects it.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use hornfels_wire::{Envelope, Task};

use crate::effect::{Effect, Output};
use crate::state::Controller;

// ============================================================================
// Client Registry
// ============================================================================

/// A connected local IPC client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpcClient {
    /// Connection id, assigned at accept time.
    pub id: String,
    /// Client-reported name, recorded by the hello handshake.
    pub name: Option<String>,
}

/// Registry of local IPC clients and proxy sessions.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, IpcClient>,
    proxy_sessions: HashSet<String>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly connected client.
    pub fn register(&mut self, id: &str) {
        self.clients.insert(
            id.to_string(),
            IpcClient {
                id: id.to_string(),
                name: None,
            },
        );
    }

    /// Removes a client.
    pub fn unregister(&mut self, id: &str) {
        self.clients.remove(id);
    }

    /// Looks up a client by connection id.
    pub fn get(&self, id: &str) -> Option<&IpcClient> {
        self.clients.get(id)
    }

    /// Mutable lookup by connection id.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut IpcClient> {
        self.clients.get_mut(id)
    }

    /// Records a proxy session id.
    pub fn add_proxy_session(&mut self, session: &str) {
        self.proxy_sessions.insert(session.to_string());
    }

    /// Returns whether `session` names a known proxy session.
    pub fn is_proxy_session(&self, session: &str) -> bool {
        self.proxy_sessions.contains(session)
    }
}

// ============================================================================
// Hello Handshake
// ============================================================================

struct HelloFields {
    client_name: String,
}

/// Extracts and validates the hello payload.
///
/// All three fields must be present and non-empty, and both version fields
/// must parse as non-negative integers.
fn parse_hello(msg: &Envelope) -> Option<HelloFields> {
    let Some(client_name) = msg.payload_str("client_name").filter(|s| !s.is_empty()) else {
        warn!("hello message was not valid (client_name not found)");
        return None;
    };
    let Some(major) = msg.payload_str("major_version").filter(|s| !s.is_empty()) else {
        warn!("hello message was not valid (major_version not found)");
        return None;
    };
    let Some(minor) = msg.payload_str("minor_version").filter(|s| !s.is_empty()) else {
        warn!("hello message was not valid (minor_version not found)");
        return None;
    };

    if major.parse::<u32>().is_err() || minor.parse::<u32>().is_err() {
        warn!(major, minor, "client version is not acceptable");
        return None;
    }

    trace!(client = client_name, "hello message ok");
    Some(HelloFields {
        client_name: client_name.to_string(),
    })
}

impl Controller {
    /// Gates a local client message on the hello handshake.
    ///
    /// Returns `true` if the message may proceed to the router. A `hello`
    /// never proceeds: a valid one records the client's name and arms the
    /// FSA trigger, an invalid one disconnects the client.
    pub fn authorize(
        &mut self,
        msg: &Envelope,
        client_id: Option<&str>,
        proxy_session: Option<&str>,
        out: &mut Output,
    ) -> bool {
        if client_id.is_none() && proxy_session.is_none() {
            warn!(reference = %msg.reference, "message not authorized");
            return false;
        }

        if msg.task != Some(Task::Hello) {
            return true;
        }

        match parse_hello(msg) {
            Some(hello) => {
                if let Some(id) = client_id
                    && let Some(client) = self.clients.get_mut(id)
                {
                    debug!(client = %hello.client_name, "accepted client");
                    client.name = Some(hello.client_name);
                }
                self.queue.trigger.arm();
            }
            None => {
                warn!("rejected client logon request");
                if let Some(id) = client_id {
                    out.push(Effect::DisconnectClient {
                        client: id.to_string(),
                    });
                }
            }
        }

        // Hello messages are never processed further.
        false
    }
}
