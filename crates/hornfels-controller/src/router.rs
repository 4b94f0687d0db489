//! The message router.
//!
//! Given an inbound message, decide whether to silently drop it, relay it
//! to another local subsystem over IPC, relay it to a cluster peer, or hand
//! it to the request dispatcher for local processing.
//!
//! Routing depends only on the envelope, our node name, and our role; for
//! a fixed controller state the same message always produces the same
//! effects.

use tracing::{debug, error, trace, warn};

use hornfels_wire::{Envelope, Subsystem, SubsystemCode, Task};

use crate::config::TransportKind;
use crate::effect::{Effect, Output};
use crate::queue::{ActionSet, Cause, FsaEvent, FsaInput, Payload, RaisedPayload};
use crate::state::Controller;

// ============================================================================
// Addressee Classification
// ============================================================================

/// Where a message says it wants to go, as routing sees it.
///
/// Computed once from `sys_to`; transient client ids and subsystems with no
/// special routing land in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Addressee {
    Dc,
    DcCib,
    TransitionEngine,
    Cib,
    Controller,
    Other,
}

impl Addressee {
    pub(crate) fn classify(sys_to: &Subsystem) -> Self {
        match sys_to {
            Subsystem::Dc => Addressee::Dc,
            Subsystem::DcCib => Addressee::DcCib,
            Subsystem::TransitionEngine => Addressee::TransitionEngine,
            Subsystem::Cib => Addressee::Cib,
            Subsystem::Controller => Addressee::Controller,
            _ => Addressee::Other,
        }
    }
}

impl Controller {
    /// Destination code for a cluster send.
    ///
    /// Name-addressed transports carry the subsystem in the envelope and
    /// get the controller's code; code-addressed transports get the mapped
    /// code, with unmapped subsystems substituted by the controller's.
    fn transport_code(&self, sys_to: &Subsystem) -> SubsystemCode {
        match self.config.transport {
            TransportKind::Tagged => SubsystemCode::for_transport(sys_to),
            TransportKind::Named => SubsystemCode::Controller,
        }
    }

    // ========================================================================
    // Entry Points
    // ========================================================================

    /// Routes a message pulled back off the queue (`router` input).
    pub fn route_queued(&mut self, event: &FsaEvent, out: &mut Output) {
        self.route_message(event.cause, event.message(), out);
    }

    /// Routes one inbound message to its destination.
    ///
    /// Relay is tried first; if the message is ours to process, the
    /// dispatcher classifies it and the resulting input is queued: a small
    /// set of inputs is appended directly, everything else is deferred to
    /// the next engine tick.
    pub fn route_message(&mut self, cause: Cause, msg: &Envelope, out: &mut Output) {
        if !matches!(cause, Cause::IpcMessage | Cause::HaMessage) {
            warn!(cause = %cause, "refusing to route message with non-message cause");
            return;
        }

        if self.relay_message(msg, cause == Cause::IpcMessage, out) {
            return;
        }

        let (result, msg) = self.handle_message(msg, cause, out);

        match result {
            FsaInput::Null
            | FsaInput::CibOp
            | FsaInput::Router
            | FsaInput::NodeJoin
            | FsaInput::JoinRequest
            | FsaInput::JoinResult => {
                if result != FsaInput::Null {
                    self.queue.raise(
                        cause,
                        result,
                        RaisedPayload::Message(msg.as_ref()),
                        ActionSet::NOTHING,
                        false,
                        "route_message",
                    );
                }
            }
            deferred => {
                self.queue.raise_later(
                    cause,
                    deferred,
                    RaisedPayload::Message(msg.as_ref()),
                    "route_message",
                );
            }
        }
    }

    // ========================================================================
    // Relay
    // ========================================================================

    /// Disposes of a message by relay, or reports that local processing
    /// must continue.
    ///
    /// Returns `true` when the message has been fully dealt with (relayed,
    /// dropped, or swallowed); `false` hands it to the dispatcher.
    pub(crate) fn relay_message(
        &mut self,
        msg: &Envelope,
        originated_locally: bool,
        out: &mut Output,
    ) -> bool {
        trace!(reference = %msg.reference, "routing message");

        if msg.task == Some(Task::Hello) {
            // Handshakes are consumed by authorization, never routed.
            return true;
        }

        let Some(sys_to) = msg.sys_to.clone() else {
            error!("bad message destination: no subsystem");
            warn!(?msg, "bad message");
            return true;
        };

        let addressee = Addressee::classify(&sys_to);
        let host_to = msg.host_to.as_deref().filter(|h| !h.is_empty());

        let is_local = match host_to {
            None => match addressee {
                // The DC and the transition engine are network-wide roles.
                Addressee::Dc | Addressee::TransitionEngine => false,
                Addressee::Controller => {
                    if msg.task == Some(Task::NodeInfo) {
                        // Node-info requests leave the host blank because
                        // the caller is asking who the local node is.
                        true
                    } else {
                        !originated_locally
                    }
                }
                _ => true,
            },
            Some(host) => host == self.our_uname(),
        };

        match addressee {
            Addressee::Dc | Addressee::DcCib | Addressee::TransitionEngine => {
                if self.am_i_dc() && addressee == Addressee::TransitionEngine {
                    trace!("router result: local relay");
                    self.send_via_ipc(msg, &sys_to, out);
                    true
                } else if self.am_i_dc() {
                    trace!("router result: DC processing");
                    false
                } else if originated_locally
                    && !matches!(
                        msg.sys_from,
                        Some(Subsystem::Scheduler | Subsystem::TransitionEngine)
                    )
                {
                    // If we are no longer the DC, scheduler and transition
                    // engine output is stale and must not reach the real DC.
                    trace!("router result: external relay to DC");
                    if let Some(host) = host_to {
                        self.peers.cluster_peer(host);
                    }
                    out.push(Effect::SendCluster {
                        peer: host_to.map(ToString::to_string),
                        code: self.transport_code(&sys_to),
                        msg: msg.clone(),
                        ordered: true,
                    });
                    true
                } else {
                    trace!("router result: discard, not DC");
                    true
                }
            }
            Addressee::Controller | Addressee::Cib if is_local => {
                trace!("router result: controller processing");
                false
            }
            _ if is_local => {
                trace!("router result: local relay");
                self.send_via_ipc(msg, &sys_to, out);
                true
            }
            _ => {
                let peer = match host_to {
                    Some(host) => {
                        if self.peers.find(0, Some(host)).is_none() {
                            error!(node = %host, "cannot route message to unknown node");
                            return true;
                        }
                        Some(host.to_string())
                    }
                    None => None,
                };
                trace!("router result: external relay");
                out.push(Effect::SendCluster {
                    peer,
                    code: self.transport_code(&sys_to),
                    msg: msg.clone(),
                    ordered: true,
                });
                true
            }
        }
    }

    // ========================================================================
    // Outbound IPC
    // ========================================================================

    /// Delivers a message to a local subsystem.
    ///
    /// The originating host is stamped if the sender left it blank. The
    /// transition engine and the executor are in-process: the former takes
    /// the message directly, the latter through a synthesized FSA event.
    pub(crate) fn send_via_ipc(
        &mut self,
        msg: &Envelope,
        sys: &Subsystem,
        out: &mut Output,
    ) -> bool {
        let mut msg = msg.clone();
        if msg.host_from.is_none() {
            msg.host_from = Some(self.our_uname().to_string());
        }

        if self.clients.get(sys.as_str()).is_some() {
            out.push(Effect::SendIpc {
                client: sys.as_str().to_string(),
                msg,
            });
            return true;
        }

        match sys {
            Subsystem::TransitionEngine => {
                out.push(Effect::TeInject { msg });
                true
            }
            Subsystem::Lrmd => {
                let event = FsaEvent {
                    id: 0,
                    cause: Cause::IpcMessage,
                    input: FsaInput::Message,
                    actions: ActionSet::NOTHING,
                    origin: "send_via_ipc",
                    payload: Payload::Message(Box::new(msg)),
                };
                out.push(Effect::LrmInvoke { event });
                true
            }
            _ if self.clients.is_proxy_session(sys.as_str()) => {
                out.push(Effect::ProxyForward {
                    session: sys.as_str().to_string(),
                    msg,
                });
                true
            }
            _ => {
                debug!(subsystem = %sys, "unknown subsystem, discarding message");
                false
            }
        }
    }
}
