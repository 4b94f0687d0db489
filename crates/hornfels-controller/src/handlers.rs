//! Synchronous request handlers.
//!
//! These run inline when the dispatcher recognizes an operation it can
//! answer without involving the FSA: ping, node-info, failure-count
//! clearing, shutdown requests, remote-node state changes, and node-cache
//! eviction. Replies are built here and re-enter the router, which carries
//! them back to the caller.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use hornfels_membership::PeerState;
use hornfels_wire::{Envelope, Subsystem, SubsystemCode, Task};

use crate::effect::{Effect, Output};
use crate::queue::{Cause, FsaInput};
use crate::state::Controller;

/// Node attribute whose appearance asks the scheduler to stop a node.
pub const ATTR_SHUTDOWN: &str = "shutdown";

impl Controller {
    // ========================================================================
    // Ping
    // ========================================================================

    /// Answers a ping with our state.
    pub(crate) fn handle_ping(&mut self, msg: &Envelope, out: &mut Output) -> FsaInput {
        let state = self.fsa_state.to_string();
        info!(state = %state, "current ping state");

        let sys_from = msg
            .sys_to
            .as_ref()
            .map(|sys| sys.as_str().to_string())
            .unwrap_or_default();
        let reply = msg.reply(Some(json!({
            "sys_from": sys_from,
            "controller_state": state,
            "status": "ok",
        })));
        self.relay_message(&reply, true, out);

        FsaInput::Null
    }

    // ========================================================================
    // Node Info
    // ========================================================================

    /// Answers a node-info request.
    ///
    /// The caller may name a node by transport id and/or uname; with
    /// neither, the answer describes the local node, which is the usual
    /// reason for asking.
    pub(crate) fn handle_node_info_request(
        &mut self,
        msg: &Envelope,
        out: &mut Output,
    ) -> FsaInput {
        let mut payload = json!({
            "sys_from": Subsystem::Controller.as_str(),
            "have_quorum": self.has_quorum,
        });

        let id = u32::try_from(msg.payload_i64("id").unwrap_or(0).max(0)).unwrap_or(0);
        let requested_uname = msg.payload_str("uname").map(ToString::to_string);
        let uname = if id == 0 && requested_uname.is_none() {
            Some(self.our_uname().to_string())
        } else {
            requested_uname
        };

        if let Some(node) = self.peers.find_any(id, uname.as_deref()) {
            payload["id"] = json!(node.id);
            payload["uuid"] = json!(node.uuid);
            payload["uname"] = json!(node.uname);
            payload["state"] = json!(node.state.to_string());
            payload["is_remote"] = json!(node.is_remote());
        }

        let reply = msg.reply(Some(payload));
        self.relay_message(&reply, true, out);

        FsaInput::Null
    }

    // ========================================================================
    // Failure Counts
    // ========================================================================

    /// Clears a resource's failure history on a node.
    ///
    /// Fans out to both owners of that history: the attribute daemon
    /// (fail-count attributes) and the executor (last-failure record).
    pub(crate) fn handle_failcount_op(&mut self, msg: &Envelope, out: &mut Output) -> FsaInput {
        let resource = msg.payload_str("resource_id").map(ToString::to_string);
        let target = msg.payload_str("target_node").map(ToString::to_string);

        let (Some(resource), Some(target)) = (resource, target) else {
            warn!(?msg, "invalid failure-count operation");
            return FsaInput::Null;
        };

        let operation = msg.payload_str("op_name").map(ToString::to_string);
        let interval_ms = msg
            .payload_i64("interval_ms")
            .and_then(|v| u64::try_from(v).ok())
            .filter(|v| *v > 0);
        let is_remote = msg.payload_str("router_node").is_some();

        out.push(Effect::ClearFailures {
            node: target.clone(),
            resource: resource.clone(),
            operation: operation.clone(),
            interval_ms,
            is_remote,
        });
        out.push(Effect::ClearLastFailure {
            resource,
            node: target,
            operation,
            interval_ms,
        });

        FsaInput::Null
    }

    // ========================================================================
    // Remote Node State
    // ========================================================================

    /// Applies a remote node's reported state to the peer cache.
    pub(crate) fn handle_remote_state(&mut self, msg: &Envelope) -> FsaInput {
        let node = msg.payload_str("node").map(ToString::to_string);
        let (Some(node), Some(in_cluster)) = (node, msg.payload_bool("in_cluster")) else {
            warn!(?msg, "invalid remote-state message");
            return FsaInput::Null;
        };

        self.peers.remote_peer(&node);
        let state = if in_cluster {
            PeerState::Member
        } else {
            PeerState::Lost
        };
        self.peers.update_state(&node, state);

        FsaInput::Null
    }

    // ========================================================================
    // Shutdown Request
    // ========================================================================

    /// Grants a node's request to shut down (DC only).
    ///
    /// Handled by writing a timestamped shutdown attribute for the node;
    /// the scheduler reacts to the attribute change and the transition
    /// engine carries out the stop. Keeping the DC in control here avoids
    /// version skew over the shutdown procedure itself.
    pub(crate) fn handle_shutdown_request(&mut self, msg: &Envelope, out: &mut Output) -> FsaInput {
        let host_from = msg
            .host_from
            .as_deref()
            .filter(|h| !h.is_empty())
            // No sender means the request is ours: we are the DC shutting down.
            .unwrap_or(self.our_uname())
            .to_string();

        info!(node = %host_from, state = %self.fsa_state, "creating shutdown request");

        let now = Utc::now().timestamp();
        out.push(Effect::UpdateAttr {
            node: host_from,
            name: ATTR_SHUTDOWN.to_string(),
            value: now.to_string(),
            is_remote: false,
        });

        FsaInput::Null
    }

    // ========================================================================
    // Node Cache Eviction
    // ========================================================================

    /// Removes a node from peer caches.
    ///
    /// A locally originated request is fanned out to every peer so the
    /// whole cluster forgets the node; one arriving from a peer is applied
    /// to the local cache.
    pub(crate) fn handle_node_cache_removal(
        &mut self,
        msg: &Envelope,
        cause: Cause,
        out: &mut Output,
    ) -> FsaInput {
        let id = u32::try_from(msg.payload_i64("id").unwrap_or(0).max(0)).unwrap_or(0);
        let uname = msg.payload_str("uname").map(ToString::to_string);

        if cause == Cause::IpcMessage {
            info!(node = ?uname, id, "instructing peers to remove references to node");
            let request = Envelope::request(
                Task::RmNodeCache,
                Subsystem::Controller,
                None,
                Subsystem::Controller,
            )
            .with_payload(json!({ "id": id, "uname": uname }));
            out.push(Effect::SendCluster {
                peer: None,
                code: SubsystemCode::Controller,
                msg: request,
                ordered: true,
            });
        } else {
            self.peers.evict(id, uname.as_deref());
        }

        FsaInput::Null
    }

    // ========================================================================
    // Remote State Notification (sender side)
    // ========================================================================

    /// Tells the DC that a remote node came up or went down.
    ///
    /// Best effort: without a DC (or if the send is lost) the change still
    /// reaches it eventually through the configuration store; the message
    /// just makes it happen sooner.
    pub fn send_remote_state_message(&mut self, node: &str, node_up: bool, out: &mut Output) {
        let Some(dc) = self.our_dc.clone() else {
            debug!(node, node_up, "no DC to notify of remote node state");
            return;
        };

        info!(dc = %dc, node, node_up, "notifying DC of remote node state");
        let uname = self.our_uname().to_string();
        let msg = Envelope::request(Task::RemoteState, Subsystem::Dc, Some(&dc), Subsystem::Controller)
            .with_payload(json!({ "node": node, "in_cluster": node_up }))
            .with_host_from(&uname);

        self.peers.cluster_peer(&dc);
        out.push(Effect::SendCluster {
            peer: Some(dc),
            code: SubsystemCode::Controller,
            msg,
            ordered: true,
        });
    }
}
