//! Integration tests for hornfels-controller.
//!
//! These exercise the router, dispatcher, and handlers together on a real
//! controller value, asserting on the produced effects and queue contents.

use serde_json::json;

use hornfels_membership::{JoinExpectation, PeerState};
use hornfels_types::ExitCode;
use hornfels_wire::{Envelope, MessageType, Subsystem, SubsystemCode, Task};

use crate::config::ControllerConfig;
use crate::effect::{Effect, Output};
use crate::queue::{ActionSet, Cause, FsaInput, Payload};
use crate::state::{Controller, FsaState, InputRegister, TransitionStatus};

// ============================================================================
// Helper Functions
// ============================================================================

fn node(name: &str) -> Controller {
    let mut node = Controller::new(ControllerConfig::new(name));
    node.fsa_state = FsaState::NotDc;
    node
}

fn dc_node(name: &str) -> Controller {
    let mut node = Controller::new(ControllerConfig::new(name));
    node.fsa_state = FsaState::Idle;
    node.registers.insert(InputRegister::THE_DC);
    node.our_dc = Some(name.to_string());
    node
}

fn request(task: Task, sys_to: Subsystem, sys_from: Subsystem) -> Envelope {
    Envelope {
        msg_type: MessageType::Request,
        task: Some(task),
        sys_to: Some(sys_to),
        sys_from: Some(sys_from),
        host_to: None,
        host_from: None,
        reference: "r1".into(),
        join_id: None,
        version: None,
        payload: None,
    }
}

// ============================================================================
// Scenario: Local Ping
// ============================================================================

#[test]
fn local_ping_gets_one_ipc_reply() {
    let mut n1 = node("n1");
    n1.fsa_state = FsaState::Idle;
    n1.clients.register("client-1");

    let mut msg = request(
        Task::Ping,
        Subsystem::Controller,
        Subsystem::Other("client-1".into()),
    );
    msg.host_to = Some("n1".into());
    msg.host_from = Some("n1".into());

    let mut out = Output::new();
    n1.route_message(Cause::IpcMessage, &msg, &mut out);

    assert!(n1.queue.is_empty());
    assert_eq!(out.effects.len(), 1);
    match &out.effects[0] {
        Effect::SendIpc { client, msg: reply } => {
            assert_eq!(client, "client-1");
            assert_eq!(reply.msg_type, MessageType::Response);
            assert_eq!(reply.reference, "r1");
            assert_eq!(reply.payload_str("controller_state"), Some("s_idle"));
            assert_eq!(reply.payload_str("status"), Some("ok"));
            assert_eq!(reply.host_from.as_deref(), Some("n1"));
        }
        other => panic!("expected an IPC reply, got {other:?}"),
    }
}

// ============================================================================
// Scenario: Relay To Peer
// ============================================================================

#[test]
fn locally_originated_dc_message_is_relayed_to_peer() {
    let mut n1 = node("n1");

    let mut msg = request(Task::JoinRequest, Subsystem::Dc, Subsystem::Controller);
    msg.host_to = Some("n2".into());

    let mut out = Output::new();
    n1.route_message(Cause::IpcMessage, &msg, &mut out);

    assert!(n1.queue.is_empty());
    assert_eq!(out.effects.len(), 1);
    match &out.effects[0] {
        Effect::SendCluster {
            peer,
            code,
            ordered,
            ..
        } => {
            assert_eq!(peer.as_deref(), Some("n2"));
            assert_eq!(*code, SubsystemCode::Controller);
            assert!(ordered);
        }
        other => panic!("expected a cluster send, got {other:?}"),
    }
}

#[test]
fn stale_scheduler_output_is_discarded_when_not_dc() {
    let mut n1 = node("n1");

    let mut msg = request(Task::PeCalc, Subsystem::Dc, Subsystem::Scheduler);
    msg.host_to = Some("n2".into());

    let mut out = Output::new();
    n1.route_message(Cause::IpcMessage, &msg, &mut out);

    assert!(out.is_empty());
    assert!(n1.queue.is_empty());
}

#[test]
fn peer_originated_dc_message_is_discarded_when_not_dc() {
    let mut n1 = node("n1");

    let msg = request(Task::JoinRequest, Subsystem::Dc, Subsystem::Controller);

    let mut out = Output::new();
    n1.route_message(Cause::HaMessage, &msg, &mut out);

    assert!(out.is_empty());
    assert!(n1.queue.is_empty());
}

#[test]
fn dc_handles_dc_addressed_messages_itself() {
    let mut n1 = dc_node("n1");

    let mut msg = request(Task::JoinRequest, Subsystem::Dc, Subsystem::Controller);
    msg.host_from = Some("n2".into());

    let mut out = Output::new();
    n1.route_message(Cause::HaMessage, &msg, &mut out);

    // Routed to the dispatcher, which raises the join input.
    assert_eq!(n1.queue.len(), 1);
    let event = n1.queue.dequeue().unwrap();
    assert_eq!(event.input, FsaInput::JoinRequest);
    assert!(out.is_empty());
}

#[test]
fn dc_relays_te_messages_over_ipc() {
    let mut n1 = dc_node("n1");

    let msg = request(Task::Noop, Subsystem::TransitionEngine, Subsystem::Controller);

    let mut out = Output::new();
    n1.route_message(Cause::HaMessage, &msg, &mut out);

    assert!(n1.queue.is_empty());
    assert!(matches!(out.effects.as_slice(), [Effect::TeInject { .. }]));
}

#[test]
fn relay_to_unknown_peer_is_dropped() {
    let mut n1 = node("n1");

    let mut msg = request(
        Task::Noop,
        Subsystem::Other("client-9".into()),
        Subsystem::Controller,
    );
    msg.host_to = Some("ghost".into());

    let mut out = Output::new();
    n1.route_message(Cause::IpcMessage, &msg, &mut out);

    assert!(out.is_empty());
    assert!(n1.queue.is_empty());
}

#[test]
fn hello_is_silently_swallowed_by_the_router() {
    let mut n1 = node("n1");
    let msg = request(Task::Hello, Subsystem::Controller, Subsystem::Controller);

    let mut out = Output::new();
    n1.route_message(Cause::IpcMessage, &msg, &mut out);

    assert!(out.is_empty());
    assert!(n1.queue.is_empty());
}

#[test]
fn message_without_destination_is_dropped() {
    let mut n1 = node("n1");
    let mut msg = request(Task::Noop, Subsystem::Controller, Subsystem::Controller);
    msg.sys_to = None;

    let mut out = Output::new();
    n1.route_message(Cause::HaMessage, &msg, &mut out);

    assert!(out.is_empty());
    assert!(n1.queue.is_empty());
}

#[test]
fn node_info_without_host_is_always_local() {
    let mut n1 = node("n1");
    n1.clients.register("client-1");
    n1.peers.cluster_peer("n1").id = 1;

    let msg = request(
        Task::NodeInfo,
        Subsystem::Controller,
        Subsystem::Other("client-1".into()),
    );

    let mut out = Output::new();
    n1.route_message(Cause::IpcMessage, &msg, &mut out);

    // Answered locally even though the request was locally originated
    // with no target host.
    assert_eq!(out.effects.len(), 1);
    match &out.effects[0] {
        Effect::SendIpc { msg: reply, .. } => {
            assert_eq!(reply.payload_str("uname"), Some("n1"));
            assert_eq!(reply.payload_bool("have_quorum"), Some(false));
        }
        other => panic!("expected an IPC reply, got {other:?}"),
    }
}

// ============================================================================
// Scenario: DC Vote
// ============================================================================

#[test]
fn vote_on_halted_dc_forces_election() {
    let mut n1 = dc_node("n1");
    n1.fsa_state = FsaState::Halt;

    let mut msg = request(Task::Vote, Subsystem::Controller, Subsystem::Controller);
    msg.host_from = Some("n2".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Election);
    assert_eq!(n1.queue.len(), 1);
    let event = n1.queue.dequeue().unwrap();
    assert!(event
        .actions
        .contains(ActionSet::ELECTION_COUNT | ActionSet::ELECTION_CHECK));
    assert_eq!(event.cause, Cause::HaMessage);
}

#[test]
fn vote_outside_halt_only_counts() {
    let mut n1 = dc_node("n1");

    let msg = request(Task::Vote, Subsystem::Controller, Subsystem::Controller);

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert_eq!(n1.queue.len(), 1);
}

#[test]
fn novote_counts_without_forcing_election() {
    let mut n1 = node("n1");

    let msg = request(Task::Novote, Subsystem::Controller, Subsystem::Controller);

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert_eq!(n1.queue.len(), 1);
}

// ============================================================================
// Scenario: Shutdown Handling
// ============================================================================

#[test]
fn shutdown_from_unknown_peer_is_discarded() {
    let mut n1 = node("n1");
    n1.our_dc = Some("n2".into());

    let mut msg = request(Task::Shutdown, Subsystem::Controller, Subsystem::Controller);
    msg.host_from = Some("n3".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert!(n1.queue.is_empty());
    assert!(!n1.registers.contains(InputRegister::STAYDOWN));
}

#[test]
fn unsolicited_shutdown_from_our_dc_stays_down() {
    let mut n1 = node("n1");
    n1.our_dc = Some("n2".into());

    let mut msg = request(Task::Shutdown, Subsystem::Controller, Subsystem::Controller);
    msg.host_from = Some("n2".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Stop);
    assert!(n1.registers.contains(InputRegister::STAYDOWN));
}

#[test]
fn solicited_shutdown_from_our_dc_stops() {
    let mut n1 = node("n1");
    n1.our_dc = Some("n2".into());
    n1.registers.insert(InputRegister::SHUTDOWN);

    let mut msg = request(Task::Shutdown, Subsystem::Controller, Subsystem::Controller);
    msg.host_from = Some("n2".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Stop);
    assert!(!n1.registers.contains(InputRegister::STAYDOWN));
}

#[test]
fn dc_with_pending_shutdown_stops_itself() {
    let mut n1 = dc_node("n1");
    n1.registers.insert(InputRegister::SHUTDOWN);

    let msg = request(Task::Shutdown, Subsystem::Controller, Subsystem::Controller);

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Stop);
}

#[test]
fn dc_told_to_stop_by_its_own_te_terminates() {
    let mut n1 = dc_node("n1");

    let mut msg = request(Task::Shutdown, Subsystem::Controller, Subsystem::Controller);
    msg.host_from = Some("n1".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Terminate);
}

#[test]
fn contested_shutdown_on_dc_forces_election() {
    let mut n1 = dc_node("n1");

    let mut msg = request(Task::Shutdown, Subsystem::Controller, Subsystem::Controller);
    msg.host_from = Some("n3".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Election);
}

#[test]
fn shutdown_req_updates_expectation_everywhere() {
    let mut n1 = node("n1");

    let mut msg = request(
        Task::ShutdownReq,
        Subsystem::Controller,
        Subsystem::Controller,
    );
    msg.host_from = Some("n3".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert!(out.is_empty());
    assert_eq!(
        n1.peers.find(0, Some("n3")).unwrap().expected,
        Some(JoinExpectation::Down)
    );
}

#[test]
fn dc_grants_shutdown_request_via_attribute() {
    let mut n1 = dc_node("n1");

    let mut msg = request(
        Task::ShutdownReq,
        Subsystem::Controller,
        Subsystem::Controller,
    );
    msg.host_from = Some("n3".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    match &out.effects[..] {
        [Effect::UpdateAttr { node, name, .. }] => {
            assert_eq!(node, "n3");
            assert_eq!(name, "shutdown");
        }
        other => panic!("expected one attribute update, got {other:?}"),
    }
}

#[test]
fn dc_shutdown_request_without_sender_targets_itself() {
    let mut n1 = dc_node("n1");

    let msg = request(
        Task::ShutdownReq,
        Subsystem::Controller,
        Subsystem::Controller,
    );

    let mut out = Output::new();
    n1.handle_message(&msg, Cause::HaMessage, &mut out);

    match &out.effects[..] {
        [Effect::UpdateAttr { node, .. }] => assert_eq!(node, "n1"),
        other => panic!("expected one attribute update, got {other:?}"),
    }
}

#[test]
fn local_shutdown_requests_orderly_exit() {
    let mut n1 = node("n1");

    let msg = request(
        Task::LocalShutdown,
        Subsystem::Controller,
        Subsystem::Controller,
    );

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::IpcMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert_eq!(out.effects, vec![Effect::RequestShutdown]);
}

// ============================================================================
// Scenario: Feature-Set Mismatch
// ============================================================================

#[test]
fn incompatible_join_offer_stays_down_and_exits_fatal() {
    let mut n1 = node("n1");

    let mut msg = request(Task::JoinOffer, Subsystem::Controller, Subsystem::Dc);
    msg.version = Some("999.0.0".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert!(n1.registers.contains(InputRegister::STAYDOWN));
    assert!(out.effects.contains(&Effect::Exit(ExitCode::Fatal)));
    assert!(n1.queue.is_empty());
}

#[test]
fn compatible_join_offer_is_raised() {
    let mut n1 = node("n1");

    let mut msg = request(Task::JoinOffer, Subsystem::Controller, Subsystem::Dc);
    msg.version = Some(hornfels_types::FEATURE_SET.into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::JoinOffer);
    assert!(out.is_empty());
}

#[test]
fn join_offer_without_version_assumes_legacy_dc() {
    let mut n1 = node("n1");

    let msg = request(Task::JoinOffer, Subsystem::Controller, Subsystem::Dc);

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    // 3.0.14 is older than our minor revision: incompatible.
    assert_eq!(input, FsaInput::Null);
    assert!(out.effects.contains(&Effect::Exit(ExitCode::Fatal)));
}

// ============================================================================
// Scenario: Scheduler Responses
// ============================================================================

fn pe_calc_response(reference: &str) -> Envelope {
    let mut msg = request(Task::PeCalc, Subsystem::Controller, Subsystem::Scheduler);
    msg.msg_type = MessageType::Response;
    msg.reference = reference.into();
    msg
}

#[test]
fn matching_scheduler_reply_raises_pe_success() {
    let mut n1 = dc_node("n1");
    n1.pe_reference = Some("a".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&pe_calc_response("a"), Cause::IpcMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert_eq!(out.effects, vec![Effect::StopSchedulerTimer]);
    assert_eq!(n1.queue.len(), 1);
    let event = n1.queue.dequeue().unwrap();
    assert_eq!(event.input, FsaInput::PeSuccess);
}

#[test]
fn obsolete_scheduler_reply_has_no_effect() {
    let mut n1 = dc_node("n1");
    n1.pe_reference = Some("a".into());

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&pe_calc_response("b"), Cause::IpcMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert!(out.is_empty());
    assert!(n1.queue.is_empty());
}

#[test]
fn vote_and_shutdown_responses_are_silently_accepted() {
    let mut n1 = node("n1");

    for task in [Task::Vote, Task::ShutdownReq, Task::Shutdown] {
        let mut msg = request(task, Subsystem::Controller, Subsystem::Controller);
        msg.msg_type = MessageType::Response;

        let mut out = Output::new();
        let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

        assert_eq!(input, FsaInput::Null);
        assert!(out.is_empty());
        assert!(n1.queue.is_empty());
    }
}

// ============================================================================
// Scenario: Remote Nodes and Node Cache
// ============================================================================

#[test]
fn remote_state_updates_the_remote_peer() {
    let mut n1 = dc_node("n1");

    let mut msg = request(Task::RemoteState, Subsystem::Controller, Subsystem::Controller);
    msg.payload = Some(json!({ "node": "remote-1", "in_cluster": false }));

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    let peer = n1.peers.find_any(0, Some("remote-1")).unwrap();
    assert!(peer.is_remote());
    assert_eq!(peer.state, PeerState::Lost);
}

#[test]
fn remote_state_is_dc_only() {
    let mut n1 = node("n1");

    let mut msg = request(Task::RemoteState, Subsystem::Controller, Subsystem::Controller);
    msg.payload = Some(json!({ "node": "remote-1", "in_cluster": true }));

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    // Falls through to the unexpected-request arm on a non-DC node.
    assert_eq!(input, FsaInput::Null);
    assert!(n1.peers.find_any(0, Some("remote-1")).is_none());
}

#[test]
fn local_node_cache_removal_is_broadcast() {
    let mut n1 = node("n1");
    n1.peers.cluster_peer("n3");

    let mut msg = request(Task::RmNodeCache, Subsystem::Controller, Subsystem::Controller);
    msg.payload = Some(json!({ "uname": "n3" }));

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::IpcMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    // Broadcast to peers; the local record survives until the broadcast
    // comes back around.
    assert!(n1.peers.find(0, Some("n3")).is_some());
    match &out.effects[..] {
        [Effect::SendCluster { peer: None, msg, .. }] => {
            assert_eq!(msg.task, Some(Task::RmNodeCache));
            assert_eq!(msg.payload_str("uname"), Some("n3"));
        }
        other => panic!("expected one broadcast, got {other:?}"),
    }
}

#[test]
fn peer_node_cache_removal_evicts_locally() {
    let mut n1 = node("n1");
    n1.peers.cluster_peer("n3");
    n1.peers.record_fence_failure("n3");

    let mut msg = request(Task::RmNodeCache, Subsystem::Controller, Subsystem::Controller);
    msg.payload = Some(json!({ "uname": "n3" }));

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert!(out.is_empty());
    assert!(n1.peers.find(0, Some("n3")).is_none());
    assert_eq!(n1.peers.fence_failures("n3"), 0);
}

#[test]
fn remote_state_notification_goes_to_the_dc() {
    let mut n1 = node("n1");
    n1.our_dc = Some("n2".into());

    let mut out = Output::new();
    n1.send_remote_state_message("remote-1", true, &mut out);

    match &out.effects[..] {
        [Effect::SendCluster { peer, msg, .. }] => {
            assert_eq!(peer.as_deref(), Some("n2"));
            assert_eq!(msg.task, Some(Task::RemoteState));
            assert_eq!(msg.payload_bool("in_cluster"), Some(true));
            assert_eq!(msg.host_from.as_deref(), Some("n1"));
        }
        other => panic!("expected one cluster send, got {other:?}"),
    }
}

#[test]
fn remote_state_notification_without_dc_is_skipped() {
    let mut n1 = node("n1");

    let mut out = Output::new();
    n1.send_remote_state_message("remote-1", false, &mut out);

    assert!(out.is_empty());
}

// ============================================================================
// Scenario: Failure-Count Clearing
// ============================================================================

#[test]
fn clear_failcount_fans_out_to_both_owners() {
    let mut n1 = node("n1");

    let mut msg = request(
        Task::ClearFailcount,
        Subsystem::Controller,
        Subsystem::Controller,
    );
    msg.payload = Some(json!({
        "resource_id": "db",
        "target_node": "n2",
        "op_name": "monitor",
        "interval_ms": 10_000,
    }));

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::IpcMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert_eq!(out.effects.len(), 2);
    match &out.effects[0] {
        Effect::ClearFailures {
            node,
            resource,
            operation,
            interval_ms,
            is_remote,
        } => {
            assert_eq!(node, "n2");
            assert_eq!(resource, "db");
            assert_eq!(operation.as_deref(), Some("monitor"));
            assert_eq!(*interval_ms, Some(10_000));
            assert!(!is_remote);
        }
        other => panic!("expected a failure clear, got {other:?}"),
    }
    assert!(matches!(&out.effects[1], Effect::ClearLastFailure { .. }));
}

#[test]
fn clear_failcount_requires_resource_and_target() {
    let mut n1 = node("n1");

    let mut msg = request(
        Task::ClearFailcount,
        Subsystem::Controller,
        Subsystem::Controller,
    );
    msg.payload = Some(json!({ "resource_id": "db" }));

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::IpcMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert!(out.is_empty());
}

#[test]
fn clear_failcount_router_node_marks_remote() {
    let mut n1 = node("n1");

    let mut msg = request(
        Task::ClearFailcount,
        Subsystem::Controller,
        Subsystem::Controller,
    );
    msg.payload = Some(json!({
        "resource_id": "db",
        "target_node": "remote-1",
        "router_node": "n2",
    }));

    let mut out = Output::new();
    n1.handle_message(&msg, Cause::IpcMessage, &mut out);

    match &out.effects[0] {
        Effect::ClearFailures { is_remote, .. } => assert!(is_remote),
        other => panic!("expected a failure clear, got {other:?}"),
    }
}

// ============================================================================
// Scenario: Role Gating and Unknown Tasks
// ============================================================================

#[test]
fn join_announce_is_ignored_off_the_dc() {
    let mut n1 = node("n1");

    let msg = request(Task::JoinAnnounce, Subsystem::Controller, Subsystem::Controller);

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert!(n1.queue.is_empty());
}

#[test]
fn join_announce_reaches_the_dc() {
    let mut n1 = dc_node("n1");

    let msg = request(Task::JoinAnnounce, Subsystem::Controller, Subsystem::Controller);

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::NodeJoin);
}

#[test]
fn unknown_task_is_dropped() {
    let mut n1 = node("n1");

    let msg = request(
        Task::Other("resurrect_node".into()),
        Subsystem::Controller,
        Subsystem::Controller,
    );

    let mut out = Output::new();
    let (input, _) = n1.handle_message(&msg, Cause::HaMessage, &mut out);

    assert_eq!(input, FsaInput::Null);
    assert!(out.is_empty());
    assert!(n1.queue.is_empty());
}

#[test]
fn throttle_triggers_graph_only_with_incomplete_transition() {
    let mut n1 = dc_node("n1");
    n1.transition = Some(TransitionStatus { complete: false });

    let mut msg = request(Task::Throttle, Subsystem::Controller, Subsystem::Controller);
    msg.host_from = Some("n2".into());

    let mut out = Output::new();
    n1.handle_message(&msg, Cause::HaMessage, &mut out);
    assert!(out.effects.contains(&Effect::TriggerGraph));

    n1.transition = Some(TransitionStatus { complete: true });
    let mut out = Output::new();
    n1.handle_message(&msg, Cause::HaMessage, &mut out);
    assert!(!out.effects.contains(&Effect::TriggerGraph));
}

// ============================================================================
// Round Trips
// ============================================================================

#[test]
fn routing_a_deep_copy_matches_the_original() {
    let build = || {
        let mut n = node("n1");
        n.clients.register("client-1");
        n
    };

    let mut msg = request(
        Task::Ping,
        Subsystem::Controller,
        Subsystem::Other("client-1".into()),
    );
    msg.host_to = Some("n1".into());
    msg.host_from = Some("n1".into());
    let copy = msg.clone();

    let mut original_out = Output::new();
    build().route_message(Cause::IpcMessage, &msg, &mut original_out);

    let mut copy_out = Output::new();
    build().route_message(Cause::IpcMessage, &copy, &mut copy_out);

    assert_eq!(original_out, copy_out);
}

#[test]
fn routing_is_deterministic() {
    let build = || {
        let mut n = node("n1");
        n.our_dc = Some("n2".into());
        n.peers.cluster_peer("n2");
        n
    };

    let mut msg = request(Task::JoinRequest, Subsystem::Dc, Subsystem::Controller);
    msg.host_to = Some("n2".into());

    let mut first = Output::new();
    build().route_message(Cause::IpcMessage, &msg, &mut first);
    let mut second = Output::new();
    build().route_message(Cause::IpcMessage, &msg, &mut second);

    assert_eq!(first, second);
    assert!(!first.is_empty());
}

#[test]
fn executor_tasks_are_rewritten_and_rerouted() {
    let mut n1 = node("n1");

    let mut msg = request(Task::Reprobe, Subsystem::Controller, Subsystem::Controller);
    msg.host_to = Some("n1".into());

    let mut out = Output::new();
    n1.route_message(Cause::IpcMessage, &msg, &mut out);

    // First pass queues a router input carrying the rewritten message.
    assert!(out.is_empty());
    assert_eq!(n1.queue.len(), 1);
    let event = n1.queue.dequeue().unwrap();
    assert_eq!(event.input, FsaInput::Router);
    assert_eq!(event.message().sys_to, Some(Subsystem::Lrmd));

    // Re-entering the router relays to the executor over IPC.
    let mut out = Output::new();
    n1.route_queued(&event, &mut out);
    match &out.effects[..] {
        [Effect::LrmInvoke { event }] => {
            assert_eq!(event.input, FsaInput::Message);
            assert_eq!(event.cause, Cause::IpcMessage);
            assert!(matches!(event.payload, Payload::Message(_)));
        }
        other => panic!("expected an executor invocation, got {other:?}"),
    }
}

// ============================================================================
// Router / Queue Interaction
// ============================================================================

#[test]
fn deferred_inputs_reach_the_queue_with_payload() {
    let mut n1 = node("n1");
    n1.our_dc = Some("n2".into());

    let mut msg = request(Task::Shutdown, Subsystem::Controller, Subsystem::Controller);
    msg.host_from = Some("n2".into());
    msg.host_to = Some("n1".into());
    n1.registers.insert(InputRegister::SHUTDOWN);

    let mut out = Output::new();
    n1.route_message(Cause::HaMessage, &msg, &mut out);

    // Stop is not a direct input: it is deferred to the next tick.
    assert_eq!(n1.queue.len(), 1);
    let event = n1.queue.dequeue().unwrap();
    assert_eq!(event.input, FsaInput::Stop);
    assert_eq!(event.message().reference, "r1");
    assert!(n1.queue.trigger.is_armed());
}
