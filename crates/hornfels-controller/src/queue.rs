//! The FSA input queue.
//!
//! Every piece of work the controller does arrives here as an [`FsaEvent`]:
//! a logical input symbol for the state machine, the cause that raised it,
//! an optional owned payload, and a bitmask of actions to merge into the
//! engine's pending-action register on dispatch.
//!
//! The queue is the serialization point for the whole controller. It is
//! owned by the event-loop thread and never locked; callbacks running on
//! other threads must marshal through the [`Trigger`].
//!
//! # Ordering
//!
//! Events are consumed in insertion order. Prepended events (error
//! recovery) are pulled first, except that a stall marker
//! ([`FsaInput::WaitForEvent`]) on a non-empty queue demotes later prepends
//! to appends: nothing may overtake the event the engine is stalled on.

use std::collections::VecDeque;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};

use hornfels_wire::Envelope;

// ============================================================================
// Causes
// ============================================================================

/// Why an FSA input was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// Raised by the engine itself.
    FsaInternal,
    /// Raised from a membership status callback.
    StatusCallback,
    /// A message arrived over local IPC.
    IpcMessage,
    /// A message arrived from a cluster peer.
    HaMessage,
    /// The local executor reported an operation result.
    LrmOpCallback,
    /// A timer fired. Never carries a payload.
    TimerPopped,
    /// Shutdown plumbing. Never carries a payload.
    Shutdown,
    /// Startup plumbing. Never carries a payload.
    Startup,
    /// Catch-all. Never carries a payload.
    Unknown,
}

impl Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Cause::FsaInternal => "fsa_internal",
            Cause::StatusCallback => "status_callback",
            Cause::IpcMessage => "ipc_message",
            Cause::HaMessage => "ha_message",
            Cause::LrmOpCallback => "lrm_op_callback",
            Cause::TimerPopped => "timer_popped",
            Cause::Shutdown => "shutdown",
            Cause::Startup => "startup",
            Cause::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Logical FSA input symbols.
///
/// The transition table itself lives with the engine; the routing core only
/// classifies messages into these symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsaInput {
    /// Nothing to do.
    Null,
    /// A configuration store operation completed.
    CibOp,
    /// The configuration store changed.
    CibUpdate,
    /// Heartbeat from the DC.
    DcHeartbeat,
    /// The DC went silent.
    DcTimeout,
    /// An election must be held.
    Election,
    /// We won an election.
    ElectionDc,
    /// Check whether a pending election is decided.
    ElectionCheck,
    /// Unrecoverable handler error.
    Error,
    /// Recoverable handler failure.
    Fail,
    /// All expected join requests arrived.
    Integrated,
    /// All join acknowledgements arrived.
    Finalized,
    /// Stop consuming inputs until told otherwise.
    Halt,
    /// A node announced itself to the DC.
    NodeJoin,
    /// We lost DC-ship.
    NotDc,
    /// Recovery completed.
    Recovered,
    /// Give up DC-ship.
    ReleaseDc,
    /// Releasing DC-ship failed.
    ReleaseFail,
    /// Releasing DC-ship succeeded.
    ReleaseSuccess,
    /// Restart the engine.
    Restart,
    /// A join offer arrived from the DC.
    JoinOffer,
    /// A node asked the DC to join.
    JoinRequest,
    /// A join round concluded for a node.
    JoinResult,
    /// A routable message needs local processing.
    Message,
    /// The executor produced an event.
    LrmEvent,
    /// Ask the scheduler for a new calculation.
    PeCalc,
    /// The scheduler produced a calculation.
    PeSuccess,
    /// Waiting for the join protocol.
    Pending,
    /// Re-enter the router with the carried message.
    Router,
    /// Orderly shutdown requested.
    Shutdown,
    /// Stop the engine.
    Stop,
    /// Terminate immediately.
    Terminate,
    /// First input after process start.
    Startup,
    /// Stall the engine pending external input.
    WaitForEvent,
    /// The join-finalization timer fired.
    FinalizeTimeout,
}

impl Display for FsaInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsaInput::Null => "null",
            FsaInput::CibOp => "cib_op",
            FsaInput::CibUpdate => "cib_update",
            FsaInput::DcHeartbeat => "dc_heartbeat",
            FsaInput::DcTimeout => "dc_timeout",
            FsaInput::Election => "election",
            FsaInput::ElectionDc => "election_dc",
            FsaInput::ElectionCheck => "election_check",
            FsaInput::Error => "error",
            FsaInput::Fail => "fail",
            FsaInput::Integrated => "integrated",
            FsaInput::Finalized => "finalized",
            FsaInput::Halt => "halt",
            FsaInput::NodeJoin => "node_join",
            FsaInput::NotDc => "not_dc",
            FsaInput::Recovered => "recovered",
            FsaInput::ReleaseDc => "release_dc",
            FsaInput::ReleaseFail => "release_fail",
            FsaInput::ReleaseSuccess => "release_success",
            FsaInput::Restart => "restart",
            FsaInput::JoinOffer => "join_offer",
            FsaInput::JoinRequest => "join_request",
            FsaInput::JoinResult => "join_result",
            FsaInput::Message => "message",
            FsaInput::LrmEvent => "lrm_event",
            FsaInput::PeCalc => "pe_calc",
            FsaInput::PeSuccess => "pe_success",
            FsaInput::Pending => "pending",
            FsaInput::Router => "router",
            FsaInput::Shutdown => "shutdown",
            FsaInput::Stop => "stop",
            FsaInput::Terminate => "terminate",
            FsaInput::Startup => "startup",
            FsaInput::WaitForEvent => "wait_for_event",
            FsaInput::FinalizeTimeout => "finalize_timeout",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// A bitmask of pending engine actions.
///
/// Actions ride along on events and are OR'd into the engine's
/// pending-action register when the event is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionSet(u64);

impl ActionSet {
    /// No actions.
    pub const NOTHING: ActionSet = ActionSet(0);
    /// Count a received election vote.
    pub const ELECTION_COUNT: ActionSet = ActionSet(1 << 0);
    /// Check whether the election is decided.
    pub const ELECTION_CHECK: ActionSet = ActionSet(1 << 1);
    /// Re-route the carried message.
    pub const MSG_ROUTE: ActionSet = ActionSet(1 << 2);
    /// Invoke the local executor.
    pub const LRM_INVOKE: ActionSet = ActionSet(1 << 3);
    /// Ask the scheduler for a calculation.
    pub const PE_INVOKE: ActionSet = ActionSet(1 << 4);
    /// Hand the transition engine a new graph.
    pub const TE_INVOKE: ActionSet = ActionSet(1 << 5);
    /// Ask the DC for permission to shut down.
    pub const SHUTDOWN_REQ: ActionSet = ActionSet(1 << 6);

    /// Returns true if no actions are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns whether every bit in `other` is set in `self`.
    pub fn contains(self, other: ActionSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// The raw bits, for logging.
    pub fn bits(self) -> u64 {
        self.0
    }
}

impl std::ops::BitOr for ActionSet {
    type Output = ActionSet;

    fn bitor(self, rhs: ActionSet) -> ActionSet {
        ActionSet(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ActionSet {
    fn bitor_assign(&mut self, rhs: ActionSet) {
        self.0 |= rhs.0;
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// An operation result reported by the local executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LrmEvent {
    /// Resource the operation ran on.
    pub resource: String,
    /// Operation name (`start`, `monitor`, ...).
    pub operation: String,
    /// Recurring-operation interval, 0 for one-shot operations.
    pub interval_ms: u64,
    /// Agent exit code.
    pub rc: i32,
}

/// The payload kinds an event can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// No payload.
    None,
    /// A controller message.
    Message,
    /// A bare structured document.
    Xml,
    /// An executor event.
    LrmEvent,
}

impl Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadKind::None => "none",
            PayloadKind::Message => "message",
            PayloadKind::Xml => "xml",
            PayloadKind::LrmEvent => "lrm_event",
        };
        f.write_str(name)
    }
}

/// Payload owned by an event, discriminated by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// No payload.
    None,
    /// A controller message, deep-copied at enqueue time.
    Message(Box<Envelope>),
    /// A bare structured document.
    Xml(serde_json::Value),
    /// An executor event, deep-copied at enqueue time.
    LrmEvent(Box<LrmEvent>),
}

impl Payload {
    /// The discriminant.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::None => PayloadKind::None,
            Payload::Message(_) => PayloadKind::Message,
            Payload::Xml(_) => PayloadKind::Xml,
            Payload::LrmEvent(_) => PayloadKind::LrmEvent,
        }
    }

    /// The carried message, if that is what this payload is.
    pub fn as_message(&self) -> Option<&Envelope> {
        match self {
            Payload::Message(msg) => Some(msg),
            _ => None,
        }
    }

    /// The carried document, if that is what this payload is.
    pub fn as_xml(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Xml(doc) => Some(doc),
            _ => None,
        }
    }

    /// The carried executor event, if that is what this payload is.
    pub fn as_lrm_event(&self) -> Option<&LrmEvent> {
        match self {
            Payload::LrmEvent(ev) => Some(ev),
            _ => None,
        }
    }

    fn as_raised(&self) -> RaisedPayload<'_> {
        match self {
            Payload::None | Payload::Xml(_) => RaisedPayload::None,
            Payload::Message(msg) => RaisedPayload::Message(msg),
            Payload::LrmEvent(ev) => RaisedPayload::LrmEvent(ev),
        }
    }
}

/// A payload offered to [`FsaQueue::raise`].
///
/// Raising borrows; the queue deep-copies on enqueue. This is the ownership
/// boundary: callers keep their message, the queue owns its copy.
#[derive(Debug, Clone, Copy)]
pub enum RaisedPayload<'a> {
    /// No payload.
    None,
    /// A borrowed controller message.
    Message(&'a Envelope),
    /// A borrowed executor event.
    LrmEvent(&'a LrmEvent),
}

impl RaisedPayload<'_> {
    /// Returns true for the no-payload case.
    pub fn is_none(&self) -> bool {
        matches!(self, RaisedPayload::None)
    }
}

// ============================================================================
// Events
// ============================================================================

/// One entry in the FSA input queue.
#[derive(Debug, Clone, PartialEq)]
pub struct FsaEvent {
    /// Monotonically increasing counter for log correlation. Wraparound is
    /// tolerated; never an identity key.
    pub id: u32,
    /// Why the event was raised.
    pub cause: Cause,
    /// The input symbol for the engine.
    pub input: FsaInput,
    /// Actions to merge into the pending-action register on dispatch.
    pub actions: ActionSet,
    /// Call site that raised the event. Diagnostic only.
    pub origin: &'static str,
    /// Owned payload.
    pub payload: Payload,
}

impl FsaEvent {
    /// The carried message.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not a message. A handler reaching for the
    /// wrong payload kind is operating on corrupted assumptions and must
    /// not continue.
    pub fn message(&self) -> &Envelope {
        match &self.payload {
            Payload::Message(msg) => msg,
            other => panic!(
                "event {} from {} carries {} payload, message expected",
                self.id,
                self.origin,
                other.kind()
            ),
        }
    }

    /// The carried document.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not a document.
    pub fn xml(&self) -> &serde_json::Value {
        match &self.payload {
            Payload::Xml(doc) => doc,
            other => panic!(
                "event {} from {} carries {} payload, xml expected",
                self.id,
                self.origin,
                other.kind()
            ),
        }
    }

    /// The carried executor event.
    ///
    /// # Panics
    ///
    /// Panics if the payload is not an executor event.
    pub fn lrm_event(&self) -> &LrmEvent {
        match &self.payload {
            Payload::LrmEvent(ev) => ev,
            other => panic!(
                "event {} from {} carries {} payload, lrm_event expected",
                self.id,
                self.origin,
                other.kind()
            ),
        }
    }
}

// ============================================================================
// Trigger
// ============================================================================

/// The event-loop wakeup source.
///
/// Raising an input arms the trigger; the loop drains it with
/// [`Trigger::take`] and then consumes the queue. Code running off the loop
/// thread interacts with the queue only by arming this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trigger {
    armed: bool,
}

impl Trigger {
    /// Arms the trigger.
    pub fn arm(&mut self) {
        self.armed = true;
    }

    /// Returns whether the trigger is armed.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Disarms and reports whether it was armed.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }
}

// ============================================================================
// Queue
// ============================================================================

/// The ordered queue of FSA inputs, plus the engine registers raising
/// interacts with.
#[derive(Debug, Default)]
pub struct FsaQueue {
    entries: VecDeque<FsaEvent>,
    next_id: u32,
    stalled: bool,
    pending_actions: ActionSet,
    /// The event-loop wakeup source.
    pub trigger: Trigger,
}

impl FsaQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises an FSA input.
    ///
    /// Returns the new event's id, or `None` when nothing was enqueued:
    /// either the raise was a no-op (`Null` input, no actions, no payload)
    /// or a payload-less stall merged its actions into the pending-action
    /// register.
    ///
    /// A [`FsaInput::WaitForEvent`] raise stalls the engine. If the queue
    /// is non-empty at that point the entries are dumped to the trace log
    /// and `prepend` is forced off, so nothing overtakes the event the
    /// engine stalled on.
    ///
    /// # Panics
    ///
    /// Panics if a payload is offered under a cause that must not carry one
    /// (`TimerPopped`, `Shutdown`, `Startup`, `Unknown`), or if the payload
    /// variant disagrees with the cause class. Both are programmer errors
    /// the process must not survive.
    pub fn raise(
        &mut self,
        cause: Cause,
        input: FsaInput,
        payload: RaisedPayload<'_>,
        actions: ActionSet,
        prepend: bool,
        origin: &'static str,
    ) -> Option<u32> {
        let mut prepend = prepend;
        let mut actions = actions;

        if input == FsaInput::Null && actions.is_empty() && payload.is_none() {
            error!(origin, "cannot add entry to queue: no input and no action");
            return None;
        }

        if input == FsaInput::WaitForEvent {
            self.stalled = true;
            debug!(
                origin,
                cause = %cause,
                queue = self.entries.len(),
                "stalling the FSA pending further input"
            );

            if !self.entries.is_empty() {
                self.dump();
            }

            if payload.is_none() {
                self.pending_actions |= actions;
                return None;
            }

            // Store everything in the new event and reset the register.
            actions |= self.pending_actions;
            self.pending_actions = ActionSet::NOTHING;
        }

        // Nothing may be queued ahead of the event the engine stalled on.
        if prepend && self.stalled && !self.entries.is_empty() {
            trace!(origin, "queue is stalled; appending instead of prepending");
            prepend = false;
        }

        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;
        trace!(
            origin,
            id,
            input = %input,
            cause = %cause,
            prepend,
            with_payload = !payload.is_none(),
            "raising FSA input"
        );

        let payload = match (cause, payload) {
            (_, RaisedPayload::None) => Payload::None,
            (
                Cause::FsaInternal | Cause::StatusCallback | Cause::IpcMessage | Cause::HaMessage,
                RaisedPayload::Message(msg),
            ) => Payload::Message(Box::new(msg.clone())),
            (Cause::LrmOpCallback, RaisedPayload::LrmEvent(ev)) => {
                Payload::LrmEvent(Box::new(ev.clone()))
            }
            (cause, _) => panic!("cause {cause} cannot carry this payload (raised from {origin})"),
        };

        if !actions.is_empty() {
            trace!(actions = %format_args!("{:#018x}", actions.bits()), "adding actions to input");
        }

        let event = FsaEvent {
            id,
            cause,
            input,
            actions,
            origin,
            payload,
        };

        if prepend {
            self.entries.push_front(event);
        } else {
            self.entries.push_back(event);
        }

        if input != FsaInput::WaitForEvent {
            self.trigger.arm();
        }
        Some(id)
    }

    /// Raises an input for processing on the next engine tick.
    pub fn raise_later(
        &mut self,
        cause: Cause,
        input: FsaInput,
        payload: RaisedPayload<'_>,
        origin: &'static str,
    ) -> Option<u32> {
        self.raise(cause, input, payload, ActionSet::NOTHING, false, origin)
    }

    /// Raises an error input at the head of the queue.
    ///
    /// If the pending-action register is non-empty its contents are first
    /// re-raised as a synthetic event carrying the current event's cause
    /// and payload, so no requested actions are lost to the error.
    pub fn raise_error(
        &mut self,
        cause: Cause,
        input: FsaInput,
        current: Option<&FsaEvent>,
        payload: RaisedPayload<'_>,
        origin: &'static str,
    ) {
        if !self.pending_actions.is_empty() {
            let saved = self.pending_actions;
            let (cur_cause, cur_payload) = match current {
                Some(event) => (event.cause, event.payload.as_raised()),
                None => (Cause::FsaInternal, RaisedPayload::None),
            };
            debug!(
                actions = %format_args!("{:#018x}", saved.bits()),
                "resetting the current action list"
            );
            self.pending_actions = ActionSet::NOTHING;
            self.raise(cur_cause, FsaInput::Null, cur_payload, saved, true, origin);
        }

        self.raise(cause, input, payload, ActionSet::NOTHING, true, origin);
    }

    /// Removes and returns the head of the queue.
    pub fn dequeue(&mut self) -> Option<FsaEvent> {
        let event = self.entries.pop_front()?;
        trace!(id = event.id, input = %event.input, "processing input");
        Some(event)
    }

    /// Returns whether the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the engine is stalled.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Clears the stall, letting the engine consume inputs again.
    pub fn clear_stall(&mut self) {
        if self.stalled {
            debug!("clearing FSA stall");
            self.stalled = false;
        }
    }

    /// Actions waiting to be merged into the engine on its next pass.
    pub fn pending_actions(&self) -> ActionSet {
        self.pending_actions
    }

    /// Merges actions into the pending-action register directly.
    pub fn add_pending_actions(&mut self, actions: ActionSet) {
        self.pending_actions |= actions;
    }

    /// Trace-logs every queued entry.
    pub fn dump(&self) {
        for (offset, event) in self.entries.iter().enumerate() {
            trace!(
                offset,
                id = event.id,
                input = %event.input,
                origin = event.origin,
                cause = %event.cause,
                payload = %event.payload.kind(),
                "queue entry"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
