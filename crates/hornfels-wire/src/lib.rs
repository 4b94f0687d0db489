//! Controller protocol messages.
//!
//! This crate defines the structured envelope every controller message
//! travels in, whether it arrived over local IPC or from a cluster peer:
//!
//! - [`Envelope`] - the message itself: addressing, correlation, payload
//! - [`MessageType`] - request vs. response
//! - [`Task`] - the operation name, interned at parse time
//! - [`Subsystem`] - the closed set of addressable subsystems
//! - [`SubsystemCode`] - numeric destinations for code-addressed transports
//!
//! Envelopes are read-only once built; the router and dispatcher borrow them
//! and deep-copy (`Clone`) only when an event is enqueued.

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Message Type
// ============================================================================

/// Whether an envelope carries a request or the answer to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// An operation for the addressee to perform.
    Request,
    /// The answer to a previously sent request, correlated by reference.
    Response,
}

// ============================================================================
// Subsystems
// ============================================================================

/// An addressable subsystem.
///
/// `sys_to`/`sys_from` name one of these. Transient IPC clients address
/// themselves by their client id, which lands in [`Subsystem::Other`];
/// routing classification never matches `Other`, so such messages fall
/// through to the local-relay or peer-relay arms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Subsystem {
    /// The per-node cluster controller.
    Controller,
    /// Whichever node currently holds the Designated Coordinator role.
    Dc,
    /// The configuration store instance on the DC.
    DcCib,
    /// The local configuration store.
    Cib,
    /// The transition engine (runs only on the DC).
    TransitionEngine,
    /// The scheduler (runs only on the DC).
    Scheduler,
    /// The local resource-agent executor.
    Lrmd,
    /// The node attribute daemon.
    AttributeDaemon,
    /// The fencing daemon.
    Stonith,
    /// Anything else, typically a transient client id.
    Other(String),
}

impl Subsystem {
    /// Parses a subsystem name, case-insensitively.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "controller" => Subsystem::Controller,
            "dc" => Subsystem::Dc,
            "dc_cib" => Subsystem::DcCib,
            "cib" => Subsystem::Cib,
            "transition_engine" => Subsystem::TransitionEngine,
            "scheduler" => Subsystem::Scheduler,
            "lrmd" => Subsystem::Lrmd,
            "attribute_daemon" => Subsystem::AttributeDaemon,
            "stonith" => Subsystem::Stonith,
            _ => Subsystem::Other(name.to_string()),
        }
    }

    /// The wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Subsystem::Controller => "controller",
            Subsystem::Dc => "dc",
            Subsystem::DcCib => "dc_cib",
            Subsystem::Cib => "cib",
            Subsystem::TransitionEngine => "transition_engine",
            Subsystem::Scheduler => "scheduler",
            Subsystem::Lrmd => "lrmd",
            Subsystem::AttributeDaemon => "attribute_daemon",
            Subsystem::Stonith => "stonith",
            Subsystem::Other(name) => name,
        }
    }
}

impl Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Subsystem {
    fn from(value: String) -> Self {
        Subsystem::parse(&value)
    }
}

impl From<Subsystem> for String {
    fn from(value: Subsystem) -> Self {
        value.as_str().to_string()
    }
}

/// Numeric subsystem destinations for code-addressed cluster transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SubsystemCode {
    /// The local configuration store.
    Cib = 1,
    /// The cluster controller.
    Controller = 2,
    /// The resource-agent executor.
    Lrmd = 3,
    /// The attribute daemon.
    AttributeDaemon = 4,
    /// The transition engine.
    TransitionEngine = 5,
    /// The scheduler.
    Scheduler = 6,
    /// The fencing daemon. Highest assigned code.
    Stonith = 7,
}

impl SubsystemCode {
    /// Maps a subsystem to its transport code.
    ///
    /// Subsystems with no code of their own (the DC roles, transient client
    /// ids) are carried under the controller's code, which owns the
    /// receive-side demultiplexing for them.
    pub fn for_transport(sys: &Subsystem) -> Self {
        match sys {
            Subsystem::Cib | Subsystem::DcCib => SubsystemCode::Cib,
            Subsystem::Lrmd => SubsystemCode::Lrmd,
            Subsystem::AttributeDaemon => SubsystemCode::AttributeDaemon,
            Subsystem::TransitionEngine => SubsystemCode::TransitionEngine,
            Subsystem::Scheduler => SubsystemCode::Scheduler,
            Subsystem::Stonith => SubsystemCode::Stonith,
            Subsystem::Controller | Subsystem::Dc | Subsystem::Other(_) => {
                SubsystemCode::Controller
            }
        }
    }
}

// ============================================================================
// Tasks
// ============================================================================

/// The operation an envelope asks for (or answers).
///
/// Interned from the wire string once, so dispatch is a `match` rather than
/// repeated string comparisons. Unrecognized names are preserved in
/// [`Task::Other`] for logging.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Task {
    Hello,
    Noop,
    Ping,
    NodeInfo,
    JoinAnnounce,
    JoinOffer,
    JoinRequest,
    JoinConfirm,
    JoinAckNack,
    Vote,
    Novote,
    Throttle,
    ClearFailcount,
    Shutdown,
    ShutdownReq,
    LocalShutdown,
    RemoteState,
    LrmDelete,
    LrmFail,
    LrmRefresh,
    Reprobe,
    RmNodeCache,
    MaintenanceNodes,
    PeCalc,
    Other(String),
}

impl Task {
    /// Parses a task name.
    pub fn parse(name: &str) -> Self {
        match name {
            "hello" => Task::Hello,
            "noop" => Task::Noop,
            "ping" => Task::Ping,
            "node_info" => Task::NodeInfo,
            "join_announce" => Task::JoinAnnounce,
            "join_offer" => Task::JoinOffer,
            "join_request" => Task::JoinRequest,
            "join_confirm" => Task::JoinConfirm,
            "join_ack_nack" => Task::JoinAckNack,
            "vote" => Task::Vote,
            "novote" => Task::Novote,
            "throttle" => Task::Throttle,
            "clear_failcount" => Task::ClearFailcount,
            "shutdown" => Task::Shutdown,
            "shutdown_req" => Task::ShutdownReq,
            "local_shutdown" => Task::LocalShutdown,
            "remote_state" => Task::RemoteState,
            "lrm_delete" => Task::LrmDelete,
            "lrm_fail" => Task::LrmFail,
            "lrm_refresh" => Task::LrmRefresh,
            "reprobe" => Task::Reprobe,
            "rm_node_cache" => Task::RmNodeCache,
            "maintenance_nodes" => Task::MaintenanceNodes,
            "pe_calc" => Task::PeCalc,
            _ => Task::Other(name.to_string()),
        }
    }

    /// The wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Task::Hello => "hello",
            Task::Noop => "noop",
            Task::Ping => "ping",
            Task::NodeInfo => "node_info",
            Task::JoinAnnounce => "join_announce",
            Task::JoinOffer => "join_offer",
            Task::JoinRequest => "join_request",
            Task::JoinConfirm => "join_confirm",
            Task::JoinAckNack => "join_ack_nack",
            Task::Vote => "vote",
            Task::Novote => "novote",
            Task::Throttle => "throttle",
            Task::ClearFailcount => "clear_failcount",
            Task::Shutdown => "shutdown",
            Task::ShutdownReq => "shutdown_req",
            Task::LocalShutdown => "local_shutdown",
            Task::RemoteState => "remote_state",
            Task::LrmDelete => "lrm_delete",
            Task::LrmFail => "lrm_fail",
            Task::LrmRefresh => "lrm_refresh",
            Task::Reprobe => "reprobe",
            Task::RmNodeCache => "rm_node_cache",
            Task::MaintenanceNodes => "maintenance_nodes",
            Task::PeCalc => "pe_calc",
            Task::Other(name) => name,
        }
    }
}

impl Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Task {
    fn from(value: String) -> Self {
        Task::parse(&value)
    }
}

impl From<Task> for String {
    fn from(value: Task) -> Self {
        value.as_str().to_string()
    }
}

// ============================================================================
// Envelope
// ============================================================================

static REFERENCE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A controller message with addressing and correlation information.
///
/// `host_to`/`host_from` are node names; `None` on `host_to` means "no
/// particular node" (which the router interprets per addressee). The
/// `reference` correlates responses with the request they answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Request or response.
    #[serde(rename = "type")]
    pub msg_type: MessageType,

    /// The operation, when one was given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,

    /// Destination subsystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_to: Option<Subsystem>,

    /// Originating subsystem (a client id for transient IPC clients).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sys_from: Option<Subsystem>,

    /// Destination node name, if targeted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_to: Option<String>,

    /// Originating node name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_from: Option<String>,

    /// Opaque correlation id.
    pub reference: String,

    /// Join-protocol round identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_id: Option<String>,

    /// Advertised feature-set version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Nested structured data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Builds a request envelope with a fresh correlation reference.
    pub fn request(
        task: Task,
        sys_to: Subsystem,
        host_to: Option<&str>,
        sys_from: Subsystem,
    ) -> Self {
        let seq = REFERENCE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let reference = format!("{}-{seq}", task.as_str());
        Self {
            msg_type: MessageType::Request,
            task: Some(task),
            sys_to: Some(sys_to),
            sys_from: Some(sys_from),
            host_to: host_to.map(ToString::to_string),
            host_from: None,
            reference,
            join_id: None,
            version: None,
            payload: None,
        }
    }

    /// Attaches a payload. Builder-style.
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Stamps the originating node name. Builder-style.
    pub fn with_host_from(mut self, host_from: &str) -> Self {
        self.host_from = Some(host_from.to_string());
        self
    }

    /// Builds the response to this request.
    ///
    /// Addressing is reversed (`sys_to` ← `sys_from`, `host_to` ←
    /// `host_from`) and the correlation reference is preserved. `host_from`
    /// is left unset; the outbound path stamps it with the local node name.
    pub fn reply(&self, payload: Option<Value>) -> Envelope {
        Envelope {
            msg_type: MessageType::Response,
            task: self.task.clone(),
            sys_to: self.sys_from.clone(),
            sys_from: self.sys_to.clone(),
            host_to: self.host_from.clone(),
            host_from: None,
            reference: self.reference.clone(),
            join_id: self.join_id.clone(),
            version: None,
            payload,
        }
    }

    /// Reads a string field from the payload object.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.as_ref()?.get(key)?.as_str()
    }

    /// Reads an integer field from the payload object.
    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        self.payload.as_ref()?.get(key)?.as_i64()
    }

    /// Reads a boolean field from the payload object.
    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        self.payload.as_ref()?.get(key)?.as_bool()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn ping_request() -> Envelope {
        Envelope::request(
            Task::Ping,
            Subsystem::Controller,
            Some("n1"),
            Subsystem::Other("client-77".into()),
        )
    }

    #[test_case("controller", Subsystem::Controller; "lowercase")]
    #[test_case("CONTROLLER", Subsystem::Controller; "uppercase")]
    #[test_case("Dc", Subsystem::Dc)]
    #[test_case("transition_engine", Subsystem::TransitionEngine)]
    #[test_case("crmadmin-4242", Subsystem::Other("crmadmin-4242".into()))]
    fn subsystem_parse_is_case_insensitive(input: &str, expected: Subsystem) {
        assert_eq!(Subsystem::parse(input), expected);
    }

    #[test]
    fn task_round_trips_through_wire_name() {
        for name in [
            "hello",
            "ping",
            "join_request",
            "shutdown_req",
            "rm_node_cache",
            "pe_calc",
        ] {
            assert_eq!(Task::parse(name).as_str(), name);
        }
    }

    #[test]
    fn unknown_task_is_preserved() {
        let task = Task::parse("resurrect_node");
        assert_eq!(task, Task::Other("resurrect_node".into()));
        assert_eq!(task.as_str(), "resurrect_node");
    }

    #[test]
    fn codes_clamp_unmapped_subsystems_to_controller() {
        assert_eq!(
            SubsystemCode::for_transport(&Subsystem::Dc),
            SubsystemCode::Controller
        );
        assert_eq!(
            SubsystemCode::for_transport(&Subsystem::Other("whatever".into())),
            SubsystemCode::Controller
        );
        assert_eq!(
            SubsystemCode::for_transport(&Subsystem::Stonith),
            SubsystemCode::Stonith
        );
    }

    #[test]
    fn references_are_unique() {
        let a = ping_request();
        let b = ping_request();
        assert_ne!(a.reference, b.reference);
    }

    #[test]
    fn reply_reverses_addressing_and_keeps_reference() {
        let req = ping_request().with_host_from("n2");
        let reply = req.reply(Some(json!({"status": "ok"})));

        assert_eq!(reply.msg_type, MessageType::Response);
        assert_eq!(reply.reference, req.reference);
        assert_eq!(reply.sys_to, Some(Subsystem::Other("client-77".into())));
        assert_eq!(reply.sys_from, Some(Subsystem::Controller));
        assert_eq!(reply.host_to.as_deref(), Some("n2"));
        assert_eq!(reply.host_from, None);
    }

    #[test]
    fn envelope_serde_round_trip() {
        let msg = Envelope::request(
            Task::JoinRequest,
            Subsystem::Dc,
            Some("n2"),
            Subsystem::Controller,
        )
        .with_payload(json!({"join_id": 3}));

        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: Envelope = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, msg);
        assert!(encoded.contains("\"join_request\""));
    }

    #[test]
    fn payload_accessors() {
        let msg = ping_request().with_payload(json!({
            "uname": "n3",
            "id": 7,
            "in_cluster": true,
        }));
        assert_eq!(msg.payload_str("uname"), Some("n3"));
        assert_eq!(msg.payload_i64("id"), Some(7));
        assert_eq!(msg.payload_bool("in_cluster"), Some(true));
        assert_eq!(msg.payload_str("missing"), None);
    }
}
