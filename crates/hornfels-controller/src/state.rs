//! Controller state.
//!
//! One [`Controller`] value owns everything the routing core mutates: the
//! FSA input queue, the input register, the DC bookkeeping, the peer cache,
//! and the IPC client registry. Handlers take `&mut Controller`; there are
//! no process-wide singletons.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use tracing::info;

use hornfels_membership::PeerCache;

use crate::cib::CibClient;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::hello::ClientRegistry;
use crate::queue::FsaQueue;

// ============================================================================
// FSA Macro-States
// ============================================================================

/// The controller's lifecycle macro-states.
///
/// The transition table lives with the engine; the routing core reads the
/// current state for role gating and reports it in ping replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsaState {
    /// Cluster is quiet; we are the DC with nothing to do.
    Idle,
    /// An election is in progress.
    Election,
    /// Collecting join requests (DC).
    Integration,
    /// Finalizing a join round (DC).
    FinalizeJoin,
    /// A member, not the DC.
    NotDc,
    /// Waiting on a scheduler calculation (DC).
    PolicyEngine,
    /// Recovering from a handler failure.
    Recovery,
    /// Giving up DC-ship.
    ReleaseDc,
    /// Process is coming up.
    Starting,
    /// Waiting to be offered membership.
    Pending,
    /// Orderly shutdown in progress.
    Stopping,
    /// Immediate teardown.
    Terminate,
    /// Executing a transition graph (DC).
    TransitionEngine,
    /// Input consumption suspended.
    Halt,
}

impl Display for FsaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsaState::Idle => "s_idle",
            FsaState::Election => "s_election",
            FsaState::Integration => "s_integration",
            FsaState::FinalizeJoin => "s_finalize_join",
            FsaState::NotDc => "s_not_dc",
            FsaState::PolicyEngine => "s_policy_engine",
            FsaState::Recovery => "s_recovery",
            FsaState::ReleaseDc => "s_release_dc",
            FsaState::Starting => "s_starting",
            FsaState::Pending => "s_pending",
            FsaState::Stopping => "s_stopping",
            FsaState::Terminate => "s_terminate",
            FsaState::TransitionEngine => "s_transition_engine",
            FsaState::Halt => "s_halt",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Input Register
// ============================================================================

/// Long-lived condition bits the FSA consults alongside its state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRegister(u64);

impl InputRegister {
    /// Nothing set.
    pub const NONE: InputRegister = InputRegister(0);
    /// We are the Designated Coordinator.
    pub const THE_DC: InputRegister = InputRegister(1 << 0);
    /// An orderly shutdown of this node has been requested.
    pub const SHUTDOWN: InputRegister = InputRegister(1 << 1);
    /// Do not respawn after exit.
    pub const STAYDOWN: InputRegister = InputRegister(1 << 2);
    /// The configuration store connection is up.
    pub const CIB_CONNECTED: InputRegister = InputRegister(1 << 3);

    /// Returns whether every bit in `other` is set.
    pub fn contains(self, other: InputRegister) -> bool {
        self.0 & other.0 == other.0
    }

    /// Sets the bits of `other`.
    pub fn insert(&mut self, other: InputRegister) {
        self.0 |= other.0;
    }

    /// Clears the bits of `other`.
    pub fn remove(&mut self, other: InputRegister) {
        self.0 &= !other.0;
    }
}

/// Status of the transition graph the DC is executing, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionStatus {
    /// Whether every action in the graph has completed.
    pub complete: bool,
}

// ============================================================================
// Controller
// ============================================================================

/// The per-node controller core.
#[derive(Debug)]
pub struct Controller {
    /// Static configuration.
    pub config: ControllerConfig,
    /// The FSA input queue and its registers.
    pub queue: FsaQueue,
    /// Current FSA macro-state.
    pub fsa_state: FsaState,
    /// Condition bits.
    pub registers: InputRegister,
    /// Name of the current DC, if one is known.
    pub our_dc: Option<String>,
    /// This node's stable identifier, once resolved.
    pub our_uuid: Option<String>,
    /// Correlation reference of the outstanding scheduler request.
    pub pe_reference: Option<String>,
    /// Whether our partition has quorum.
    pub has_quorum: bool,
    /// The cluster peer cache.
    pub peers: PeerCache,
    /// Local IPC clients and proxy sessions.
    pub clients: ClientRegistry,
    /// The transition graph in flight, if we are DC and one exists.
    pub transition: Option<TransitionStatus>,
}

impl Controller {
    /// Creates a controller in its initial state.
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            queue: FsaQueue::new(),
            fsa_state: FsaState::Starting,
            registers: InputRegister::NONE,
            our_dc: None,
            our_uuid: None,
            pe_reference: None,
            has_quorum: false,
            peers: PeerCache::new(),
            clients: ClientRegistry::new(),
            transition: None,
        }
    }

    /// This node's name.
    pub fn our_uname(&self) -> &str {
        &self.config.node_name
    }

    /// Returns whether this node currently holds the DC role.
    pub fn am_i_dc(&self) -> bool {
        self.registers.contains(InputRegister::THE_DC)
    }

    /// Connects to the configuration store and resolves our identity.
    ///
    /// Sign-on is synchronous; anything but `Ok` aborts startup. The local
    /// node's uuid is resolved through the same client and cached on both
    /// the controller and its peer-cache entry.
    pub fn startup(&mut self, cib: &mut dyn CibClient) -> Result<()> {
        let status = cib.sign_on("controller");
        if status != crate::cib::CibStatus::Ok {
            return Err(Error::CibSignOn(status));
        }
        self.registers.insert(InputRegister::CIB_CONNECTED);

        let uname = self.config.node_name.clone();
        let uuid = cib.query_node_uuid(&uname).map_err(Error::Cib)?;
        self.peers
            .ensure_uuid(&uname, |_| Some(uuid.clone()));
        self.our_uuid = Some(uuid);

        info!(node = %uname, "controller connected to the configuration store");
        Ok(())
    }

    /// Releases the configuration store connection during teardown.
    pub fn disconnect_cib(&mut self, cib: &mut dyn CibClient) {
        if self.registers.contains(InputRegister::CIB_CONNECTED) {
            cib.sign_off();
            self.registers.remove(InputRegister::CIB_CONNECTED);
            info!("controller disconnected from the configuration store");
        }
    }
}
