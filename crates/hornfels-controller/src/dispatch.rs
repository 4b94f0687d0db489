//! The request dispatcher.
//!
//! For messages the router hands back, map the task to an FSA input or a
//! synchronous handler. Some operations are only meaningful on the DC;
//! requests that reach the wrong role fall through to the unexpected-task
//! arm and are dropped with an error log.

use std::borrow::Cow;

use tracing::{debug, error, info, trace, warn};

use hornfels_membership::JoinExpectation;
use hornfels_types::{ExitCode, FeatureSet, FEATURE_SET_LEGACY};
use hornfels_wire::{Envelope, MessageType, Subsystem, Task};

use crate::effect::{Effect, Output};
use crate::queue::{ActionSet, Cause, FsaInput, RaisedPayload};
use crate::state::{Controller, FsaState, InputRegister};

impl Controller {
    /// Classifies a message into the FSA input to raise.
    ///
    /// Responses are fully handled here and always yield `Null`. For
    /// requests, the returned envelope is normally the borrowed original;
    /// the executor-bound tasks return a rewritten copy for re-routing.
    pub(crate) fn handle_message<'a>(
        &mut self,
        msg: &'a Envelope,
        cause: Cause,
        out: &mut Output,
    ) -> (FsaInput, Cow<'a, Envelope>) {
        match msg.msg_type {
            MessageType::Request => self.handle_request(msg, cause, out),
            MessageType::Response => {
                self.handle_response(msg, out);
                (FsaInput::Null, Cow::Borrowed(msg))
            }
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    fn handle_request<'a>(
        &mut self,
        msg: &'a Envelope,
        cause: Cause,
        out: &mut Output,
    ) -> (FsaInput, Cow<'a, Envelope>) {
        let borrowed = Cow::Borrowed(msg);

        let Some(task) = msg.task.clone() else {
            error!(?msg, "bad message: no task");
            return (FsaInput::Null, borrowed);
        };

        if task == Task::ShutdownReq {
            // Record that the sender is on its way out whether or not we
            // are the one coordinating the stop.
            if let Some(from) = msg.host_from.as_deref().filter(|h| !h.is_empty()) {
                self.peers.update_expected(from, JoinExpectation::Down);
            }
            if !self.am_i_dc() {
                return (FsaInput::Null, borrowed);
            }
        }

        // DC-only operations.
        if self.am_i_dc() {
            match task {
                Task::JoinAnnounce => return (FsaInput::NodeJoin, borrowed),
                Task::JoinRequest => return (FsaInput::JoinRequest, borrowed),
                Task::JoinConfirm => return (FsaInput::JoinResult, borrowed),
                Task::Shutdown => {
                    let dc_match = msg.host_from.as_deref() == self.our_dc.as_deref()
                        && self.our_dc.is_some();

                    if self.registers.contains(InputRegister::SHUTDOWN) {
                        info!("shutting ourselves down (DC)");
                        return (FsaInput::Stop, borrowed);
                    } else if dc_match {
                        error!(
                            "we didn't ask to be shut down, yet our TE is telling us to; \
                             better get out now"
                        );
                        return (FsaInput::Terminate, borrowed);
                    } else if self.fsa_state != FsaState::Stopping {
                        error!("another node is asking us to shut down but we think we're ok");
                        return (FsaInput::Election, borrowed);
                    }
                    // Already stopping: fall through to the common arms,
                    // where an unmatched DC shutdown is reported.
                }
                Task::ShutdownReq => {
                    return (self.handle_shutdown_request(msg, out), borrowed);
                }
                Task::RemoteState => {
                    return (self.handle_remote_state(msg), borrowed);
                }
                _ => {}
            }
        }

        // Operations valid in any role.
        match task {
            Task::Novote => {
                self.queue.raise(
                    Cause::HaMessage,
                    FsaInput::Null,
                    RaisedPayload::Message(msg),
                    ActionSet::ELECTION_COUNT | ActionSet::ELECTION_CHECK,
                    false,
                    "handle_request",
                );
                (FsaInput::Null, borrowed)
            }

            Task::Throttle => {
                out.push(Effect::UpdateThrottle {
                    node: msg.host_from.clone(),
                    payload: msg.payload.clone(),
                });
                if self.am_i_dc()
                    && let Some(transition) = self.transition
                    && !transition.complete
                {
                    debug!("throttle changed; triggering graph re-evaluation");
                    out.push(Effect::TriggerGraph);
                }
                (FsaInput::Null, borrowed)
            }

            Task::ClearFailcount => (self.handle_failcount_op(msg, out), borrowed),

            Task::Vote => {
                // Count the vote and decide what to do after that.
                self.queue.raise(
                    Cause::HaMessage,
                    FsaInput::Null,
                    RaisedPayload::Message(msg),
                    ActionSet::ELECTION_COUNT | ActionSet::ELECTION_CHECK,
                    false,
                    "handle_request",
                );
                if self.fsa_state == FsaState::Halt {
                    debug!("forcing an election from s_halt");
                    return (FsaInput::Election, borrowed);
                }
                (FsaInput::Null, borrowed)
            }

            Task::JoinOffer => {
                if !self.verify_feature_set(msg, out) {
                    return (FsaInput::Null, borrowed);
                }
                debug!(join_id = ?msg.join_id, "raising join offer");
                (FsaInput::JoinOffer, borrowed)
            }

            Task::JoinAckNack => {
                debug!(join_id = ?msg.join_id, "raising join result");
                (FsaInput::JoinResult, borrowed)
            }

            Task::LrmDelete | Task::LrmFail | Task::LrmRefresh | Task::Reprobe => {
                let mut rewritten = msg.clone();
                rewritten.sys_to = Some(Subsystem::Lrmd);
                (FsaInput::Router, Cow::Owned(rewritten))
            }

            Task::Noop => (FsaInput::Null, borrowed),

            Task::LocalShutdown => {
                out.push(Effect::RequestShutdown);
                (FsaInput::Null, borrowed)
            }

            Task::Ping => (self.handle_ping(msg, out), borrowed),

            Task::NodeInfo => (self.handle_node_info_request(msg, out), borrowed),

            Task::RmNodeCache => (self.handle_node_cache_removal(msg, cause, out), borrowed),

            Task::MaintenanceNodes => {
                out.push(Effect::MaintenanceNodes {
                    payload: msg.payload.clone(),
                });
                (FsaInput::Null, borrowed)
            }

            Task::Shutdown if !self.am_i_dc() => {
                let host_from = msg.host_from.as_deref().filter(|h| !h.is_empty());
                let dc_match = host_from == self.our_dc.as_deref() && host_from.is_some();

                if dc_match || self.our_dc.is_none() {
                    if !self.registers.contains(InputRegister::SHUTDOWN) {
                        error!("we didn't ask to be shut down, yet our DC is telling us to");
                        self.registers.insert(InputRegister::STAYDOWN);
                        return (FsaInput::Stop, borrowed);
                    }
                    info!("shutting down");
                    (FsaInput::Stop, borrowed)
                } else {
                    warn!(from = ?host_from, "discarding shutdown request");
                    (FsaInput::Null, borrowed)
                }
            }

            other => {
                error!(
                    task = %other,
                    role = if self.am_i_dc() { "DC" } else { "non-DC" },
                    "unexpected request"
                );
                warn!(?msg, "unexpected request");
                (FsaInput::Null, borrowed)
            }
        }
    }

    // ========================================================================
    // Responses
    // ========================================================================

    fn handle_response(&mut self, msg: &Envelope, out: &mut Output) {
        let Some(task) = msg.task.clone() else {
            error!(?msg, "bad message: no task");
            return;
        };

        if self.am_i_dc() && task == Task::PeCalc {
            // The answer may have been superseded by a newer request.
            if msg.reference.is_empty() {
                error!(task = %task, "ignoring calculation with no reference");
            } else if Some(msg.reference.as_str()) == self.pe_reference.as_deref() {
                out.push(Effect::StopSchedulerTimer);
                self.queue.raise_later(
                    Cause::IpcMessage,
                    FsaInput::PeSuccess,
                    RaisedPayload::Message(msg),
                    "handle_response",
                );
            } else {
                info!(reference = %msg.reference, "scheduler calculation is obsolete");
            }
        } else if matches!(task, Task::Vote | Task::ShutdownReq | Task::Shutdown) {
            // Acknowledged elsewhere; nothing to do here.
        } else {
            error!(
                task = %task,
                from = ?msg.host_from,
                role = if self.am_i_dc() { "DC" } else { "controller" },
                "unexpected response"
            );
        }
    }

    // ========================================================================
    // Feature Set
    // ========================================================================

    /// Checks the DC's advertised feature set against ours.
    ///
    /// An incompatible coordinator means nothing will improve without an
    /// administrator: mark the node staydown and ask the runtime to exit.
    fn verify_feature_set(&mut self, msg: &Envelope, out: &mut Output) -> bool {
        // An offer without a version predates the field becoming mandatory.
        let advertised = msg.version.as_deref().unwrap_or(FEATURE_SET_LEGACY);
        let local = FeatureSet::local();

        let compatible = advertised
            .parse::<FeatureSet>()
            .is_ok_and(|dc| local.compatible_with(dc));

        if compatible {
            trace!(local = %local, dc = advertised, "feature sets are compatible");
            true
        } else {
            error!(local = %local, dc = advertised, "local feature set is incompatible with DC's");
            self.registers.insert(InputRegister::STAYDOWN);
            out.push(Effect::Exit(ExitCode::Fatal));
            false
        }
    }
}
