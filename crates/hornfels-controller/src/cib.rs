//! Configuration store (CIB) client seam.
//!
//! The cluster-wide configuration store lives outside this crate; the
//! controller only needs a synchronous typed client for sign-on, node-uuid
//! resolution, and attribute CRUD. Implementations wrap the real store; the
//! test suite substitutes an in-memory one.

use std::fmt::{self, Display};

/// Outcome of a configuration store call.
///
/// Only [`CibStatus::Ok`] is success. `NotExists` is a normal answer for
/// reads of absent data and must be surfaced to the caller unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CibStatus {
    /// The call succeeded.
    Ok,
    /// The addressed object does not exist.
    NotExists,
    /// No connection to the store.
    NotConnected,
    /// The store rejected our credentials.
    AuthFailed,
    /// The call reached the store and failed there.
    OperationFailed,
}

impl Display for CibStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CibStatus::Ok => "ok",
            CibStatus::NotExists => "not_exists",
            CibStatus::NotConnected => "not_connected",
            CibStatus::AuthFailed => "auth_failed",
            CibStatus::OperationFailed => "operation_failed",
        };
        f.write_str(name)
    }
}

/// Synchronous client for the cluster configuration store.
pub trait CibClient {
    /// Registers this process with the store under `system`.
    fn sign_on(&mut self, system: &str) -> CibStatus;

    /// Deregisters this process.
    fn sign_off(&mut self);

    /// Resolves a node name to its stable identifier.
    fn query_node_uuid(&mut self, uname: &str) -> Result<String, CibStatus>;

    /// Reads a node attribute.
    fn read_attr(&mut self, node: &str, name: &str) -> Result<String, CibStatus>;

    /// Writes a node attribute.
    fn update_attr(&mut self, node: &str, name: &str, value: &str) -> CibStatus;

    /// Deletes a node attribute.
    fn delete_attr(&mut self, node: &str, name: &str) -> CibStatus;
}
