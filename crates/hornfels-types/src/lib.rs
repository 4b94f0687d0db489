//! # hornfels-types: Core types for `Hornfels`
//!
//! This crate contains shared leaf types used across the `Hornfels` system:
//! - Process exit codes ([`ExitCode`])
//! - Protocol feature-set versioning ([`FeatureSet`], [`FEATURE_SET`])

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ============================================================================
// Exit Codes
// ============================================================================

/// Process exit codes for the controller daemon.
///
/// `Software` marks an internal invariant violation (the process must not
/// continue with corrupted state); `Fatal` marks a condition that no restart
/// will fix without administrator involvement, such as a protocol
/// incompatibility with the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitCode {
    /// Clean exit.
    Ok,
    /// Internal error; a respawn is expected to recover.
    Software,
    /// Do not respawn; administrator intervention is required.
    Fatal,
}

impl ExitCode {
    /// Returns the numeric process exit status.
    pub fn as_i32(self) -> i32 {
        match self {
            ExitCode::Ok => 0,
            ExitCode::Software => 70,
            ExitCode::Fatal => 112,
        }
    }
}

impl Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitCode::Ok => "ok",
            ExitCode::Software => "software",
            ExitCode::Fatal => "fatal",
        };
        write!(f, "{name}")
    }
}

// ============================================================================
// Feature Set
// ============================================================================

/// The feature set this build speaks.
///
/// Advertised during the join handshake; see [`FeatureSet::compatible_with`]
/// for the rule a joining node applies against the coordinator's version.
pub const FEATURE_SET: &str = "3.10.0";

/// Feature set advertised before the version field became mandatory.
///
/// A join offer with no version is assumed to come from a coordinator at
/// this revision.
pub const FEATURE_SET_LEGACY: &str = "3.0.14";

/// A parsed protocol feature-set version.
///
/// Only the first two components participate in compatibility decisions;
/// anything after the minor component is carried for display but ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Wire-protocol generation; must match exactly across the cluster.
    pub major: u32,
    /// Revision within a generation; newer nodes understand older peers.
    pub minor: u32,
}

impl FeatureSet {
    /// Creates a feature set from its components.
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// The feature set compiled into this build.
    pub fn local() -> Self {
        FEATURE_SET
            .parse()
            .expect("compiled-in feature set must parse")
    }

    /// Returns whether a node at `self` may join a coordinator advertising
    /// `dc`.
    ///
    /// The major component must match and the coordinator's minor component
    /// must be at least ours: a coordinator never schedules for a node whose
    /// protocol revision it does not understand.
    pub fn compatible_with(self, dc: FeatureSet) -> bool {
        self.major == dc.major && dc.minor >= self.minor
    }
}

impl FromStr for FeatureSet {
    type Err = FeatureSetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| FeatureSetParseError::Empty)?
            .parse()
            .map_err(|_| FeatureSetParseError::BadComponent(s.to_string()))?;
        let minor = match parts.next() {
            Some(p) => p
                .parse()
                .map_err(|_| FeatureSetParseError::BadComponent(s.to_string()))?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

impl Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Errors from parsing a feature-set string.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureSetParseError {
    /// The version string was empty.
    #[error("empty feature-set string")]
    Empty,

    /// A version component was not a non-negative integer.
    #[error("malformed feature-set string: {0:?}")]
    BadComponent(String),
}
