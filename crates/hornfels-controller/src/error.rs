//! Error types for the controller core.

use thiserror::Error;

use crate::cib::CibStatus;

/// Controller errors.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file did not parse.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration file did not serialize.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// The configuration store refused our sign-on.
    #[error("CIB sign-on failed: {0}")]
    CibSignOn(CibStatus),

    /// A configuration store call failed.
    ///
    /// `NotExists` is surfaced unchanged so callers can distinguish
    /// missing data from a broken connection.
    #[error("CIB call failed: {0}")]
    Cib(CibStatus),
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, Error>;
