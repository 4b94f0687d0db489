//! Controller configuration management.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How the cluster transport addresses subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Destinations are numeric subsystem codes.
    Tagged,
    /// Destinations are subsystem names carried in the envelope.
    Named,
}

/// Configuration for a controller instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// This node's name in the cluster.
    pub node_name: String,

    /// Addressing flavor of the configured cluster transport.
    pub transport: TransportKind,
}

impl ControllerConfig {
    /// Creates a configuration for a node on a code-addressed transport.
    pub fn new(node_name: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            transport: TransportKind::Tagged,
        }
    }

    /// Loads controller configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves controller configuration to disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
