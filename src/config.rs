use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use uuid::Uuid;

use crate::algorithms::AlgorithmKind;
use crate::algorithms::distance_vector::DEFAULT_MAX_DISTANCE;
use crate::{Cost, NodeName};

pub const DEFAULT_PORT: u16 = 23333;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unique name in the overlay; a random one is picked when absent
    pub name: Option<NodeName>,
    /// Listening port, 0 picks an ephemeral one
    pub port: u16,
    pub algorithm: AlgorithmKind,
    /// This node computes routes for a centralized overlay
    pub coordinator: bool,
    /// `host:port` of the coordinator, for centralized members
    pub coordinator_addr: Option<String>,
    pub connect_timeout_secs: u64,
    /// Distance-vector distances at or above this are unreachable
    pub max_distance: Cost,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            port: DEFAULT_PORT,
            algorithm: AlgorithmKind::LinkState,
            coordinator: false,
            coordinator_addr: None,
            connect_timeout_secs: 5,
            max_distance: DEFAULT_MAX_DISTANCE,
        }
    }
}

impl NodeConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Fill in a random name when none was configured.
    pub fn resolve_name(&mut self) -> NodeName {
        self.name
            .get_or_insert_with(|| Uuid::new_v4().simple().to_string()[..6].to_uppercase())
            .clone()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
