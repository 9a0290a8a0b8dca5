//! Desired state file read by the daemon
//!
//! ```toml
//! [[resource]]
//! type = "routing_instance"
//! name = "blue"
//! instance_type = "virtual-router"
//!
//! [[resource]]
//! type = "interface_logical"
//! name = "ge-0/0/0.100"
//! vlan_id = 100
//! routing_instance = "blue"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use junos_common::{JunosError, JunosResult};

use crate::resources::{ResourceState, ResourceType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DesiredState {
    #[serde(rename = "resource", default)]
    pub resources: Vec<ResourceState>,
}

impl DesiredState {
    /// Reads and validates a desired state file
    pub fn load(path: impl AsRef<Path>) -> JunosResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            JunosError::invalid_config(
                path.display().to_string(),
                format!("Failed to read desired state: {}", e),
            )
        })?;
        let state = Self::parse(&content)
            .map_err(|e| JunosError::invalid_config(path.display().to_string(), e.to_string()))?;
        state.validate()?;
        Ok(state)
    }

    /// Parse desired state from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Every object must be valid and appear once
    pub fn validate(&self) -> JunosResult<()> {
        let mut seen: HashSet<(ResourceType, String)> = HashSet::new();
        for resource in &self.resources {
            resource.validate()?;
            if !seen.insert((resource.resource_type(), resource.id())) {
                return Err(JunosError::invalid_config(
                    "resource",
                    format!("{} is declared twice", resource.describe()),
                ));
            }
        }
        Ok(())
    }

    /// Objects in apply order: referenced types before referencing ones,
    /// file order within a type
    pub fn ordered(&self) -> Vec<&ResourceState> {
        ResourceType::ALL
            .iter()
            .flat_map(|t| self.resources.iter().filter(move |r| r.resource_type() == *t))
            .collect()
    }
}
