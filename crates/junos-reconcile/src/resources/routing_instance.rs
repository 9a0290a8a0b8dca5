//! Routing instance (`routing-instances <name>`)

use serde::{Deserialize, Serialize};

use junos_common::{config_path, ConfigPath, JunosError, JunosResult, Statement};

use super::{exists_under, lines_under, parse_number, require_name, Resource, ResourceType};
use crate::keywords::{fields, ROUTING_INSTANCES};

/// Instance types the reconciler manages
pub const INSTANCE_TYPES: &[&str] = &[
    "virtual-router",
    "vrf",
    "forwarding",
    "evpn",
    "virtual-switch",
];

/// Routing instance attributes.
///
/// Interface memberships are owned by the logical interfaces; they are
/// neither written nor decoded here, but deleting the instance removes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInstance {
    pub name: String,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub route_distinguisher: Option<String>,
    #[serde(default)]
    pub vrf_target: Option<String>,
    /// `routing-options autonomous-system`
    #[serde(default)]
    pub as_number: Option<u32>,
}

impl RoutingInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn root(name: &str) -> ConfigPath {
        config_path!(ROUTING_INSTANCES, name)
    }
}

impl Resource for RoutingInstance {
    const TYPE: ResourceType = ResourceType::RoutingInstance;

    fn id(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> JunosResult<()> {
        require_name("name", &self.name)?;
        if let Some(instance_type) = &self.instance_type {
            if !INSTANCE_TYPES.contains(&instance_type.as_str()) {
                return Err(JunosError::invalid_config(
                    "instance_type",
                    format!("unknown instance type '{}'", instance_type),
                ));
            }
        }
        if self.instance_type.as_deref() == Some("vrf") && self.route_distinguisher.is_none() {
            return Err(JunosError::invalid_config(
                "route_distinguisher",
                format!("vrf instance '{}' needs a route distinguisher", self.name),
            ));
        }
        Ok(())
    }

    fn statements(&self) -> Vec<Statement> {
        let root = Self::root(&self.name);
        let leaves = [
            (fields::INSTANCE_TYPE, &self.instance_type),
            (fields::DESCRIPTION, &self.description),
            (fields::ROUTE_DISTINGUISHER, &self.route_distinguisher),
            (fields::VRF_TARGET, &self.vrf_target),
        ];

        let mut stmts: Vec<Statement> = leaves
            .into_iter()
            .filter_map(|(leaf, value)| {
                value
                    .as_ref()
                    .map(|v| Statement::set(root.child(leaf), Some(v.clone())))
            })
            .collect();
        if let Some(as_number) = self.as_number {
            stmts.push(Statement::set(
                root.join([fields::ROUTING_OPTIONS, fields::AUTONOMOUS_SYSTEM]),
                Some(as_number.to_string()),
            ));
        }
        if stmts.is_empty() {
            stmts.push(Statement::set(root, None));
        }
        stmts
    }

    fn owned_paths(&self) -> Vec<ConfigPath> {
        vec![Self::root(&self.name)]
    }

    fn read_paths(id: &str) -> JunosResult<Vec<ConfigPath>> {
        require_name("name", id)?;
        Ok(vec![Self::root(id)])
    }

    fn decode(id: &str, lines: &[Vec<String>]) -> JunosResult<Option<Self>> {
        let root = Self::root(id);
        if !exists_under(lines, &root) {
            return Ok(None);
        }

        let mut instance = RoutingInstance::new(id);
        for rest in lines_under(lines, &root) {
            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
            match rest.as_slice() {
                [fields::INSTANCE_TYPE, value] => instance.instance_type = Some(value.to_string()),
                [fields::DESCRIPTION, value] => instance.description = Some(value.to_string()),
                [fields::ROUTE_DISTINGUISHER, value] => {
                    instance.route_distinguisher = Some(value.to_string())
                }
                [fields::VRF_TARGET, value] => instance.vrf_target = Some(value.to_string()),
                [fields::ROUTING_OPTIONS, fields::AUTONOMOUS_SYSTEM, value, ..] => {
                    let context = format!("autonomous-system of {}", id);
                    instance.as_number = Some(parse_number(&context, value)?);
                }
                _ => {}
            }
        }
        Ok(Some(instance))
    }
}
