//! Physical interface (`interfaces <name>`)

use serde::{Deserialize, Serialize};

use junos_common::{config_path, ConfigPath, JunosError, JunosResult, Statement};

use super::{exists_under, lines_under, parse_number, require_name, Resource, ResourceType};
use crate::keywords::{fields, INTERFACES};

/// Smallest MTU the device accepts on a physical port
pub const MIN_MTU: u32 = 256;
/// Largest MTU the device accepts on a physical port
pub const MAX_MTU: u32 = 9216;

/// Physical interface attributes.
///
/// The interface owns its whole subtree, so deleting it also removes its
/// logical units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalInterface {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub mtu: Option<u32>,
    #[serde(default)]
    pub vlan_tagging: bool,
    #[serde(default)]
    pub encapsulation: Option<String>,
    /// Aggregated ethernet bundle this port is a member of
    #[serde(default)]
    pub ae_parent: Option<String>,
}

impl PhysicalInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn root(name: &str) -> ConfigPath {
        config_path!(INTERFACES, name)
    }
}

impl Resource for PhysicalInterface {
    const TYPE: ResourceType = ResourceType::InterfacePhysical;

    fn id(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> JunosResult<()> {
        require_name("name", &self.name)?;
        if self.name.contains('.') || self.name.contains(char::is_whitespace) {
            return Err(JunosError::invalid_config(
                "name",
                format!("'{}' is not a physical interface name", self.name),
            ));
        }
        if let Some(mtu) = self.mtu {
            if !(MIN_MTU..=MAX_MTU).contains(&mtu) {
                return Err(JunosError::invalid_config(
                    "mtu",
                    format!("{} is outside {}..={}", mtu, MIN_MTU, MAX_MTU),
                ));
            }
        }
        if let Some(parent) = &self.ae_parent {
            require_name("ae_parent", parent)?;
            if parent == &self.name {
                return Err(JunosError::invalid_config(
                    "ae_parent",
                    "an interface cannot be a member of itself",
                ));
            }
        }
        Ok(())
    }

    fn statements(&self) -> Vec<Statement> {
        let root = Self::root(&self.name);
        let mut stmts = Vec::new();

        if let Some(description) = &self.description {
            stmts.push(Statement::set(
                root.child(fields::DESCRIPTION),
                Some(description.clone()),
            ));
        }
        if self.disable {
            stmts.push(Statement::set(root.child(fields::DISABLE), None));
        }
        if let Some(mtu) = self.mtu {
            stmts.push(Statement::set(root.child(fields::MTU), Some(mtu.to_string())));
        }
        if self.vlan_tagging {
            stmts.push(Statement::set(root.child(fields::VLAN_TAGGING), None));
        }
        if let Some(encapsulation) = &self.encapsulation {
            stmts.push(Statement::set(
                root.child(fields::ENCAPSULATION),
                Some(encapsulation.clone()),
            ));
        }
        if let Some(parent) = &self.ae_parent {
            stmts.push(Statement::set(
                root.join([fields::GIGETHER_OPTIONS, fields::LACP_8023AD]),
                Some(parent.clone()),
            ));
        }

        // An interface without attributes still exists as a bare node
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

        let mut iface = PhysicalInterface::new(id);
        for rest in lines_under(lines, &root) {
            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
            match rest.as_slice() {
                [fields::DESCRIPTION, value] => iface.description = Some(value.to_string()),
                [fields::DISABLE] => iface.disable = true,
                [fields::MTU, value] => {
                    iface.mtu = Some(parse_number(&format!("mtu of {}", id), value)?)
                }
                [fields::VLAN_TAGGING] => iface.vlan_tagging = true,
                [fields::ENCAPSULATION, value] => iface.encapsulation = Some(value.to_string()),
                [fields::GIGETHER_OPTIONS, fields::LACP_8023AD, parent] => {
                    iface.ae_parent = Some(parent.to_string())
                }
                // Units are logical interfaces of their own
                _ => {}
            }
        }
        Ok(Some(iface))
    }
}
