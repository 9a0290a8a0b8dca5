//! Logical interface (`interfaces <if> unit <n>`)
//!
//! A unit optionally joins a routing instance. The membership line lives
//! under `routing-instances`, outside the unit, and is owned by the unit.

use serde::{Deserialize, Serialize};

use junos_common::{config_path, ConfigPath, JunosError, JunosResult, Statement};

use super::{
    exists_under, lines_under, parse_number, push_unique, require_name, require_prefix,
    Resource, ResourceType,
};
use crate::keywords::{fields, INTERFACES, ROUTING_INSTANCES, UNIT};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalInterface {
    /// `<interface>.<unit>`, e.g. `ge-0/0/0.100`
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub vlan_id: Option<u16>,
    #[serde(default)]
    pub inet_addresses: Vec<String>,
    #[serde(default)]
    pub inet6_addresses: Vec<String>,
    /// Routing instance the unit belongs to
    #[serde(default)]
    pub routing_instance: Option<String>,
}

/// Splits `ge-0/0/0.100` into `("ge-0/0/0", "100")`.
fn split_name(name: &str) -> (&str, &str) {
    name.rsplit_once('.').unwrap_or((name, ""))
}

fn unit_root(name: &str) -> ConfigPath {
    let (interface, unit) = split_name(name);
    config_path!(INTERFACES, interface, UNIT, unit)
}

fn membership(instance: &str, name: &str) -> ConfigPath {
    config_path!(ROUTING_INSTANCES, instance, fields::INTERFACE, name)
}

impl LogicalInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parent physical interface
    pub fn interface(&self) -> &str {
        split_name(&self.name).0
    }

    /// Unit number as written in the name
    pub fn unit(&self) -> &str {
        split_name(&self.name).1
    }
}

fn validate_name(name: &str) -> JunosResult<()> {
    require_name("name", name)?;
    let (interface, unit) = split_name(name);
    if interface.is_empty() || unit.is_empty() {
        return Err(JunosError::invalid_config(
            "name",
            format!("'{}' is not of the form <interface>.<unit>", name),
        ));
    }
    if unit.parse::<u32>().is_err() {
        return Err(JunosError::invalid_config(
            "name",
            format!("unit '{}' of '{}' is not an integer", unit, name),
        ));
    }
    Ok(())
}

impl Resource for LogicalInterface {
    const TYPE: ResourceType = ResourceType::InterfaceLogical;

    fn id(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> JunosResult<()> {
        validate_name(&self.name)?;
        if let Some(vlan_id) = self.vlan_id {
            if !(1..=4094).contains(&vlan_id) {
                return Err(JunosError::invalid_config(
                    "vlan_id",
                    format!("{} is outside 1..=4094", vlan_id),
                ));
            }
        }
        for address in &self.inet_addresses {
            if !require_prefix("inet_addresses", address)?.is_ipv4() {
                return Err(JunosError::invalid_config(
                    "inet_addresses",
                    format!("'{}' is not an IPv4 prefix", address),
                ));
            }
        }
        for address in &self.inet6_addresses {
            if !require_prefix("inet6_addresses", address)?.is_ipv6() {
                return Err(JunosError::invalid_config(
                    "inet6_addresses",
                    format!("'{}' is not an IPv6 prefix", address),
                ));
            }
        }
        if let Some(instance) = &self.routing_instance {
            require_name("routing_instance", instance)?;
        }
        Ok(())
    }

    fn statements(&self) -> Vec<Statement> {
        let root = unit_root(&self.name);
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
        if let Some(vlan_id) = self.vlan_id {
            stmts.push(Statement::set(
                root.child(fields::VLAN_ID),
                Some(vlan_id.to_string()),
            ));
        }
        for (family, addresses) in [
            (fields::INET, &self.inet_addresses),
            (fields::INET6, &self.inet6_addresses),
        ] {
            for address in addresses {
                stmts.push(Statement::set(
                    root.join([fields::FAMILY, family, fields::ADDRESS, address.as_str()]),
                    None,
                ));
            }
        }
        if stmts.is_empty() {
            stmts.push(Statement::set(root, None));
        }

        // The unit must exist before an instance can reference it
        if let Some(instance) = &self.routing_instance {
            stmts.push(Statement::set(membership(instance, &self.name), None));
        }
        stmts
    }

    fn owned_paths(&self) -> Vec<ConfigPath> {
        let mut paths = vec![unit_root(&self.name)];
        if let Some(instance) = &self.routing_instance {
            paths.push(membership(instance, &self.name));
        }
        paths
    }

    fn sticky_paths(&self) -> Vec<ConfigPath> {
        vec![unit_root(&self.name).child(fields::DISABLE)]
    }

    fn read_paths(id: &str) -> JunosResult<Vec<ConfigPath>> {
        validate_name(id)?;
        Ok(vec![unit_root(id), config_path!(ROUTING_INSTANCES)])
    }

    fn decode(id: &str, lines: &[Vec<String>]) -> JunosResult<Option<Self>> {
        let root = unit_root(id);
        if !exists_under(lines, &root) {
            return Ok(None);
        }

        let mut unit = LogicalInterface::new(id);
        for rest in lines_under(lines, &root) {
            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
            match rest.as_slice() {
                [fields::DESCRIPTION, value] => unit.description = Some(value.to_string()),
                [fields::DISABLE] => unit.disable = true,
                [fields::VLAN_ID, value] => {
                    unit.vlan_id = Some(parse_number(&format!("vlan-id of {}", id), value)?)
                }
                [fields::FAMILY, fields::INET, fields::ADDRESS, address, ..] => {
                    push_unique(&mut unit.inet_addresses, address)
                }
                [fields::FAMILY, fields::INET6, fields::ADDRESS, address, ..] => {
                    push_unique(&mut unit.inet6_addresses, address)
                }
                _ => {}
            }
        }

        let instances = config_path!(ROUTING_INSTANCES);
        unit.routing_instance = lines_under(lines, &instances).find_map(|rest| match rest {
            [instance, keyword, name] if keyword == fields::INTERFACE && name == id => {
                Some(instance.clone())
            }
            _ => None,
        });
        Ok(Some(unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(text: &[&str]) -> Vec<Vec<String>> {
        text.iter()
            .map(|l| junos_common::tokenize_line(l).unwrap()[1..].to_vec())
            .collect()
    }

    #[test]
    fn test_membership_follows_unit() {
        let unit = LogicalInterface {
            vlan_id: Some(100),
            inet_addresses: vec!["192.0.2.1/24".to_string()],
            inet6_addresses: vec!["2001:db8::1/64".to_string()],
            routing_instance: Some("blue".to_string()),
            ..LogicalInterface::new("ge-0/0/0.100")
        };
        assert_eq!(unit.interface(), "ge-0/0/0");
        assert_eq!(unit.unit(), "100");

        let rendered: Vec<String> = unit.statements().iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "set interfaces ge-0/0/0 unit 100 vlan-id 100",
                "set interfaces ge-0/0/0 unit 100 family inet address 192.0.2.1/24",
                "set interfaces ge-0/0/0 unit 100 family inet6 address 2001:db8::1/64",
                "set routing-instances blue interface ge-0/0/0.100",
            ]
        );
    }

    #[test]
    fn test_validate() {
        assert!(LogicalInterface::new("ge-0/0/0.0").validate().is_ok());
        assert!(LogicalInterface::new("ge-0/0/0").validate().is_err());
        assert!(LogicalInterface::new("ge-0/0/0.x").validate().is_err());
        assert!(LogicalInterface::new(".0").validate().is_err());

        let unit = LogicalInterface {
            vlan_id: Some(4095),
            ..LogicalInterface::new("ge-0/0/0.0")
        };
        assert!(unit.validate().is_err());

        let unit = LogicalInterface {
            inet_addresses: vec!["2001:db8::1/64".to_string()],
            ..LogicalInterface::new("ge-0/0/0.0")
        };
        assert!(unit.validate().is_err());
    }

    #[test]
    fn test_decode_with_membership() {
        let lines = lines(&[
            "set interfaces ge-0/0/0 unit 100 description \"customer a\"",
            "set interfaces ge-0/0/0 unit 100 vlan-id 100",
            "set interfaces ge-0/0/0 unit 100 family inet address 192.0.2.1/24 primary",
            "set interfaces ge-0/0/0 unit 100 family inet address 192.0.2.1/24 preferred",
            "set interfaces ge-0/0/0 unit 200 vlan-id 200",
            "set routing-instances blue instance-type virtual-router",
            "set routing-instances blue interface ge-0/0/0.100",
        ]);
        let unit = LogicalInterface::decode("ge-0/0/0.100", &lines).unwrap().unwrap();
        assert_eq!(
            unit,
            LogicalInterface {
                description: Some("customer a".to_string()),
                vlan_id: Some(100),
                inet_addresses: vec!["192.0.2.1/24".to_string()],
                routing_instance: Some("blue".to_string()),
                ..LogicalInterface::new("ge-0/0/0.100")
            }
        );

        let other = LogicalInterface::decode("ge-0/0/0.200", &lines).unwrap().unwrap();
        assert_eq!(other.routing_instance, None);
        assert_eq!(LogicalInterface::decode("ge-0/0/0.300", &lines).unwrap(), None);
    }

    #[test]
    fn test_owned_paths() {
        let unit = LogicalInterface {
            routing_instance: Some("blue".to_string()),
            ..LogicalInterface::new("ge-0/0/0.100")
        };
        assert_eq!(
            unit.owned_paths(),
            vec![
                config_path!("interfaces", "ge-0/0/0", "unit", "100"),
                config_path!("routing-instances", "blue", "interface", "ge-0/0/0.100"),
            ]
        );
    }
}
