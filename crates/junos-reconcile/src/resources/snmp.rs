//! SNMP agent settings and communities
//!
//! `snmp` is a singleton that owns only its own leaves; communities are
//! separate objects below it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use junos_common::{config_path, ConfigPath, JunosError, JunosResult, Statement};

use super::{exists_under, lines_under, push_unique, require_name, Resource, ResourceType};
use crate::keywords::{fields, COMMUNITY, SNMP};

/// Identifier of the singleton
pub const SNMP_ID: &str = "snmp";

/// Agent-wide SNMP settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snmp {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub filter_duplicates: bool,
    /// Interfaces the agent answers on
    #[serde(default)]
    pub interfaces: Vec<String>,
}

impl Snmp {
    fn root() -> ConfigPath {
        config_path!(SNMP)
    }
}

impl Resource for Snmp {
    const TYPE: ResourceType = ResourceType::Snmp;

    fn id(&self) -> String {
        SNMP_ID.to_string()
    }

    fn validate(&self) -> JunosResult<()> {
        if self.statements().is_empty() {
            return Err(JunosError::invalid_config(
                "snmp",
                "at least one attribute must be set",
            ));
        }
        for interface in &self.interfaces {
            require_name("interfaces", interface)?;
        }
        Ok(())
    }

    fn statements(&self) -> Vec<Statement> {
        let root = Self::root();
        let leaves = [
            (fields::DESCRIPTION, &self.description),
            (fields::LOCATION, &self.location),
            (fields::CONTACT, &self.contact),
        ];

        let mut stmts: Vec<Statement> = leaves
            .into_iter()
            .filter_map(|(leaf, value)| {
                value
                    .as_ref()
                    .map(|v| Statement::set(root.child(leaf), Some(v.clone())))
            })
            .collect();
        if self.filter_duplicates {
            stmts.push(Statement::set(root.child(fields::FILTER_DUPLICATES), None));
        }
        for interface in &self.interfaces {
            stmts.push(Statement::set(
                root.join([fields::INTERFACE, interface.as_str()]),
                None,
            ));
        }
        stmts
    }

    /// Only the agent leaves; communities and other subtrees stay
    fn owned_paths(&self) -> Vec<ConfigPath> {
        let root = Self::root();
        [
            fields::DESCRIPTION,
            fields::LOCATION,
            fields::CONTACT,
            fields::FILTER_DUPLICATES,
            fields::INTERFACE,
        ]
        .into_iter()
        .map(|leaf| root.child(leaf))
        .collect()
    }

    fn read_paths(id: &str) -> JunosResult<Vec<ConfigPath>> {
        if id != SNMP_ID {
            return Err(JunosError::invalid_config(
                "id",
                format!("the snmp singleton is named '{}', not '{}'", SNMP_ID, id),
            ));
        }
        Ok(vec![Self::root()])
    }

    fn decode(_id: &str, lines: &[Vec<String>]) -> JunosResult<Option<Self>> {
        let root = Self::root();
        let mut snmp = Snmp::default();
        let mut found = false;

        for rest in lines_under(lines, &root) {
            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
            found |= match rest.as_slice() {
                [fields::DESCRIPTION, value] => {
                    snmp.description = Some(value.to_string());
                    true
                }
                [fields::LOCATION, value] => {
                    snmp.location = Some(value.to_string());
                    true
                }
                [fields::CONTACT, value] => {
                    snmp.contact = Some(value.to_string());
                    true
                }
                [fields::FILTER_DUPLICATES] => {
                    snmp.filter_duplicates = true;
                    true
                }
                [fields::INTERFACE, interface] => {
                    push_unique(&mut snmp.interfaces, interface);
                    true
                }
                _ => false,
            };
        }
        Ok(found.then_some(snmp))
    }
}

/// Community access level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Authorization {
    ReadOnly,
    ReadWrite,
}

impl Authorization {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Authorization::ReadOnly => "read-only",
            Authorization::ReadWrite => "read-write",
        }
    }
}

impl FromStr for Authorization {
    type Err = JunosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-only" => Ok(Authorization::ReadOnly),
            "read-write" => Ok(Authorization::ReadWrite),
            _ => Err(JunosError::decode(
                "snmp community authorization",
                format!("unknown authorization '{}'", s),
            )),
        }
    }
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One community (`snmp community <name>`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpCommunity {
    pub name: String,
    #[serde(default)]
    pub authorization: Option<Authorization>,
    /// Client prefixes allowed to use the community
    #[serde(default)]
    pub clients: Vec<String>,
    #[serde(default)]
    pub view: Option<String>,
}

impl SnmpCommunity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn root(name: &str) -> ConfigPath {
        config_path!(SNMP, COMMUNITY, name)
    }
}

impl Resource for SnmpCommunity {
    const TYPE: ResourceType = ResourceType::SnmpCommunity;

    fn id(&self) -> String {
        self.name.clone()
    }

    fn validate(&self) -> JunosResult<()> {
        require_name("name", &self.name)?;
        for client in &self.clients {
            require_name("clients", client)?;
        }
        if let Some(view) = &self.view {
            require_name("view", view)?;
        }
        Ok(())
    }

    fn statements(&self) -> Vec<Statement> {
        let root = Self::root(&self.name);
        let mut stmts = Vec::new();

        if let Some(authorization) = self.authorization {
            stmts.push(Statement::set(
                root.child(fields::AUTHORIZATION),
                Some(authorization.as_str().to_string()),
            ));
        }
        for client in &self.clients {
            stmts.push(Statement::set(
                root.join([fields::CLIENTS, client.as_str()]),
                None,
            ));
        }
        if let Some(view) = &self.view {
            stmts.push(Statement::set(root.child(fields::VIEW), Some(view.clone())));
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

        let mut community = SnmpCommunity::new(id);
        for rest in lines_under(lines, &root) {
            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
            match rest.as_slice() {
                [fields::AUTHORIZATION, value] => community.authorization = Some(value.parse()?),
                [fields::CLIENTS, client, ..] => push_unique(&mut community.clients, client),
                [fields::VIEW, value] => community.view = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(Some(community))
    }
}
