//! Typed configuration resources
//!
//! Every resource type implements [`Resource`]: how its desired state maps to
//! set statements, which paths it owns, where it is read from, and how read
//! lines decode back into the typed model. [`ResourceState`] is the closed set
//! of types the reconciler accepts, selected by its `type` tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use junos_common::{ConfigPath, JunosError, JunosResult, Statement};

use crate::builder::{self, ChangeSet};

mod interface;
mod interface_logical;
mod routing_instance;
mod security_policy;
mod snmp;

pub use interface::PhysicalInterface;
pub use interface_logical::LogicalInterface;
pub use routing_instance::RoutingInstance;
pub use security_policy::{PolicyAction, PolicyRule, SecurityPolicy};
pub use snmp::{Authorization, Snmp, SnmpCommunity};

/// Resource type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    InterfacePhysical,
    InterfaceLogical,
    RoutingInstance,
    SecurityPolicy,
    Snmp,
    SnmpCommunity,
}

impl ResourceType {
    /// All types, in the order the daemon applies them
    pub const ALL: [ResourceType; 6] = [
        ResourceType::RoutingInstance,
        ResourceType::InterfacePhysical,
        ResourceType::InterfaceLogical,
        ResourceType::SecurityPolicy,
        ResourceType::Snmp,
        ResourceType::SnmpCommunity,
    ];

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::InterfacePhysical => "interface_physical",
            ResourceType::InterfaceLogical => "interface_logical",
            ResourceType::RoutingInstance => "routing_instance",
            ResourceType::SecurityPolicy => "security_policy",
            ResourceType::Snmp => "snmp",
            ResourceType::SnmpCommunity => "snmp_community",
        }
    }
}

impl FromStr for ResourceType {
    type Err = JunosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| JunosError::invalid_config("type", format!("unknown resource type '{}'", s)))
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configuration object type
pub trait Resource: Clone + PartialEq + fmt::Debug + Send + Sync + Sized {
    /// Type tag
    const TYPE: ResourceType;

    /// Identifier, unique within the type
    fn id(&self) -> String;

    /// Rejects identifiers and attribute combinations the device would refuse
    fn validate(&self) -> JunosResult<()>;

    /// `set` statements for the full desired state, in dependency order
    fn statements(&self) -> Vec<Statement>;

    /// Root paths removed on delete, in dependency order
    fn owned_paths(&self) -> Vec<ConfigPath>;

    /// Roots of nested entries replaced as a unit when removed
    fn entry_paths(&self) -> Vec<ConfigPath> {
        Vec::new()
    }

    /// True when the device evaluates entries in configuration order
    fn ordered_entries() -> bool {
        false
    }

    /// Paths deleted explicitly on update whenever the desired state leaves them unset
    fn sticky_paths(&self) -> Vec<ConfigPath> {
        Vec::new()
    }

    /// Paths queried to read the object back
    fn read_paths(id: &str) -> JunosResult<Vec<ConfigPath>>;

    /// Decodes set lines (without the leading `set`); `None` when absent
    fn decode(id: &str, lines: &[Vec<String>]) -> JunosResult<Option<Self>>;

    /// `type 'id'` for logs and errors
    fn describe(&self) -> String {
        format!("{} '{}'", Self::TYPE, self.id())
    }
}

/// Desired or actual state of any supported object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceState {
    InterfacePhysical(PhysicalInterface),
    InterfaceLogical(LogicalInterface),
    RoutingInstance(RoutingInstance),
    SecurityPolicy(SecurityPolicy),
    Snmp(Snmp),
    SnmpCommunity(SnmpCommunity),
}

macro_rules! dispatch {
    ($state:expr, $r:ident => $body:expr) => {
        match $state {
            ResourceState::InterfacePhysical($r) => $body,
            ResourceState::InterfaceLogical($r) => $body,
            ResourceState::RoutingInstance($r) => $body,
            ResourceState::SecurityPolicy($r) => $body,
            ResourceState::Snmp($r) => $body,
            ResourceState::SnmpCommunity($r) => $body,
        }
    };
}

impl ResourceState {
    /// Type tag of the wrapped object
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceState::InterfacePhysical(_) => ResourceType::InterfacePhysical,
            ResourceState::InterfaceLogical(_) => ResourceType::InterfaceLogical,
            ResourceState::RoutingInstance(_) => ResourceType::RoutingInstance,
            ResourceState::SecurityPolicy(_) => ResourceType::SecurityPolicy,
            ResourceState::Snmp(_) => ResourceType::Snmp,
            ResourceState::SnmpCommunity(_) => ResourceType::SnmpCommunity,
        }
    }

    /// Identifier of the wrapped object
    pub fn id(&self) -> String {
        dispatch!(self, r => r.id())
    }

    /// `type 'id'` for logs and errors
    pub fn describe(&self) -> String {
        dispatch!(self, r => r.describe())
    }

    /// Validates the wrapped object
    pub fn validate(&self) -> JunosResult<()> {
        dispatch!(self, r => r.validate())
    }

    /// Statements creating the object
    pub fn build_create(&self) -> JunosResult<ChangeSet> {
        dispatch!(self, r => builder::build_create(r))
    }

    /// Statements removing the object
    pub fn build_delete(&self) -> JunosResult<ChangeSet> {
        dispatch!(self, r => builder::build_delete(r))
    }

    /// Statements turning `self` into `desired`
    pub fn build_update(&self, desired: &ResourceState) -> JunosResult<ChangeSet> {
        match (self, desired) {
            (ResourceState::InterfacePhysical(a), ResourceState::InterfacePhysical(b)) => {
                builder::build_update(a, b)
            }
            (ResourceState::InterfaceLogical(a), ResourceState::InterfaceLogical(b)) => {
                builder::build_update(a, b)
            }
            (ResourceState::RoutingInstance(a), ResourceState::RoutingInstance(b)) => {
                builder::build_update(a, b)
            }
            (ResourceState::SecurityPolicy(a), ResourceState::SecurityPolicy(b)) => {
                builder::build_update(a, b)
            }
            (ResourceState::Snmp(a), ResourceState::Snmp(b)) => builder::build_update(a, b),
            (ResourceState::SnmpCommunity(a), ResourceState::SnmpCommunity(b)) => {
                builder::build_update(a, b)
            }
            _ => Err(JunosError::invalid_config(
                "type",
                format!("cannot update {} into {}", self.describe(), desired.describe()),
            )),
        }
    }
}

/// Yields the remainder of every line below `root`.
pub(crate) fn lines_under<'a>(
    lines: &'a [Vec<String>],
    root: &'a ConfigPath,
) -> impl Iterator<Item = &'a [String]> + 'a {
    lines
        .iter()
        .filter(move |line| root.is_prefix_of(line))
        .map(move |line| &line[root.len()..])
}

/// True when any line lives at or below `root`.
pub(crate) fn exists_under(lines: &[Vec<String>], root: &ConfigPath) -> bool {
    lines.iter().any(|line| root.is_prefix_of(line))
}

/// Appends `value` unless already present, keeping first-seen order.
pub(crate) fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Rejects empty or whitespace-only names.
pub(crate) fn require_name(field: &str, value: &str) -> JunosResult<()> {
    if value.trim().is_empty() {
        return Err(JunosError::invalid_config(field, "must not be empty"));
    }
    Ok(())
}

/// Checks an `address/length` prefix, returning the address.
pub(crate) fn require_prefix(field: &str, value: &str) -> JunosResult<IpAddr> {
    let invalid = || {
        JunosError::invalid_config(field, format!("'{}' is not an address/length prefix", value))
    };
    let (address, length) = value.split_once('/').ok_or_else(invalid)?;
    let address: IpAddr = address.parse().map_err(|_| invalid())?;
    let length: u8 = length.parse().map_err(|_| invalid())?;
    let max = if address.is_ipv4() { 32 } else { 128 };
    if length > max {
        return Err(invalid());
    }
    Ok(address)
}

/// Parses a numeric leaf read from the device.
pub(crate) fn parse_number<T: FromStr>(context: &str, value: &str) -> JunosResult<T> {
    value
        .parse()
        .map_err(|_| JunosError::decode(context, format!("'{}' is not a valid number", value)))
}
