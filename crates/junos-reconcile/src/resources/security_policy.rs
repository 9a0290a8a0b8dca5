//! Security policy set between two zones
//!
//! Rules are evaluated in configuration order, so the rule list is ordered
//! and each rule is an entry replaced as a unit.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use junos_common::{config_path, ConfigPath, JunosError, JunosResult, Statement};

use super::{exists_under, lines_under, push_unique, require_name, Resource, ResourceType};
use crate::keywords::{fields, FROM_ZONE, POLICIES, POLICY, SECURITY, TO_ZONE};

/// Separator between the zones in the identifier
pub const ID_SEPARATOR: &str = "_-_";

/// Action taken on matching traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Permit,
    /// Also the device default when a rule has no action
    #[default]
    Deny,
    Reject,
}

impl PolicyAction {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Permit => "permit",
            PolicyAction::Deny => "deny",
            PolicyAction::Reject => "reject",
        }
    }
}

impl FromStr for PolicyAction {
    type Err = JunosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permit" => Ok(PolicyAction::Permit),
            "deny" => Ok(PolicyAction::Deny),
            "reject" => Ok(PolicyAction::Reject),
            _ => Err(JunosError::decode(
                "policy action",
                format!("unknown action '{}'", s),
            )),
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    #[serde(default)]
    pub source_addresses: Vec<String>,
    #[serde(default)]
    pub destination_addresses: Vec<String>,
    #[serde(default)]
    pub applications: Vec<String>,
    #[serde(default)]
    pub action: PolicyAction,
    #[serde(default)]
    pub count: bool,
    #[serde(default)]
    pub log_init: bool,
    #[serde(default)]
    pub log_close: bool,
}

impl PolicyRule {
    pub fn new(name: impl Into<String>, action: PolicyAction) -> Self {
        Self {
            name: name.into(),
            action,
            ..Self::default()
        }
    }

    fn validate(&self) -> JunosResult<()> {
        require_name("rules.name", &self.name)?;
        for (field, list) in [
            ("source_addresses", &self.source_addresses),
            ("destination_addresses", &self.destination_addresses),
            ("applications", &self.applications),
        ] {
            if list.is_empty() {
                return Err(JunosError::invalid_config(
                    format!("rules.{}", field),
                    format!("rule '{}' needs at least one match", self.name),
                ));
            }
        }
        Ok(())
    }

    fn statements(&self, root: &ConfigPath) -> Vec<Statement> {
        let matches = root.child(fields::MATCH);
        let then = root.child(fields::THEN);
        let mut stmts = Vec::new();

        for (leaf, list) in [
            (fields::SOURCE_ADDRESS, &self.source_addresses),
            (fields::DESTINATION_ADDRESS, &self.destination_addresses),
            (fields::APPLICATION, &self.applications),
        ] {
            for value in list {
                stmts.push(Statement::set(matches.join([leaf, value.as_str()]), None));
            }
        }
        stmts.push(Statement::set(then.child(self.action.as_str()), None));
        if self.count {
            stmts.push(Statement::set(then.child(fields::COUNT), None));
        }
        if self.log_init {
            stmts.push(Statement::set(then.join([fields::LOG, fields::SESSION_INIT]), None));
        }
        if self.log_close {
            stmts.push(Statement::set(then.join([fields::LOG, fields::SESSION_CLOSE]), None));
        }
        stmts
    }
}

/// Ordered rules from one zone to another
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    pub from_zone: String,
    pub to_zone: String,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl SecurityPolicy {
    pub fn new(from_zone: impl Into<String>, to_zone: impl Into<String>) -> Self {
        Self {
            from_zone: from_zone.into(),
            to_zone: to_zone.into(),
            rules: Vec::new(),
        }
    }

    fn root(from_zone: &str, to_zone: &str) -> ConfigPath {
        config_path!(SECURITY, POLICIES, FROM_ZONE, from_zone, TO_ZONE, to_zone)
    }

    fn rule_root(&self, rule: &str) -> ConfigPath {
        Self::root(&self.from_zone, &self.to_zone).join([POLICY, rule])
    }
}

/// Splits `trust_-_untrust` into its zones.
fn split_id(id: &str) -> JunosResult<(&str, &str)> {
    id.split_once(ID_SEPARATOR)
        .filter(|(from, to)| !from.is_empty() && !to.is_empty())
        .ok_or_else(|| {
            JunosError::invalid_config(
                "id",
                format!("'{}' is not of the form <from>{}<to>", id, ID_SEPARATOR),
            )
        })
}

impl Resource for SecurityPolicy {
    const TYPE: ResourceType = ResourceType::SecurityPolicy;

    fn id(&self) -> String {
        format!("{}{}{}", self.from_zone, ID_SEPARATOR, self.to_zone)
    }

    fn validate(&self) -> JunosResult<()> {
        require_name("from_zone", &self.from_zone)?;
        require_name("to_zone", &self.to_zone)?;
        if self.from_zone.contains(ID_SEPARATOR) || self.to_zone.contains(ID_SEPARATOR) {
            return Err(JunosError::invalid_config(
                "from_zone",
                format!("zone names must not contain '{}'", ID_SEPARATOR),
            ));
        }

        let mut seen: Vec<&str> = Vec::new();
        for rule in &self.rules {
            rule.validate()?;
            if seen.contains(&rule.name.as_str()) {
                return Err(JunosError::invalid_config(
                    "rules.name",
                    format!("duplicate rule '{}'", rule.name),
                ));
            }
            seen.push(&rule.name);
        }
        Ok(())
    }

    fn statements(&self) -> Vec<Statement> {
        if self.rules.is_empty() {
            return vec![Statement::set(
                Self::root(&self.from_zone, &self.to_zone),
                None,
            )];
        }
        self.rules
            .iter()
            .flat_map(|rule| rule.statements(&self.rule_root(&rule.name)))
            .collect()
    }

    fn owned_paths(&self) -> Vec<ConfigPath> {
        vec![Self::root(&self.from_zone, &self.to_zone)]
    }

    fn entry_paths(&self) -> Vec<ConfigPath> {
        self.rules.iter().map(|r| self.rule_root(&r.name)).collect()
    }

    fn ordered_entries() -> bool {
        true
    }

    fn read_paths(id: &str) -> JunosResult<Vec<ConfigPath>> {
        let (from_zone, to_zone) = split_id(id)?;
        Ok(vec![Self::root(from_zone, to_zone)])
    }

    fn decode(id: &str, lines: &[Vec<String>]) -> JunosResult<Option<Self>> {
        let (from_zone, to_zone) = split_id(id)?;
        let root = Self::root(from_zone, to_zone);
        if !exists_under(lines, &root) {
            return Ok(None);
        }

        let mut policy = SecurityPolicy::new(from_zone, to_zone);
        for rest in lines_under(lines, &root) {
            let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
            let [POLICY, name, tail @ ..] = rest.as_slice() else {
                continue;
            };

            // Rules keep the order the device lists them in
            let index = match policy.rules.iter().position(|r| r.name == *name) {
                Some(index) => index,
                None => {
                    policy.rules.push(PolicyRule::new(*name, PolicyAction::default()));
                    policy.rules.len() - 1
                }
            };
            let rule = &mut policy.rules[index];

            match tail {
                [fields::MATCH, fields::SOURCE_ADDRESS, value] => {
                    push_unique(&mut rule.source_addresses, value)
                }
                [fields::MATCH, fields::DESTINATION_ADDRESS, value] => {
                    push_unique(&mut rule.destination_addresses, value)
                }
                [fields::MATCH, fields::APPLICATION, value] => {
                    push_unique(&mut rule.applications, value)
                }
                [fields::THEN, fields::COUNT, ..] => rule.count = true,
                [fields::THEN, fields::LOG, fields::SESSION_INIT] => rule.log_init = true,
                [fields::THEN, fields::LOG, fields::SESSION_CLOSE] => rule.log_close = true,
                [fields::THEN, fields::LOG, ..] => {}
                [fields::THEN, action, ..] => rule.action = action.parse()?,
                _ => {}
            }
        }
        Ok(Some(policy))
    }
}
