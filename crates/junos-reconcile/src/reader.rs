//! State reader: committed configuration back into typed resources

use tracing::{debug, instrument, trace};

use junos_common::{tokenize_line, ConfigPath, JunosError, JunosResult, Rpc};

use crate::resources::{
    LogicalInterface, PhysicalInterface, Resource, ResourceState, ResourceType, RoutingInstance,
    SecurityPolicy, Snmp, SnmpCommunity,
};
use crate::session::Session;

/// Leading keyword of every line in set-format output
const SET: &str = "set";

/// Keeps the `set` lines of `output` under `path`, without the keyword.
///
/// Comments, blank lines and anything that is not a `set` line are dropped.
pub fn parse_set_lines(output: &str, path: &ConfigPath) -> JunosResult<Vec<Vec<String>>> {
    let mut lines = Vec::new();
    for line in output.lines() {
        let tokens = tokenize_line(line)?;
        match tokens.split_first() {
            Some((first, rest)) if first == SET && path.is_prefix_of(rest) => {
                lines.push(rest.to_vec())
            }
            _ => trace!(line, "Skipping line"),
        }
    }
    Ok(lines)
}

/// Read-only queries; no lock is taken
#[derive(Debug, Default, Clone, Copy)]
pub struct StateReader;

impl StateReader {
    pub fn new() -> Self {
        Self
    }

    /// Reads one object; `None` when it does not exist
    #[instrument(skip(self, session), fields(device = %session.device()))]
    pub async fn read(
        &self,
        session: &mut Session,
        resource_type: ResourceType,
        id: &str,
    ) -> JunosResult<Option<ResourceState>> {
        let state = match resource_type {
            ResourceType::InterfacePhysical => self
                .read_typed::<PhysicalInterface>(session, id)
                .await?
                .map(ResourceState::InterfacePhysical),
            ResourceType::InterfaceLogical => self
                .read_typed::<LogicalInterface>(session, id)
                .await?
                .map(ResourceState::InterfaceLogical),
            ResourceType::RoutingInstance => self
                .read_typed::<RoutingInstance>(session, id)
                .await?
                .map(ResourceState::RoutingInstance),
            ResourceType::SecurityPolicy => self
                .read_typed::<SecurityPolicy>(session, id)
                .await?
                .map(ResourceState::SecurityPolicy),
            ResourceType::Snmp => self
                .read_typed::<Snmp>(session, id)
                .await?
                .map(ResourceState::Snmp),
            ResourceType::SnmpCommunity => self
                .read_typed::<SnmpCommunity>(session, id)
                .await?
                .map(ResourceState::SnmpCommunity),
        };
        debug!(found = state.is_some(), "Read complete");
        Ok(state)
    }

    /// Reads one object of a statically known type
    pub async fn read_typed<R: Resource>(
        &self,
        session: &mut Session,
        id: &str,
    ) -> JunosResult<Option<R>> {
        let mut lines = Vec::new();
        for path in R::read_paths(id)? {
            lines.extend(self.fetch_lines(session, &path).await?);
        }
        R::decode(id, &lines)
    }

    /// Committed `set` lines under `path`
    pub async fn fetch_lines(
        &self,
        session: &mut Session,
        path: &ConfigPath,
    ) -> JunosResult<Vec<Vec<String>>> {
        session.ensure_connected().await?;
        let reply = session
            .call(&Rpc::ShowConfiguration { path: path.clone() })
            .await?;
        if !reply.is_ok() {
            return Err(JunosError::decode(
                format!("configuration under '{}'", path),
                reply.error_message(),
            ));
        }
        parse_set_lines(&reply.output, path)
    }
}
