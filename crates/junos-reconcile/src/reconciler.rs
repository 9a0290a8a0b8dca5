//! Resource reconciler: create, read, update and delete typed objects
//!
//! Writes go through the change builder and the coordinator, then the object
//! is read back so callers always get the device's view of what was written.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use junos_common::{JunosError, JunosResult, ReconcilerConfig};

use crate::builder::ChangeSet;
use crate::lock::LockManager;
use crate::reader::StateReader;
use crate::resources::{ResourceState, ResourceType};
use crate::session::Session;
use crate::transaction::{Coordinator, Transaction};

/// What [`Reconciler::converge`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

impl Outcome {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Reconciler {
    coordinator: Coordinator,
    reader: StateReader,
}

impl Reconciler {
    /// Create new reconciler
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            reader: StateReader::new(),
        }
    }

    /// Builds the coordinator from the `[transaction]` section
    pub fn from_config(locks: Arc<LockManager>, config: &ReconcilerConfig) -> Self {
        Self::new(Coordinator::from_config(locks, config))
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn reader(&self) -> &StateReader {
        &self.reader
    }

    /// Creates `desired`; fails with `AlreadyExists` if it is already there
    #[instrument(skip(self, session, desired), fields(device = %session.device(), resource = %desired.describe()))]
    pub async fn create(
        &self,
        session: &mut Session,
        desired: &ResourceState,
    ) -> JunosResult<ResourceState> {
        desired.validate()?;
        let resource_type = desired.resource_type();
        let id = desired.id();

        if self.read(session, resource_type, &id).await?.is_some() {
            return Err(JunosError::already_exists(resource_type.as_str(), &id));
        }

        let changes = desired.build_create()?;
        self.apply(session, "create", desired, &changes).await?;
        info!("Created");
        self.read_back(session, desired).await
    }

    /// Reads the current state; `None` when absent
    pub async fn read(
        &self,
        session: &mut Session,
        resource_type: ResourceType,
        id: &str,
    ) -> JunosResult<Option<ResourceState>> {
        self.reader.read(session, resource_type, id).await
    }

    /// Moves the object from `previous` to `desired`
    ///
    /// An update with nothing to change sends no write at all.
    #[instrument(skip(self, session, previous, desired), fields(device = %session.device(), resource = %desired.describe()))]
    pub async fn update(
        &self,
        session: &mut Session,
        previous: &ResourceState,
        desired: &ResourceState,
    ) -> JunosResult<ResourceState> {
        let changes = previous.build_update(desired)?;
        let current = self
            .read(session, desired.resource_type(), &desired.id())
            .await?
            .ok_or_else(|| vanished(desired))?;

        if changes.is_empty() {
            debug!("Already up to date");
            return Ok(current);
        }

        self.apply(session, "update", desired, &changes).await?;
        info!(statements = changes.len(), "Updated");
        self.read_back(session, desired).await
    }

    /// Removes the object and everything it owns
    #[instrument(skip(self, session), fields(device = %session.device()))]
    pub async fn delete(
        &self,
        session: &mut Session,
        resource_type: ResourceType,
        id: &str,
    ) -> JunosResult<()> {
        // Owned paths come from the live object, memberships included
        let current = self
            .read(session, resource_type, id)
            .await?
            .ok_or_else(|| JunosError::vanished(resource_type.as_str(), id))?;

        let changes = current.build_delete()?;
        self.apply(session, "delete", &current, &changes).await?;
        info!("Deleted");
        Ok(())
    }

    /// Changes that would bring the live object to `desired`
    pub async fn plan(
        &self,
        session: &mut Session,
        desired: &ResourceState,
    ) -> JunosResult<ChangeSet> {
        match self.read(session, desired.resource_type(), &desired.id()).await? {
            Some(current) => current.build_update(desired),
            None => desired.build_create(),
        }
    }

    /// Creates or updates `desired` against whatever the device holds now
    #[instrument(skip(self, session, desired), fields(device = %session.device(), resource = %desired.describe()))]
    pub async fn converge(
        &self,
        session: &mut Session,
        desired: &ResourceState,
    ) -> JunosResult<Outcome> {
        desired.validate()?;
        let current = self
            .read(session, desired.resource_type(), &desired.id())
            .await?;

        let (outcome, changes) = match &current {
            None => (Outcome::Created, desired.build_create()?),
            Some(current) => (Outcome::Updated, current.build_update(desired)?),
        };
        if changes.is_empty() {
            debug!("No drift");
            return Ok(Outcome::Unchanged);
        }

        self.apply(session, outcome.as_str(), desired, &changes).await?;
        info!(%outcome, statements = changes.len(), "Converged");
        Ok(outcome)
    }

    async fn apply(
        &self,
        session: &mut Session,
        verb: &str,
        resource: &ResourceState,
        changes: &ChangeSet,
    ) -> JunosResult<()> {
        let mut tx = Transaction::from_changes(format!("{} {}", verb, resource.describe()), changes);
        self.coordinator
            .execute(session, &mut tx)
            .await
            .map_err(|e| e.annotate(resource.describe(), changes.rendered()))
    }

    async fn read_back(
        &self,
        session: &mut Session,
        desired: &ResourceState,
    ) -> JunosResult<ResourceState> {
        self.read(session, desired.resource_type(), &desired.id())
            .await?
            .ok_or_else(|| vanished(desired))
    }
}

fn vanished(resource: &ResourceState) -> JunosError {
    JunosError::vanished(resource.resource_type().as_str(), resource.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{PhysicalInterface, SnmpCommunity};
    use crate::session::Timeouts;
    use crate::transaction::RetryPolicy;
    use junos_common::ErrorKind;
    use junos_test::{MockDevice, Stage};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn session(device: &MockDevice) -> Session {
        Session::new(Box::new(device.connect()), Timeouts::default())
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(Coordinator::new(
            Arc::new(LockManager::default()),
            RetryPolicy::new(1, Duration::from_millis(10)),
        ))
    }

    fn interface(vlan_tagging: bool) -> ResourceState {
        ResourceState::InterfacePhysical(PhysicalInterface {
            vlan_tagging,
            ..PhysicalInterface::new("ge-0/0/0")
        })
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let device = MockDevice::new("vsrx1");
        let mut session = session(&device);
        let reconciler = reconciler();

        let created = reconciler.create(&mut session, &interface(true)).await.unwrap();
        assert_eq!(created, interface(true));
        assert_eq!(device.committed_lines(), vec!["set interfaces ge-0/0/0 vlan-tagging"]);
    }

    #[tokio::test]
    async fn test_create_existing_fails_without_writes() {
        let device = MockDevice::new("vsrx1").with_committed(["set interfaces ge-0/0/0 mtu 1500"]);
        let mut session = session(&device);

        let err = reconciler().create(&mut session, &interface(true)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(device.write_count(), 0);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_object_vanished() {
        let device = MockDevice::new("vsrx1");
        let mut session = session(&device);
        let reconciler = reconciler();

        let err = reconciler
            .update(&mut session, &interface(true), &interface(false))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Vanished);

        let err = reconciler
            .delete(&mut session, ResourceType::InterfacePhysical, "ge-0/0/0")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Vanished);
        assert_eq!(device.write_count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_is_annotated() {
        let device = MockDevice::new("vsrx1");
        device.reject(Stage::Check, "snmp community public", "community name reserved");
        let mut session = session(&device);
        let desired = ResourceState::SnmpCommunity(SnmpCommunity::new("public"));

        let err = reconciler().create(&mut session, &desired).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigConflict);
        let message = err.to_string();
        assert!(message.contains("snmp_community 'public'"));
        assert!(message.contains("set snmp community public"));
        assert!(message.contains("community name reserved"));
    }

    #[tokio::test]
    async fn test_plan_and_converge() {
        let device = MockDevice::new("vsrx1");
        let mut session = session(&device);
        let reconciler = reconciler();

        let plan = reconciler.plan(&mut session, &interface(true)).await.unwrap();
        assert_eq!(plan.rendered(), vec!["set interfaces ge-0/0/0 vlan-tagging"]);
        assert_eq!(device.write_count(), 0);

        assert_eq!(
            reconciler.converge(&mut session, &interface(true)).await.unwrap(),
            Outcome::Created
        );
        assert_eq!(
            reconciler.converge(&mut session, &interface(true)).await.unwrap(),
            Outcome::Unchanged
        );
        assert_eq!(
            reconciler.converge(&mut session, &interface(false)).await.unwrap(),
            Outcome::Updated
        );
        assert!(reconciler.plan(&mut session, &interface(false)).await.unwrap().is_empty());
    }
}
