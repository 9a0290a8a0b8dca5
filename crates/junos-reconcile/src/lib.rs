//! junos-reconcile - configuration reconciliation engine for Junos devices
//!
//! Turns typed desired state into ordered `set`/`delete` statements and
//! applies them transactionally: candidate lock, load, `commit check`,
//! commit, and rollback on failure. Objects are read back from the committed
//! configuration with the same path vocabulary used to write them.
//!
//! ```ignore
//! use std::sync::Arc;
//! use junos_reconcile::{LockManager, Reconciler, ResourceState, PhysicalInterface, Session};
//!
//! let mut session = Session::open(&config).await?;
//! let reconciler = Reconciler::from_config(Arc::new(LockManager::default()), &config);
//! let desired = ResourceState::InterfacePhysical(PhysicalInterface {
//!     vlan_tagging: true,
//!     ..PhysicalInterface::new("ge-0/0/0")
//! });
//! let written = reconciler.create(&mut session, &desired).await?;
//! ```

pub mod builder;
mod desired;
pub mod keywords;
mod lock;
mod reader;
mod reconciler;
pub mod resources;
mod session;
mod sync;
mod transaction;

pub use builder::{build_create, build_delete, build_update, ChangeSet};
pub use desired::DesiredState;
pub use lock::{LockGuard, LockManager, LockWait};
pub use reader::{parse_set_lines, StateReader};
pub use reconciler::{Outcome, Reconciler};
pub use resources::{
    Authorization, LogicalInterface, PhysicalInterface, PolicyAction, PolicyRule, Resource,
    ResourceState, ResourceType, RoutingInstance, SecurityPolicy, Snmp, SnmpCommunity,
};
pub use session::{Session, SessionState, Timeouts};
pub use sync::{sync_all, SyncSummary};
pub use transaction::{Coordinator, RetryPolicy, Transaction, TxState, DEFAULT_COMMIT_COMMENT};
