//! One reconciliation pass over a whole desired state

use tracing::{error, info, instrument};

use junos_common::JunosError;

use crate::desired::DesiredState;
use crate::reconciler::{Outcome, Reconciler};
use crate::session::Session;

/// Result of a pass
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    /// Objects that could not be reconciled, with the reason
    pub failed: Vec<(String, JunosError)>,
}

impl SyncSummary {
    /// True when every object converged
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of objects written
    pub fn changed(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    fn record(&mut self, resource: String, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created.push(resource),
            Outcome::Updated => self.updated.push(resource),
            Outcome::Unchanged => self.unchanged.push(resource),
        }
    }
}

/// Converges every object of `desired`, in dependency order.
///
/// A failing object does not stop the pass; its error is kept in the summary.
#[instrument(skip_all, fields(device = %session.device(), resources = desired.resources.len()))]
pub async fn sync_all(
    reconciler: &Reconciler,
    session: &mut Session,
    desired: &DesiredState,
) -> SyncSummary {
    let mut summary = SyncSummary::default();

    for resource in desired.ordered() {
        let name = resource.describe();
        match reconciler.converge(session, resource).await {
            Ok(outcome) => summary.record(name, outcome),
            Err(e) => {
                error!(resource = %name, error = %e, "Failed to reconcile");
                summary.failed.push((name, e));
            }
        }
    }

    info!(
        created = summary.created.len(),
        updated = summary.updated.len(),
        unchanged = summary.unchanged.len(),
        failed = summary.failed.len(),
        "Sync pass complete"
    );
    summary
}
