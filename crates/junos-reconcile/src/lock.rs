//! Candidate configuration lock manager
//!
//! Serializes transactions per device. A process-local slot per device name
//! keeps concurrent callers of one process apart; the device's own candidate
//! lock keeps other processes and administrators out.
//!
//! The device lock lives and dies with the connection that took it. When a
//! session is severed, the guard keeps the local slot and
//! [`LockManager::relock`] takes the device lock again on the new connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use junos_common::{JunosError, JunosResult, ReconcilerConfig, Rpc};

use crate::session::{Session, SessionState};

/// How `acquire` behaves while another local transaction holds the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Fail with `LockConflict` immediately
    FailFast,
    /// Wait up to the given time, then fail with `LockConflict`
    Wait(Duration),
}

impl LockWait {
    /// Builds the policy from `transaction.lock_wait_secs`
    pub fn from_config(config: &ReconcilerConfig) -> Self {
        match config.lock_wait() {
            Some(wait) => LockWait::Wait(wait),
            None => LockWait::FailFast,
        }
    }
}

/// Proof of a held lock; hand it back to [`LockManager::release`]
#[derive(Debug)]
pub struct LockGuard {
    device: String,
    /// Whether the current connection holds the device lock
    device_held: bool,
    _slot: OwnedMutexGuard<()>,
}

impl LockGuard {
    /// Device the lock belongs to
    pub fn device(&self) -> &str {
        &self.device
    }

    /// True while the device lock is held on the current connection
    pub fn holds_device_lock(&self) -> bool {
        self.device_held
    }
}

/// Lock manager shared by every coordinator of a process
pub struct LockManager {
    /// Behaviour when the local slot is taken
    wait: LockWait,
    /// Local slots per device
    slots: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    /// Create new lock manager
    pub fn new(wait: LockWait) -> Self {
        Self {
            wait,
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the slot for a device
    fn slot(&self, device: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock();
        slots
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Check whether a local transaction currently holds the device
    pub fn is_held(&self, device: &str) -> bool {
        self.slot(device).try_lock().is_err()
    }

    /// Takes the local slot, then the device candidate lock
    #[instrument(skip(self, session), fields(device = %session.device()))]
    pub async fn acquire(&self, session: &mut Session) -> JunosResult<LockGuard> {
        let device = session.device().to_string();
        let slot = self.slot(&device);

        let permit = match self.wait {
            LockWait::FailFast => slot.try_lock_owned().map_err(|_| {
                JunosError::lock_conflict(&device, "held by another transaction of this process")
            })?,
            LockWait::Wait(wait) => tokio::time::timeout(wait, slot.lock_owned())
                .await
                .map_err(|_| {
                    JunosError::lock_conflict(
                        &device,
                        format!("held by another transaction of this process for over {:?}", wait),
                    )
                })?,
        };

        // Dropping `permit` on any early return frees the local slot
        lock_device(session).await?;
        info!("Acquired candidate lock");
        Ok(LockGuard {
            device,
            device_held: true,
            _slot: permit,
        })
    }

    /// Takes the device lock again after the session reconnected
    ///
    /// The local slot stays with `guard` whatever the outcome.
    #[instrument(skip(self, session, guard), fields(device = %guard.device()))]
    pub async fn relock(&self, session: &mut Session, guard: &mut LockGuard) -> JunosResult<()> {
        guard.device_held = false;
        lock_device(session).await?;
        guard.device_held = true;
        info!("Re-acquired candidate lock on new connection");
        Ok(())
    }

    /// Releases the device lock; the local slot is freed whatever the outcome
    #[instrument(skip(self, session, guard), fields(device = %guard.device()))]
    pub async fn release(&self, session: &mut Session, guard: LockGuard) -> JunosResult<()> {
        if !guard.device_held || !session.is_connected() {
            drop(guard);
            debug!(state = %session.state(), "No connection holds the device lock, nothing to unlock");
            return Ok(());
        }

        let result = session.call(&Rpc::UnlockCandidate).await;
        drop(guard);

        let reply = result?;
        if !reply.is_ok() {
            return Err(JunosError::unlock(session.device(), reply.error_message()));
        }

        session.set_state(SessionState::Unlocked);
        info!("Released candidate lock");
        Ok(())
    }
}

/// Sends `<lock>` and maps a refusal to `LockConflict`
async fn lock_device(session: &mut Session) -> JunosResult<()> {
    let reply = match session.call(&Rpc::LockCandidate).await {
        Ok(reply) => reply,
        Err(e) => {
            // The lock may have been granted; the severed session takes it down
            warn!(error = %e, "Lock request failed, device releases it with the session");
            return Err(e);
        }
    };
    if !reply.is_ok() {
        debug!(message = %reply.error_message(), "Device refused candidate lock");
        return Err(JunosError::lock_conflict(session.device(), reply.error_message()));
    }

    session.set_state(SessionState::Locked);
    Ok(())
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockWait::FailFast)
    }
}
