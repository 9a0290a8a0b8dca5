//! Transaction coordinator
//!
//! Drives one batch of statements through
//! `Idle → LockAcquired → Loaded → Validated → Committed → LockReleased`,
//! rolling the candidate back on failure. The lock is released exactly once
//! per transaction, whatever happened before.
//!
//! A transport failure severs the session. The batch is restarted only when
//! the session can reconnect; the device lock is then taken again on the new
//! connection before anything is loaded.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use junos_common::{ErrorKind, JunosError, JunosResult, ReconcilerConfig, Reply, Rpc, Statement};

use crate::builder::ChangeSet;
use crate::lock::{LockGuard, LockManager};
use crate::session::Session;

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    LockAcquired,
    Loaded,
    Validated,
    Committed,
    RolledBack,
    LockReleased,
}

impl TxState {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Idle => "idle",
            TxState::LockAcquired => "lock_acquired",
            TxState::Loaded => "loaded",
            TxState::Validated => "validated",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled_back",
            TxState::LockReleased => "lock_released",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered batch of statements applied atomically
#[derive(Debug, Clone)]
pub struct Transaction {
    label: String,
    statements: Vec<Statement>,
    state: TxState,
    history: Vec<TxState>,
    loaded: usize,
    committed: bool,
}

impl Transaction {
    /// Creates an idle transaction; `label` names it in logs
    pub fn new(label: impl Into<String>, statements: Vec<Statement>) -> Self {
        Self {
            label: label.into(),
            statements,
            state: TxState::Idle,
            history: vec![TxState::Idle],
            loaded: 0,
            committed: false,
        }
    }

    /// Deletes first, then sets
    pub fn from_changes(label: impl Into<String>, changes: &ChangeSet) -> Self {
        Self::new(label, changes.statements())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Current state
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Every state entered, in order
    pub fn history(&self) -> &[TxState] {
        &self.history
    }

    /// Statements accepted by the device in the last attempt
    pub fn loaded(&self) -> usize {
        self.loaded
    }

    /// True once the commit succeeded
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Rendered paths of every statement, for error reports
    pub fn paths(&self) -> Vec<String> {
        self.statements.iter().map(|s| s.path.to_string()).collect()
    }

    fn transition(&mut self, to: TxState) {
        debug!(transaction = %self.label, from = %self.state, to = %to, "Transaction state change");
        self.state = to;
        self.history.push(to);
    }
}

/// Bounded retries with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Transport retries from `[transaction]`
    pub fn from_config(config: &ReconcilerConfig) -> Self {
        Self::new(config.transaction.max_retries, config.retry_backoff())
    }

    /// Whether the given retry (0-indexed) is within budget
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Delay before the given retry: `base * 2^attempt`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ReconcilerConfig::default())
    }
}

/// Default log message attached to commits
pub const DEFAULT_COMMIT_COMMENT: &str = "committed by junos-syncd";

/// Runs transactions against a session under the shared lock manager
pub struct Coordinator {
    locks: Arc<LockManager>,
    retry: RetryPolicy,
    lock_retries: u32,
    commit_comment: String,
}

impl Coordinator {
    /// Create new coordinator
    pub fn new(locks: Arc<LockManager>, retry: RetryPolicy) -> Self {
        Self {
            locks,
            retry,
            lock_retries: 0,
            commit_comment: DEFAULT_COMMIT_COMMENT.to_string(),
        }
    }

    /// Builds a coordinator from the `[transaction]` section
    pub fn from_config(locks: Arc<LockManager>, config: &ReconcilerConfig) -> Self {
        Self::new(locks, RetryPolicy::from_config(config))
            .with_lock_retries(config.transaction.lock_retries)
            .with_commit_comment(&config.transaction.commit_comment)
    }

    /// Retries of a refused lock before giving up
    pub fn with_lock_retries(mut self, lock_retries: u32) -> Self {
        self.lock_retries = lock_retries;
        self
    }

    pub fn with_commit_comment(mut self, comment: impl Into<String>) -> Self {
        self.commit_comment = comment.into();
        self
    }

    /// Shared lock manager
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Applies `tx` on `session`. An empty transaction sends nothing.
    #[instrument(skip(self, session, tx), fields(device = %session.device(), transaction = %tx.label()))]
    pub async fn execute(&self, session: &mut Session, tx: &mut Transaction) -> JunosResult<()> {
        if tx.is_empty() {
            debug!("Nothing to apply");
            return Ok(());
        }

        session.ensure_connected().await?;
        let mut guard = self.acquire_with_retry(session).await?;
        tx.transition(TxState::LockAcquired);

        let outcome = self.apply_with_retry(session, &mut guard, tx).await;
        let released = self.release(session, guard).await;
        tx.transition(TxState::LockReleased);

        match (outcome, released) {
            (Ok(()), Ok(())) => {
                info!(statements = tx.statements.len(), "Transaction committed");
                Ok(())
            }
            (Ok(()), Err(release)) => {
                warn!(error = %release, "Committed, but the lock release failed");
                Err(release)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release)) => Err(JunosError::combine(e, release)),
        }
    }

    async fn acquire_with_retry(&self, session: &mut Session) -> JunosResult<LockGuard> {
        let mut attempt = 0;
        loop {
            match self.locks.acquire(session).await {
                Ok(guard) => return Ok(guard),
                Err(e) if e.is_retryable() && attempt < self.lock_retries => {
                    if session.is_lost() && !session.can_reconnect() {
                        return Err(e);
                    }
                    let delay = self.retry.delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Lock not acquired, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    if let Err(reconnect) = session.ensure_connected().await {
                        warn!(error = %reconnect, "Reconnect failed");
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn release(&self, session: &mut Session, guard: LockGuard) -> JunosResult<()> {
        self.locks.release(session, guard).await
    }

    async fn apply_with_retry(
        &self,
        session: &mut Session,
        guard: &mut LockGuard,
        tx: &mut Transaction,
    ) -> JunosResult<()> {
        let mut attempt = 0;
        loop {
            match self.apply_once(session, tx).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Transport && self.retry.should_retry(attempt) => {
                    if !session.is_connected() && !session.can_reconnect() {
                        warn!(error = %e, "Connection lost and cannot be re-established");
                        return Err(e);
                    }
                    let delay = self.retry.delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, restarting batch"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;

                    if !session.is_connected() {
                        if let Err(reconnect) = session.reconnect().await {
                            warn!(error = %reconnect, "Reconnect failed");
                            return Err(e);
                        }
                        self.locks.relock(session, guard).await?;
                    }
                    tx.transition(TxState::LockAcquired);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pass of load, validate and commit with the lock held.
    async fn apply_once(&self, session: &mut Session, tx: &mut Transaction) -> JunosResult<()> {
        tx.loaded = 0;
        let statements = tx.statements.clone();
        for stmt in &statements {
            let rpc = Rpc::LoadSet {
                statements: vec![stmt.clone()],
            };
            let reply = match session.call(&rpc).await {
                Ok(reply) => reply,
                Err(e) => {
                    self.rollback(session, tx).await;
                    return Err(e);
                }
            };
            if !reply.is_ok() {
                debug!(statement = %stmt, message = %reply.error_message(), "Statement rejected");
                self.rollback(session, tx).await;
                return Err(JunosError::config_conflict(
                    vec![stmt.path.to_string()],
                    reply.error_message(),
                ));
            }
            tx.loaded += 1;
        }
        tx.transition(TxState::Loaded);

        let reply = match session.call(&Rpc::CommitCheck).await {
            Ok(reply) => reply,
            Err(e) => {
                self.rollback(session, tx).await;
                return Err(e);
            }
        };
        if !reply.is_ok() {
            self.rollback(session, tx).await;
            return Err(JunosError::config_conflict(tx.paths(), reply.error_message()));
        }
        log_warnings("commit check", &reply);
        tx.transition(TxState::Validated);

        let commit = Rpc::Commit {
            comment: self.commit_comment.clone(),
        };
        let reply = match session.call(&commit).await {
            Ok(reply) => reply,
            Err(e) => {
                // The device may have committed; only a re-read can tell
                warn!(error = %e, "Commit outcome unknown");
                self.discard(session).await;
                return Err(JunosError::commit_unknown(tx.paths(), e.to_string()));
            }
        };
        if !reply.is_ok() {
            self.rollback(session, tx).await;
            return Err(JunosError::config_conflict(tx.paths(), reply.error_message()));
        }
        log_warnings("commit", &reply);

        tx.committed = true;
        tx.transition(TxState::Committed);
        Ok(())
    }

    async fn rollback(&self, session: &mut Session, tx: &mut Transaction) {
        self.discard(session).await;
        tx.transition(TxState::RolledBack);
    }

    /// Discards candidate edits, best effort.
    async fn discard(&self, session: &mut Session) {
        if !session.is_connected() {
            info!(
                state = %session.state(),
                "Skipping discard; the device drops candidate edits when it tears the session down"
            );
            return;
        }
        match session.call(&Rpc::DiscardChanges).await {
            Ok(reply) if reply.is_ok() => debug!("Candidate changes discarded"),
            Ok(reply) => warn!(message = %reply.error_message(), "Device refused to discard changes"),
            Err(e) => warn!(error = %e, "Failed to discard changes"),
        }
    }
}

fn log_warnings(stage: &str, reply: &Reply) {
    for warning in &reply.warnings {
        info!(stage, warning = %warning, "Device warning");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockWait;
    use crate::session::Timeouts;
    use junos_common::config_path;
    use junos_test::{DeviceVerifier, FaultKind, MockDevice, RpcVerifier, Stage};
    use pretty_assertions::assert_eq;

    fn session(device: &MockDevice) -> Session {
        Session::new(Box::new(device.connect()), Timeouts::default())
    }

    /// Session that can reconnect to the same device
    fn reconnecting_session(device: &MockDevice) -> Session {
        session(device).with_connector(Arc::new(device.clone()))
    }

    fn coordinator() -> Coordinator {
        Coordinator::new(
            Arc::new(LockManager::new(LockWait::FailFast)),
            RetryPolicy::new(2, Duration::from_millis(10)),
        )
    }

    fn description(text: &str) -> Transaction {
        Transaction::new(
            "test",
            vec![Statement::set(
                config_path!("interfaces", "ge-0/0/0", "description"),
                Some(text.to_string()),
            )],
        )
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy::new(2, Duration::from_millis(500));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(2), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_empty_transaction_sends_nothing() {
        let device = MockDevice::new("vsrx1");
        let mut session = session(&device);
        let mut tx = Transaction::new("noop", Vec::new());

        coordinator().execute(&mut session, &mut tx).await.unwrap();
        assert!(device.rpc_names().is_empty());
        assert_eq!(tx.history(), &[TxState::Idle]);
    }

    #[tokio::test]
    async fn test_happy_path_states_and_rpcs() {
        let device = MockDevice::new("vsrx1");
        let mut session = session(&device);
        let mut tx = description("uplink");

        coordinator().execute(&mut session, &mut tx).await.unwrap();
        assert!(tx.is_committed());
        assert_eq!(tx.loaded(), 1);
        assert_eq!(
            tx.history(),
            &[
                TxState::Idle,
                TxState::LockAcquired,
                TxState::Loaded,
                TxState::Validated,
                TxState::Committed,
                TxState::LockReleased,
            ]
        );
        assert_eq!(
            device.rpc_names(),
            vec!["lock", "load-configuration", "commit-check", "commit", "unlock"]
        );
        assert_eq!(device.commit_comments(), vec![DEFAULT_COMMIT_COMMENT]);
    }

    #[tokio::test]
    async fn test_load_rejection_stops_batch() {
        let device = MockDevice::new("vsrx1");
        device.reject(Stage::Load, "interfaces ge-0/0/1", "syntax error");
        let mut session = session(&device);
        let mut tx = Transaction::new(
            "batch",
            vec![
                Statement::set(config_path!("interfaces", "ge-0/0/0", "mtu"), Some("9192".into())),
                Statement::set(config_path!("interfaces", "ge-0/0/1", "mtu"), Some("9192".into())),
                Statement::set(config_path!("interfaces", "ge-0/0/2", "mtu"), Some("9192".into())),
            ],
        );

        let err = coordinator().execute(&mut session, &mut tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigConflict);
        assert_eq!(err.paths(), ["interfaces ge-0/0/1 mtu".to_string()]);
        assert!(err.to_string().contains("syntax error"));
        assert_eq!(tx.loaded(), 1);
        assert_eq!(
            tx.history(),
            &[TxState::Idle, TxState::LockAcquired, TxState::RolledBack, TxState::LockReleased]
        );
        assert_eq!(
            device.rpc_names(),
            vec!["lock", "load-configuration", "load-configuration", "discard-changes", "unlock"]
        );
        assert!(device.candidate_lines().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_restarts_batch() {
        let device = MockDevice::new("vsrx1");
        device.inject_fault("commit-check", FaultKind::Reset);
        let mut session = reconnecting_session(&device);
        let mut tx = description("uplink");

        coordinator().execute(&mut session, &mut tx).await.unwrap();
        assert!(tx.is_committed());
        assert_eq!(device.commit_count(), 1);
        assert_eq!(
            tx.history(),
            &[
                TxState::Idle,
                TxState::LockAcquired,
                TxState::Loaded,
                TxState::RolledBack,
                TxState::LockAcquired,
                TxState::Loaded,
                TxState::Validated,
                TxState::Committed,
                TxState::LockReleased,
            ]
        );
        // The reset connection took its lock and edits with it; the new one locks again
        assert_eq!(
            device.rpc_names(),
            vec![
                "lock",
                "load-configuration",
                "commit-check",
                "lock",
                "load-configuration",
                "commit-check",
                "commit",
                "unlock",
            ]
        );
        assert_eq!(device.lock_holder(), None);
    }

    #[tokio::test]
    async fn test_lost_connection_without_reconnect_is_final() {
        let device = MockDevice::new("vsrx1");
        device.inject_fault("load-configuration", FaultKind::Reset);
        let mut session = session(&device);
        let mut tx = description("uplink");
        let coordinator = coordinator();

        let err = coordinator.execute(&mut session, &mut tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.release_error().is_none());
        assert!(session.is_lost());
        assert_eq!(
            tx.history(),
            &[TxState::Idle, TxState::LockAcquired, TxState::RolledBack, TxState::LockReleased]
        );
        // No retry on the dead connection, nothing sent after the reset
        assert_eq!(device.rpc_names(), vec!["lock", "load-configuration"]);
        assert_eq!(device.lock_holder(), None);
        assert!(!coordinator.locks().is_held("vsrx1"));
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let device = MockDevice::new("vsrx1");
        for _ in 0..3 {
            device.inject_fault("load-configuration", FaultKind::Timeout);
        }
        let mut session = reconnecting_session(&device);
        let mut tx = description("uplink");

        let err = coordinator().execute(&mut session, &mut tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.is_timeout());
        assert_eq!(device.commit_count(), 0);
        assert_eq!(device.lock_holder(), None);

        let rpcs = RpcVerifier::new(&device);
        assert_eq!(rpcs.count("load-configuration"), 3);
        assert_eq!(rpcs.count("lock"), 3);
        rpcs.assert_not_sent("discard-changes").unwrap();
        rpcs.assert_not_sent("unlock").unwrap();
    }

    #[tokio::test]
    async fn test_commit_transport_failure_is_unknown() {
        let device = MockDevice::new("vsrx1");
        device.inject_fault("commit", FaultKind::TimeoutAfterApply);
        let mut session = reconnecting_session(&device);
        let mut tx = description("uplink");

        let err = coordinator().execute(&mut session, &mut tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommitUnknown);
        // Never retried, and nothing more is sent on the timed-out connection
        assert_eq!(
            device.rpc_names(),
            vec!["lock", "load-configuration", "commit-check", "commit"]
        );
        // The device did commit; the caller has to re-read to learn that
        assert_eq!(device.commit_count(), 1);
        assert!(!tx.is_committed());
        assert!(session.is_lost());
        assert_eq!(device.lock_holder(), None);
    }

    #[tokio::test]
    async fn test_commit_rejected_after_clean_check() {
        let device = MockDevice::new("vsrx1")
            .with_committed(["set interfaces ge-0/0/0 description old"]);
        device.reject(Stage::Commit, "interfaces ge-0/0/0", "commit script rejected the change");
        let verifier = DeviceVerifier::new(&device);
        let snapshot = verifier.snapshot();
        let mut session = reconnecting_session(&device);
        let mut tx = description("uplink");

        let err = coordinator().execute(&mut session, &mut tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigConflict);
        assert!(err.to_string().contains("commit script rejected"));
        assert!(!tx.is_committed());
        assert_eq!(
            tx.history(),
            &[
                TxState::Idle,
                TxState::LockAcquired,
                TxState::Loaded,
                TxState::Validated,
                TxState::RolledBack,
                TxState::LockReleased,
            ]
        );

        let rpcs = RpcVerifier::new(&device);
        rpcs.assert_sequence(&[
            "lock",
            "load-configuration",
            "commit-check",
            "commit",
            "discard-changes",
            "unlock",
        ])
        .unwrap();
        assert_eq!(rpcs.count("commit"), 1);
        verifier.assert_unchanged(&snapshot).unwrap();
        assert_eq!(device.candidate_lines(), device.committed_lines());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_never_taken_for_a_later_answer() {
        let device = MockDevice::new("vsrx1");
        // The first check answers only after its deadline; the commit itself is refused
        device.inject_fault("commit-check", FaultKind::LateReply);
        device.reject(Stage::Commit, "interfaces ge-0/0/0", "commit script rejected the change");
        let timeouts = Timeouts {
            command: Duration::from_secs(1),
            commit: Duration::from_secs(5),
        };
        let mut session = Session::new(Box::new(device.connect()), timeouts)
            .with_connector(Arc::new(device.clone()));
        let mut tx = description("uplink");

        let err = coordinator().execute(&mut session, &mut tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigConflict);
        assert!(!tx.is_committed());
        assert_eq!(
            tx.history(),
            &[
                TxState::Idle,
                TxState::LockAcquired,
                TxState::Loaded,
                TxState::RolledBack,
                TxState::LockAcquired,
                TxState::Loaded,
                TxState::Validated,
                TxState::RolledBack,
                TxState::LockReleased,
            ]
        );
        assert_eq!(device.commit_count(), 0);
        assert!(device.committed_lines().is_empty());
        assert_eq!(device.lock_holder(), None);
    }

    #[tokio::test]
    async fn test_lock_refusal_is_retried_then_terminal() {
        let device = MockDevice::new("vsrx1");
        device.lock_externally("admin");
        let mut session = session(&device);
        let mut tx = description("uplink");

        let err = coordinator()
            .with_lock_retries(2)
            .execute(&mut session, &mut tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LockConflict);
        assert_eq!(device.rpc_names(), vec!["lock", "lock", "lock"]);
        assert_eq!(tx.history(), &[TxState::Idle]);
    }

    #[tokio::test]
    async fn test_failure_and_failed_release_are_combined() {
        let device = MockDevice::new("vsrx1");
        device.reject(Stage::Check, "interfaces", "mtu out of range");
        device.inject_fault("unlock", FaultKind::Reset);
        let mut session = session(&device);
        let mut tx = description("uplink");
        let coordinator = coordinator();

        let err = coordinator.execute(&mut session, &mut tx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigConflict);
        let release = err.release_error().unwrap();
        assert_eq!(release.kind(), ErrorKind::Transport);
        assert!(!coordinator.locks().is_held("vsrx1"));
    }
}
