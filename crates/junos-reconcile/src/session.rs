//! Device session: one exclusive, stateful connection with deadlines.
//!
//! A [`Session`] wraps a [`Transport`] and applies a deadline to every call.
//! It is passed explicitly (`&mut`) to each operation; nothing in the engine
//! keeps a global connection.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use junos_common::{
    Connector, ErrorKind, JunosError, JunosResult, ReconcilerConfig, Reply, Rpc, SshConnector,
    Transport, TransportFailure,
};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Closed, no further calls possible
    Disconnected,
    /// Connection severed by a transport failure
    Lost,
    /// Connected without holding the candidate lock
    Connected,
    /// Holding the candidate lock
    Locked,
    /// Lock released, connection still open
    Unlocked,
}

impl SessionState {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Lost => "lost",
            SessionState::Connected => "connected",
            SessionState::Locked => "locked",
            SessionState::Unlocked => "unlocked",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline for every call except commit
    pub command: Duration,
    /// Deadline for the commit call
    pub commit: Duration,
}

impl Timeouts {
    /// Builds deadlines from the `[timeouts]` section
    pub fn from_config(config: &ReconcilerConfig) -> Self {
        Self {
            command: config.command_timeout(),
            commit: config.commit_timeout(),
        }
    }

    /// Deadline applying to `rpc`
    pub fn for_rpc(&self, rpc: &Rpc) -> Duration {
        match rpc {
            Rpc::Commit { .. } => self.commit,
            _ => self.command,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_config(&ReconcilerConfig::default())
    }
}

/// One logical connection to a device
///
/// A transport failure of any kind severs the connection: an abandoned
/// request may still be answered, so the stream can no longer be trusted.
/// The device discards the candidate edits and the lock of a severed
/// session. A session built with a [`Connector`] can be re-established with
/// [`Session::reconnect`]; the candidate lock is not taken back.
pub struct Session {
    device: String,
    transport: Option<Box<dyn Transport>>,
    connector: Option<Arc<dyn Connector>>,
    state: SessionState,
    timeouts: Timeouts,
}

impl Session {
    /// Wraps an established transport
    pub fn new(transport: Box<dyn Transport>, timeouts: Timeouts) -> Self {
        Self {
            device: transport.peer().to_string(),
            transport: Some(transport),
            connector: None,
            state: SessionState::Connected,
            timeouts,
        }
    }

    /// Lets the session reconnect through `connector` after a lost connection
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Connects over SSH, retrying up to `device.connect_retries` times
    #[instrument(skip(config), fields(device = %config.device.host))]
    pub async fn open(config: &ReconcilerConfig) -> JunosResult<Self> {
        let connector = Arc::new(SshConnector::new(config.device.clone(), config.connect_timeout()));
        let attempts = config.device.connect_retries.max(1);
        let mut attempt = 1;

        loop {
            match connector.establish().await {
                Ok(transport) => {
                    info!(attempt, "Connected to device");
                    return Ok(Self::new(transport, Timeouts::from_config(config))
                        .with_connector(connector));
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, error = %e, "Connection attempt failed, retrying");
                    tokio::time::sleep(config.connect_retry_interval()).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Device name
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while RPCs can be sent
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// True after a transport failure severed the connection
    pub fn is_lost(&self) -> bool {
        self.state == SessionState::Lost
    }

    /// True when a lost connection can be re-established
    pub fn can_reconnect(&self) -> bool {
        self.connector.is_some() && self.state != SessionState::Disconnected
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(device = %self.device, from = %self.state, to = %state, "Session state change");
            self.state = state;
        }
    }

    /// Configured deadlines
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Opens a fresh connection in place of a lost one
    #[instrument(skip(self), fields(device = %self.device))]
    pub async fn reconnect(&mut self) -> JunosResult<()> {
        let connector = match (&self.connector, self.state) {
            (Some(connector), state) if state != SessionState::Disconnected => connector.clone(),
            _ => {
                return Err(JunosError::transport(
                    &self.device,
                    "reconnect",
                    TransportFailure::Closed,
                ))
            }
        };

        // Whatever the old connection held goes with it
        self.transport = None;
        self.transport = Some(connector.establish().await?);
        self.set_state(SessionState::Connected);
        info!("Reconnected to device");
        Ok(())
    }

    /// Reconnects a lost session; a no-op while connected
    pub async fn ensure_connected(&mut self) -> JunosResult<()> {
        if self.is_lost() && self.connector.is_some() {
            self.reconnect().await?;
        }
        Ok(())
    }

    /// Sends `rpc` under its default deadline
    pub async fn call(&mut self, rpc: &Rpc) -> JunosResult<Reply> {
        let deadline = self.timeouts.for_rpc(rpc);
        self.call_with_deadline(rpc, deadline).await
    }

    /// Sends `rpc`, failing with a timeout once `deadline` expires.
    ///
    /// Any transport failure severs the connection.
    pub async fn call_with_deadline(&mut self, rpc: &Rpc, deadline: Duration) -> JunosResult<Reply> {
        let Some(transport) = self.transport.as_mut() else {
            return Err(JunosError::transport(
                &self.device,
                rpc.name(),
                TransportFailure::Closed,
            ));
        };

        let result = match tokio::time::timeout(deadline, transport.send(rpc)).await {
            Ok(result) => result,
            Err(_) => Err(JunosError::transport(
                &self.device,
                rpc.name(),
                TransportFailure::Timeout(deadline),
            )),
        };

        match result {
            Ok(reply) => {
                for warning in &reply.warnings {
                    debug!(device = %self.device, rpc = rpc.name(), warning = %warning, "Device warning");
                }
                Ok(reply)
            }
            Err(e) => {
                if e.kind() == ErrorKind::Transport {
                    self.sever(&e);
                }
                Err(e)
            }
        }
    }

    /// Drops the connection after a transport failure
    fn sever(&mut self, cause: &JunosError) {
        if self.transport.take().is_some() {
            warn!(
                device = %self.device,
                error = %cause,
                "Connection dropped; the device discards this session's candidate edits and lock"
            );
        }
        self.set_state(SessionState::Lost);
    }

    /// Closes the connection; the device drops the lock and uncommitted edits
    pub async fn close(&mut self) -> JunosResult<()> {
        let result = match self.transport.take() {
            Some(mut transport) => transport.close().await,
            None => Ok(()),
        };
        if self.state != SessionState::Disconnected {
            self.set_state(SessionState::Disconnected);
            info!(device = %self.device, "Session closed");
        }
        result
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("device", &self.device)
            .field("state", &self.state)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}
