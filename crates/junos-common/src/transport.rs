//! Session transport: one logical NETCONF connection to a device.
//!
//! [`Transport`] is the seam the engine talks through. The production
//! implementation is [`NetconfTransport`] over the stdio of an `ssh -s
//! netconf` subprocess ([`connect_ssh`]); tests substitute an in-memory
//! device. No retry happens at this layer and deadlines are applied by the
//! caller. A [`Connector`] opens fresh transports for a session that lost
//! its connection.
//!
//! # Example
//!
//! ```ignore
//! use junos_common::{connect_ssh, Rpc, Transport};
//!
//! let mut transport = connect_ssh(&config.device, config.connect_timeout()).await?;
//! let reply = transport.send(&Rpc::LockCandidate).await?;
//! if !reply.is_ok() {
//!     eprintln!("lock refused: {}", reply.error_message());
//! }
//! ```

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, Join};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::config::DeviceConfig;
use crate::error::{JunosError, JunosResult, TransportFailure};
use crate::rpc::{Reply, Rpc};

/// NETCONF 1.0 end-of-message marker.
pub const NETCONF_DELIMITER: &str = "]]>]]>";

/// Hello sent by the client after reading the server hello.
pub const CLIENT_HELLO: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">"#,
    r#"<capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>"#,
    r#"</hello>"#
);

/// Session id announced in the server hello.
static SESSION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<session-id>\s*(\d+)\s*</session-id>").expect("Invalid regex pattern"));

/// `message-id` echoed on an `<rpc-reply>`.
static REPLY_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<rpc-reply\b[^>]*\bmessage-id="(\d+)""#).expect("Invalid regex pattern")
});

/// Message id a reply answers, when the device echoed one.
fn reply_message_id(raw: &str) -> Option<u64> {
    REPLY_ID_RE.captures(raw).and_then(|c| c[1].parse().ok())
}

/// A connection able to exchange RPCs with one device.
#[async_trait]
pub trait Transport: Send {
    /// Returns the device name used in logs and errors.
    fn peer(&self) -> &str;

    /// Sends one RPC and returns the decoded reply.
    ///
    /// Device-reported failures come back as an `Ok` reply with errors set;
    /// only connectivity problems are returned as `Err`.
    async fn send(&mut self, rpc: &Rpc) -> JunosResult<Reply>;

    /// Terminates the connection.
    async fn close(&mut self) -> JunosResult<()>;
}

/// Opens new transports to one device.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establishes a connection ready for RPCs.
    async fn establish(&self) -> JunosResult<Box<dyn Transport>>;
}

/// Connects through [`connect_ssh`].
#[derive(Debug, Clone)]
pub struct SshConnector {
    device: DeviceConfig,
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(device: DeviceConfig, connect_timeout: Duration) -> Self {
        Self {
            device,
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn establish(&self) -> JunosResult<Box<dyn Transport>> {
        let transport = connect_ssh(&self.device, self.connect_timeout).await?;
        Ok(Box::new(transport))
    }
}

/// NETCONF 1.0 framing over any byte stream.
pub struct NetconfTransport<S> {
    peer: String,
    stream: S,
    buffer: Vec<u8>,
    message_id: u64,
    session_id: Option<u64>,
    closed: bool,
    child: Option<Child>,
}

impl<S> NetconfTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Reads the server hello and answers with the client hello.
    pub async fn handshake(peer: impl Into<String>, stream: S) -> JunosResult<Self> {
        let mut transport = Self {
            peer: peer.into(),
            stream,
            buffer: Vec::new(),
            message_id: 0,
            session_id: None,
            closed: false,
            child: None,
        };

        let hello = transport.read_frame("hello").await?;
        if !hello.contains("<hello") {
            return Err(transport.failure(
                "hello",
                TransportFailure::Protocol("server did not send a hello".to_string()),
            ));
        }
        transport.session_id = SESSION_ID_RE
            .captures(&hello)
            .and_then(|c| c[1].parse().ok());
        transport.write_frame("hello", CLIENT_HELLO).await?;

        tracing::debug!(
            device = %transport.peer,
            session_id = ?transport.session_id,
            "NETCONF session established"
        );
        Ok(transport)
    }

    /// Returns the session id the device announced, if any.
    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    fn failure(&self, operation: &str, source: TransportFailure) -> JunosError {
        JunosError::transport(&self.peer, operation, source)
    }

    async fn write_frame(&mut self, operation: &str, body: &str) -> JunosResult<()> {
        let frame = format!("{}{}\n", body, NETCONF_DELIMITER);
        let written = match self.stream.write_all(frame.as_bytes()).await {
            Ok(()) => self.stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.closed = true;
            return Err(self.failure(operation, TransportFailure::Io(e)));
        }
        Ok(())
    }

    async fn read_frame(&mut self, operation: &str) -> JunosResult<String> {
        let delimiter = NETCONF_DELIMITER.as_bytes();
        loop {
            if let Some(pos) = self
                .buffer
                .windows(delimiter.len())
                .position(|w| w == delimiter)
            {
                let frame: Vec<u8> = self.buffer.drain(..pos).collect();
                self.buffer.drain(..delimiter.len());
                return Ok(String::from_utf8_lossy(&frame).trim().to_string());
            }

            let mut chunk = [0u8; 8192];
            let n = match self.stream.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    self.closed = true;
                    return Err(self.failure(operation, TransportFailure::Io(e)));
                }
            };
            if n == 0 {
                self.closed = true;
                return Err(self.failure(operation, TransportFailure::Closed));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    fn attach_child(&mut self, child: Child) {
        self.child = Some(child);
    }
}

#[async_trait]
impl<S> Transport for NetconfTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn send(&mut self, rpc: &Rpc) -> JunosResult<Reply> {
        if self.closed {
            return Err(self.failure(rpc.name(), TransportFailure::Closed));
        }

        self.message_id += 1;
        let body = format!(
            "<rpc message-id=\"{}\">{}</rpc>",
            self.message_id,
            rpc.render()
        );
        tracing::trace!(device = %self.peer, rpc = rpc.name(), body = %body, "Sending RPC");
        self.write_frame(rpc.name(), &body).await?;

        // A reply to an earlier, abandoned request may still be in the stream
        loop {
            let raw = self.read_frame(rpc.name()).await?;
            match reply_message_id(&raw) {
                Some(id) if id != self.message_id => {
                    tracing::warn!(
                        device = %self.peer,
                        rpc = rpc.name(),
                        expected = self.message_id,
                        received = id,
                        "Dropping reply to an earlier request"
                    );
                }
                _ => {
                    tracing::trace!(device = %self.peer, rpc = rpc.name(), reply = %raw, "Received reply");
                    return Ok(Reply::parse(&raw));
                }
            }
        }
    }

    async fn close(&mut self) -> JunosResult<()> {
        if !self.closed {
            // Best effort; the peer may already be gone.
            if let Err(e) = self.send(&Rpc::CloseSession).await {
                tracing::debug!(device = %self.peer, error = %e, "close-session not acknowledged");
            }
            self.closed = true;
        }
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                tracing::debug!(device = %self.peer, error = %e, "ssh client already exited");
            }
        }
        Ok(())
    }
}

/// Stream formed by the stdout/stdin of an ssh subprocess.
pub type SshStream = Join<ChildStdout, ChildStdin>;

/// Transport over an `ssh -s netconf` subprocess.
pub type SshTransport = NetconfTransport<SshStream>;

/// Builds the ssh command line for the netconf subsystem.
pub fn build_ssh_command(device: &DeviceConfig, connect_timeout: Duration) -> Command {
    let mut cmd = Command::new(&device.ssh_binary);
    cmd.arg("-p")
        .arg(device.port.to_string())
        .arg("-o")
        .arg("BatchMode=yes")
        .arg("-o")
        .arg(format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)));
    if let Some(key) = &device.ssh_key_file {
        cmd.arg("-i").arg(key);
    }
    for option in &device.ssh_options {
        cmd.arg("-o").arg(option);
    }
    cmd.arg("-l")
        .arg(&device.username)
        .arg(&device.host)
        .arg("-s")
        .arg("netconf");
    cmd
}

/// Spawns the ssh client and completes the NETCONF hello exchange.
///
/// A client that exits before the hello (wrong key, unknown host, refused
/// connection) is reported as an authentication failure carrying ssh's
/// stderr.
pub async fn connect_ssh(device: &DeviceConfig, connect_timeout: Duration) -> JunosResult<SshTransport> {
    tracing::debug!(host = %device.host, port = device.port, user = %device.username, "Spawning ssh netconf client");

    let mut cmd = build_ssh_command(device, connect_timeout);
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| JunosError::transport(&device.host, "connect", TransportFailure::Io(e)))?;

    let (stdout, stdin) = match (child.stdout.take(), child.stdin.take()) {
        (Some(stdout), Some(stdin)) => (stdout, stdin),
        _ => {
            return Err(JunosError::internal("ssh child spawned without piped stdio"));
        }
    };
    let mut stderr = child.stderr.take();

    let handshake = tokio::time::timeout(
        connect_timeout,
        NetconfTransport::handshake(device.host.clone(), tokio::io::join(stdout, stdin)),
    )
    .await;

    match handshake {
        Ok(Ok(mut transport)) => {
            transport.attach_child(child);
            Ok(transport)
        }
        Ok(Err(JunosError::Transport {
            source: TransportFailure::Closed,
            ..
        })) => {
            let mut message = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut message).await;
            }
            Err(JunosError::transport(
                &device.host,
                "connect",
                TransportFailure::Authentication(message.trim().to_string()),
            ))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(JunosError::transport(
            &device.host,
            "connect",
            TransportFailure::Timeout(connect_timeout),
        )),
    }
}
