//! In-memory Junos device
//!
//! [`MockDevice`] keeps a committed and a candidate configuration as ordered
//! token lines and answers the engine's RPC vocabulary the way a device does:
//! the candidate lock is exclusive, loads edit the shared candidate, commit
//! copies candidate to committed, and `show configuration` renders committed
//! lines in set format. Tests attach sessions with [`MockDevice::connect`]
//! (or hand the device out as a [`Connector`]), script rejections and
//! transport faults, and inspect the RPC log.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};

use junos_common::statement::{quote_token, tokenize_line};
use junos_common::{
    Connector, JunosError, JunosResult, Op, Reply, Rpc, Statement, Transport, TransportFailure,
};

/// Deadline reported by injected timeouts.
pub const FAULT_DEADLINE: Duration = Duration::from_secs(60);

/// Warning the device attaches when a delete matches nothing.
pub const STATEMENT_NOT_FOUND: &str = "statement not found";

/// Stage at which a scripted rejection fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// While loading a statement under the prefix
    Load,
    /// On `commit check` while the candidate holds a line under the prefix
    Check,
    /// On `commit` while the candidate holds a line under the prefix
    Commit,
}

/// Transport fault injected into the next matching RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Time out before the RPC has any effect
    Timeout,
    /// Drop the connection before the RPC has any effect; the device ends
    /// the session, releasing its lock and candidate edits
    Reset,
    /// Apply the RPC, then time out
    TimeoutAfterApply,
    /// Never answer
    Hang,
    /// Apply the RPC but hold the reply back; it arrives as the answer to
    /// the next RPC on the same connection, and every later reply shifts by one
    LateReply,
}

/// Owner of the candidate configuration lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockHolder {
    /// A session attached through [`MockDevice::connect`]
    Session(u64),
    /// Another administrator, see [`MockDevice::lock_externally`]
    External(String),
}

/// One RPC received by the device
#[derive(Debug, Clone)]
pub struct RpcRecord {
    /// Session that sent it
    pub session: u64,
    /// The RPC itself
    pub rpc: Rpc,
}

/// Pauses the next commit until released.
pub struct CommitGate {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl CommitGate {
    /// Waits until a commit is parked at the gate.
    pub async fn wait_reached(&self) {
        self.reached.notified().await;
    }

    /// Lets the parked commit proceed.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

struct Rejection {
    stage: Stage,
    prefix: Vec<String>,
    message: String,
}

struct Fault {
    rpc: &'static str,
    kind: FaultKind,
}

#[derive(Default)]
struct DeviceState {
    committed: Vec<Vec<String>>,
    candidate: Vec<Vec<String>>,
    lock: Option<LockHolder>,
    rejections: Vec<Rejection>,
    faults: Vec<Fault>,
    log: Vec<RpcRecord>,
    commit_comments: Vec<String>,
    next_session: u64,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

/// Adds a line, replacing the previous value of a single-valued leaf.
fn apply_set(config: &mut Vec<Vec<String>>, stmt: &Statement) {
    let tokens = stmt.tokens();
    let path = stmt.path.tokens();

    let mut position = None;
    if stmt.value.is_some() {
        position = config
            .iter()
            .position(|line| line.len() == path.len() + 1 && line.starts_with(path));
        config.retain(|line| !(line.len() == path.len() + 1 && line.starts_with(path)));
    }

    // Bare containers disappear once something lives below them
    config.retain(|line| !(line.len() < tokens.len() && tokens.starts_with(line)));

    if config.iter().any(|line| line.starts_with(&tokens)) {
        return;
    }
    match position {
        Some(pos) if pos <= config.len() => config.insert(pos, tokens),
        _ => config.push(tokens),
    }
}

/// Keywords whose next token names an object node the device keeps after
/// its last child is deleted.
const OBJECT_KEYWORDS: &[&str] = &[
    "interfaces",
    "unit",
    "routing-instances",
    "to-zone",
    "policy",
    "community",
];

/// Innermost object node strictly enclosing `tokens`.
fn enclosing_object(tokens: &[String]) -> Option<&[String]> {
    (2..tokens.len())
        .rev()
        .map(|len| &tokens[..len])
        .find(|node| OBJECT_KEYWORDS.contains(&node[node.len() - 2].as_str()))
}

/// Removes every line under `tokens`; returns false when nothing matched.
fn apply_delete(config: &mut Vec<Vec<String>>, tokens: &[String]) -> bool {
    let Some(first) = config.iter().position(|line| line.starts_with(tokens)) else {
        return false;
    };
    config.retain(|line| !line.starts_with(tokens));

    if let Some(node) = enclosing_object(tokens) {
        if !config.iter().any(|line| line.starts_with(node)) {
            config.insert(first.min(config.len()), node.to_vec());
        }
    }
    true
}

fn render_line(tokens: &[String]) -> String {
    let quoted: Vec<String> = tokens.iter().map(|t| quote_token(t)).collect();
    format!("set {}", quoted.join(" "))
}

fn lock_message(holder: &LockHolder) -> String {
    match holder {
        LockHolder::Session(id) => format!(
            "configuration database locked by:\n  netconf session {} (pid {})",
            id,
            4000 + id
        ),
        LockHolder::External(user) => format!(
            "configuration database locked by:\n  {} terminal p0 (pid 4242)",
            user
        ),
    }
}

impl DeviceState {
    fn locked_by_other(&self, session: u64) -> Option<&LockHolder> {
        match &self.lock {
            Some(LockHolder::Session(id)) if *id == session => None,
            other => other.as_ref(),
        }
    }

    fn rejection(&self, stage: Stage, lines: &[Vec<String>]) -> Option<String> {
        self.rejections
            .iter()
            .filter(|r| r.stage == stage)
            .find(|r| lines.iter().any(|line| line.starts_with(&r.prefix)))
            .map(|r| r.message.clone())
    }

    fn end_session(&mut self, session: u64) {
        if self.lock == Some(LockHolder::Session(session)) {
            self.lock = None;
            self.candidate = self.committed.clone();
            debug!(session, "Session ended holding the lock, candidate discarded");
        }
    }

    fn handle(&mut self, session: u64, rpc: &Rpc) -> Reply {
        match rpc {
            Rpc::LockCandidate => {
                if let Some(holder) = self.locked_by_other(session) {
                    return Reply::error(lock_message(holder));
                }
                if self.lock.is_none() {
                    if self.candidate != self.committed {
                        return Reply::error("configuration database modified");
                    }
                    self.lock = Some(LockHolder::Session(session));
                }
                Reply::ok("")
            }
            Rpc::UnlockCandidate => {
                if self.lock == Some(LockHolder::Session(session)) {
                    self.lock = None;
                    Reply::ok("")
                } else {
                    Reply::error("configuration database is not locked by this session")
                }
            }
            Rpc::LoadSet { statements } => {
                if let Some(holder) = self.locked_by_other(session) {
                    return Reply::error(lock_message(holder));
                }
                let mut reply = Reply::ok("");
                for stmt in statements {
                    let tokens = stmt.tokens();
                    if let Some(message) = self.rejection(Stage::Load, std::slice::from_ref(&tokens)) {
                        reply.errors.push(message);
                        return reply;
                    }
                    match stmt.op {
                        Op::Set => apply_set(&mut self.candidate, stmt),
                        Op::Delete => {
                            if !apply_delete(&mut self.candidate, stmt.path.tokens()) {
                                reply.warnings.push(STATEMENT_NOT_FOUND.to_string());
                            }
                        }
                    }
                }
                reply
            }
            Rpc::CommitCheck => match self.rejection(Stage::Check, &self.candidate) {
                Some(message) => Reply::error(message),
                None => Reply::ok(""),
            },
            Rpc::Commit { comment } => {
                if let Some(holder) = self.locked_by_other(session) {
                    return Reply::error(lock_message(holder));
                }
                if let Some(message) = self.rejection(Stage::Check, &self.candidate) {
                    return Reply::error(message);
                }
                if let Some(message) = self.rejection(Stage::Commit, &self.candidate) {
                    return Reply::error(message);
                }
                self.committed = self.candidate.clone();
                self.commit_comments.push(comment.clone());
                Reply::ok("")
            }
            Rpc::DiscardChanges => {
                self.candidate = self.committed.clone();
                Reply::ok("")
            }
            Rpc::ShowConfiguration { path } => {
                let lines: Vec<String> = self
                    .committed
                    .iter()
                    .filter(|line| path.is_prefix_of(line))
                    .map(|line| render_line(line))
                    .collect();
                Reply::ok(lines.join("\n"))
            }
            Rpc::Command { text } => Reply::ok(format!("{}\nHostname: mock\nModel: vsrx", text)),
            Rpc::CloseSession => {
                self.end_session(session);
                Reply::ok("")
            }
        }
    }
}

/// Shared handle to one in-memory device.
#[derive(Clone)]
pub struct MockDevice {
    name: String,
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// Creates an empty device
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(DeviceState::default())),
        }
    }

    /// Seeds committed (and candidate) configuration from set-format lines
    pub fn with_committed<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        {
            let mut state = self.state.lock();
            for line in lines {
                let tokens = match tokenize_line(line.as_ref()) {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        warn!(line = line.as_ref(), error = %e, "Skipping fixture line");
                        continue;
                    }
                };
                let tokens = match tokens.split_first() {
                    Some((first, rest)) if first == "set" => rest.to_vec(),
                    _ => tokens,
                };
                if tokens.is_empty() {
                    continue;
                }
                let stmt = Statement::set(junos_common::ConfigPath::new(tokens), None);
                apply_set(&mut state.committed, &stmt);
            }
            state.candidate = state.committed.clone();
        }
        self
    }

    /// Device name used by its sessions
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opens a new session to the device
    pub fn connect(&self) -> MockTransport {
        let session = {
            let mut state = self.state.lock();
            state.next_session += 1;
            state.next_session
        };
        debug!(device = %self.name, session, "Mock session opened");
        MockTransport {
            device: self.clone(),
            session,
            closed: false,
            held_reply: None,
        }
    }

    /// Rejects statements under `prefix` at `stage` with a verbatim message
    pub fn reject(&self, stage: Stage, prefix: &str, message: impl Into<String>) {
        let prefix = tokenize_line(prefix).unwrap_or_default();
        self.state.lock().rejections.push(Rejection {
            stage,
            prefix,
            message: message.into(),
        });
    }

    /// Removes every scripted rejection
    pub fn clear_rejections(&self) {
        self.state.lock().rejections.clear();
    }

    /// Injects a fault into the next RPC named `rpc` (see `Rpc::name`)
    pub fn inject_fault(&self, rpc: &'static str, kind: FaultKind) {
        self.state.lock().faults.push(Fault { rpc, kind });
    }

    /// Takes the candidate lock on behalf of another administrator
    pub fn lock_externally(&self, user: impl Into<String>) {
        self.state.lock().lock = Some(LockHolder::External(user.into()));
    }

    /// Releases a lock taken with [`MockDevice::lock_externally`]
    pub fn unlock_externally(&self) {
        let mut state = self.state.lock();
        if matches!(state.lock, Some(LockHolder::External(_))) {
            state.lock = None;
        }
    }

    /// Current lock owner
    pub fn lock_holder(&self) -> Option<LockHolder> {
        self.state.lock().lock.clone()
    }

    /// Parks the next commit until the returned gate is released
    pub fn hold_next_commit(&self) -> CommitGate {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.state.lock().gate = Some((reached.clone(), release.clone()));
        CommitGate { reached, release }
    }

    /// Committed configuration in set format
    pub fn committed_lines(&self) -> Vec<String> {
        self.state.lock().committed.iter().map(|l| render_line(l)).collect()
    }

    /// Candidate configuration in set format
    pub fn candidate_lines(&self) -> Vec<String> {
        self.state.lock().candidate.iter().map(|l| render_line(l)).collect()
    }

    /// Committed configuration as one text blob
    pub fn committed_text(&self) -> String {
        self.committed_lines().join("\n")
    }

    /// Every RPC received so far
    pub fn rpc_log(&self) -> Vec<RpcRecord> {
        self.state.lock().log.clone()
    }

    /// Names of every RPC received so far
    pub fn rpc_names(&self) -> Vec<&'static str> {
        self.state.lock().log.iter().map(|r| r.rpc.name()).collect()
    }

    /// Number of RPCs that modify configuration (load and commit)
    pub fn write_count(&self) -> usize {
        self.state.lock().log.iter().filter(|r| r.rpc.is_write()).count()
    }

    /// Number of successful commits
    pub fn commit_count(&self) -> usize {
        self.state.lock().commit_comments.len()
    }

    /// Log messages of successful commits
    pub fn commit_comments(&self) -> Vec<String> {
        self.state.lock().commit_comments.clone()
    }

    /// Every statement loaded so far, rendered
    pub fn loaded_statements(&self) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|r| match &r.rpc {
                Rpc::LoadSet { statements } => Some(statements.iter().map(ToString::to_string)),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Forgets the RPC log
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    fn record(&self, session: u64, rpc: &Rpc) -> Option<FaultKind> {
        let mut state = self.state.lock();
        state.log.push(RpcRecord {
            session,
            rpc: rpc.clone(),
        });
        let index = state.faults.iter().position(|f| f.rpc == rpc.name())?;
        Some(state.faults.remove(index).kind)
    }

    fn take_gate(&self, rpc: &Rpc) -> Option<(Arc<Notify>, Arc<Notify>)> {
        match rpc {
            Rpc::Commit { .. } => self.state.lock().gate.take(),
            _ => None,
        }
    }

    fn handle(&self, session: u64, rpc: &Rpc) -> Reply {
        self.state.lock().handle(session, rpc)
    }

    fn end_session(&self, session: u64) {
        self.state.lock().end_session(session);
    }
}

#[async_trait]
impl Connector for MockDevice {
    async fn establish(&self) -> JunosResult<Box<dyn Transport>> {
        Ok(Box::new(MockDevice::connect(self)))
    }
}

/// One session attached to a [`MockDevice`]
pub struct MockTransport {
    device: MockDevice,
    session: u64,
    closed: bool,
    /// Reply still in flight after a [`FaultKind::LateReply`]
    held_reply: Option<Reply>,
}

impl MockTransport {
    /// Session number on the device
    pub fn session_id(&self) -> u64 {
        self.session
    }

    fn failure(&self, rpc: &Rpc, source: TransportFailure) -> JunosError {
        JunosError::transport(&self.device.name, rpc.name(), source)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn peer(&self) -> &str {
        &self.device.name
    }

    async fn send(&mut self, rpc: &Rpc) -> JunosResult<Reply> {
        if self.closed {
            return Err(self.failure(rpc, TransportFailure::Closed));
        }

        let fault = self.device.record(self.session, rpc);
        match fault {
            Some(FaultKind::Timeout) => {
                return Err(self.failure(rpc, TransportFailure::Timeout(FAULT_DEADLINE)));
            }
            Some(FaultKind::Reset) => {
                self.closed = true;
                self.device.end_session(self.session);
                let reset = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
                return Err(self.failure(rpc, TransportFailure::Io(reset)));
            }
            Some(FaultKind::Hang) => return std::future::pending().await,
            Some(FaultKind::LateReply) => {
                let reply = self.device.handle(self.session, rpc);
                self.held_reply = Some(reply);
                return std::future::pending().await;
            }
            Some(FaultKind::TimeoutAfterApply) | None => {}
        }

        if let Some((reached, release)) = self.device.take_gate(rpc) {
            reached.notify_one();
            release.notified().await;
        }

        let reply = self.device.handle(self.session, rpc);
        if matches!(rpc, Rpc::CloseSession) {
            self.closed = true;
        }

        if fault == Some(FaultKind::TimeoutAfterApply) {
            return Err(self.failure(rpc, TransportFailure::Timeout(FAULT_DEADLINE)));
        }
        match self.held_reply.take() {
            Some(late) => {
                self.held_reply = Some(reply);
                Ok(late)
            }
            None => Ok(reply),
        }
    }

    async fn close(&mut self) -> JunosResult<()> {
        if !self.closed {
            self.device.end_session(self.session);
            self.closed = true;
        }
        Ok(())
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        if !self.closed {
            self.device.end_session(self.session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junos_common::config_path;
    use pretty_assertions::assert_eq;

    fn load(stmts: Vec<Statement>) -> Rpc {
        Rpc::LoadSet { statements: stmts }
    }

    #[tokio::test]
    async fn test_load_commit_show() {
        let device = MockDevice::new("vsrx1");
        let mut t = device.connect();

        assert!(t.send(&Rpc::LockCandidate).await.unwrap().is_ok());
        let reply = t
            .send(&load(vec![
                Statement::set(config_path!("interfaces", "ge-0/0/0", "mtu"), Some("1500".into())),
                Statement::set(config_path!("interfaces", "ge-0/0/0", "mtu"), Some("9000".into())),
                Statement::set(
                    config_path!("interfaces", "ge-0/0/0", "description"),
                    Some("to core".into()),
                ),
            ]))
            .await
            .unwrap();
        assert!(reply.is_ok());
        assert!(device.committed_lines().is_empty());

        t.send(&Rpc::Commit { comment: "test".into() }).await.unwrap();
        assert_eq!(
            device.committed_lines(),
            vec![
                "set interfaces ge-0/0/0 mtu 9000".to_string(),
                "set interfaces ge-0/0/0 description \"to core\"".to_string(),
            ]
        );

        let reply = t
            .send(&Rpc::ShowConfiguration {
                path: config_path!("interfaces", "ge-0/0/0"),
            })
            .await
            .unwrap();
        assert_eq!(
            reply.output,
            "set interfaces ge-0/0/0 mtu 9000\nset interfaces ge-0/0/0 description \"to core\""
        );
        assert_eq!(device.write_count(), 2);
        assert_eq!(device.commit_comments(), vec!["test".to_string()]);
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_and_released_on_close() {
        let device = MockDevice::new("vsrx1");
        let mut a = device.connect();
        let mut b = device.connect();

        assert!(a.send(&Rpc::LockCandidate).await.unwrap().is_ok());
        let reply = b.send(&Rpc::LockCandidate).await.unwrap();
        assert!(reply.error_message().contains("configuration database locked by"));

        a.close().await.unwrap();
        assert_eq!(device.lock_holder(), None);
        assert!(b.send(&Rpc::LockCandidate).await.unwrap().is_ok());
        assert_eq!(device.lock_holder(), Some(LockHolder::Session(b.session_id())));
    }

    #[tokio::test]
    async fn test_delete_missing_statement_warns() {
        let device = MockDevice::new("vsrx1").with_committed(["set snmp location lab"]);
        let mut t = device.connect();
        let reply = t
            .send(&load(vec![Statement::delete(config_path!("snmp", "contact"))]))
            .await
            .unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.warnings, vec![STATEMENT_NOT_FOUND.to_string()]);
    }

    #[tokio::test]
    async fn test_delete_keeps_enclosing_object() {
        let device = MockDevice::new("vsrx1").with_committed([
            "set interfaces ge-0/0/1 vlan-tagging",
            "set interfaces ge-0/0/2 unit 0 family inet address 192.0.2.1/24",
            "set snmp location lab",
        ]);
        let mut t = device.connect();
        t.send(&load(vec![
            Statement::delete(config_path!("interfaces", "ge-0/0/1", "vlan-tagging")),
            Statement::delete(config_path!("interfaces", "ge-0/0/2", "unit", "0")),
            Statement::delete(config_path!("snmp", "location")),
        ]))
        .await
        .unwrap();
        assert_eq!(
            device.candidate_lines(),
            vec![
                "set interfaces ge-0/0/1".to_string(),
                "set interfaces ge-0/0/2".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_bare_container_replaced_by_children() {
        let device = MockDevice::new("vsrx1").with_committed(["set interfaces ge-0/0/1"]);
        let mut t = device.connect();
        t.send(&Rpc::LockCandidate).await.unwrap();
        t.send(&load(vec![Statement::set(
            config_path!("interfaces", "ge-0/0/1", "vlan-tagging"),
            None,
        )]))
        .await
        .unwrap();
        t.send(&Rpc::Commit { comment: String::new() }).await.unwrap();
        assert_eq!(device.committed_lines(), vec!["set interfaces ge-0/0/1 vlan-tagging".to_string()]);
    }

    #[tokio::test]
    async fn test_faults_and_rejections() {
        let device = MockDevice::new("vsrx1");
        device.reject(Stage::Load, "interfaces ge-0/0/9", "error: invalid interface type");
        device.inject_fault("commit-check", FaultKind::Reset);
        let mut t = device.connect();

        let reply = t
            .send(&load(vec![Statement::set(config_path!("interfaces", "ge-0/0/9", "disable"), None)]))
            .await
            .unwrap();
        assert_eq!(reply.error_message(), "error: invalid interface type");

        let err = t.send(&Rpc::CommitCheck).await.unwrap_err();
        assert!(err.is_retryable());

        // The fault was consumed; a new connection works
        let mut fresh = device.connect();
        assert!(fresh.send(&Rpc::CommitCheck).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_reset_ends_the_session() {
        let device = MockDevice::new("vsrx1");
        device.inject_fault("load-configuration", FaultKind::Reset);
        let mut t = device.connect();
        t.send(&Rpc::LockCandidate).await.unwrap();

        t.send(&load(vec![Statement::set(config_path!("snmp", "location"), Some("lab".to_string()))]))
            .await
            .unwrap_err();
        assert_eq!(device.lock_holder(), None);
        assert!(device.candidate_lines().is_empty());

        let err = t.send(&Rpc::UnlockCandidate).await.unwrap_err();
        assert!(matches!(
            err,
            JunosError::Transport {
                source: TransportFailure::Closed,
                ..
            }
        ));
        assert_eq!(device.rpc_names(), vec!["lock", "load-configuration"]);
    }

    #[tokio::test]
    async fn test_late_reply_answers_the_next_request() {
        let device = MockDevice::new("vsrx1");
        device.lock_externally("admin");
        device.inject_fault("lock", FaultKind::LateReply);
        let mut t = device.connect();

        let waited = tokio::time::timeout(Duration::from_millis(10), t.send(&Rpc::LockCandidate)).await;
        assert!(waited.is_err());

        // The refusal of the lock shows up as the answer to discard
        let reply = t.send(&Rpc::DiscardChanges).await.unwrap();
        assert!(reply.error_message().contains("configuration database locked by"));
        assert!(t.send(&Rpc::CommitCheck).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_device_reconnects_as_connector() {
        let device = MockDevice::new("vsrx1");
        let connector: Arc<dyn Connector> = Arc::new(device.clone());
        let mut t = connector.establish().await.unwrap();
        assert_eq!(t.peer(), "vsrx1");
        assert!(t.send(&Rpc::LockCandidate).await.unwrap().is_ok());
        assert!(matches!(device.lock_holder(), Some(LockHolder::Session(_))));

        drop(t);
        assert_eq!(device.lock_holder(), None);
    }
}
