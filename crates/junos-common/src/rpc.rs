//! RPC vocabulary spoken to the device and reply decoding.
//!
//! The engine issues a fixed set of Junos XML RPCs. [`Rpc::render`] builds
//! the body sent inside `<rpc>`; [`Reply::parse`] turns the raw `<rpc-reply>`
//! into output text plus the error and warning messages the device embedded.
//! The device reports semantic failures in the reply body only, so callers
//! must check [`Reply::is_ok`] instead of relying on the transport result.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::statement::{ConfigPath, Statement};

/// RPC-ERROR block inside a reply.
static RPC_ERROR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<rpc-error>(.*?)</rpc-error>").expect("Invalid regex pattern"));

/// Severity inside an RPC-ERROR block.
static ERROR_SEVERITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<error-severity>\s*(\w+)\s*</error-severity>").expect("Invalid regex pattern")
});

/// Message inside an RPC-ERROR block.
static ERROR_MESSAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<error-message>\s*(.*?)\s*</error-message>").expect("Invalid regex pattern")
});

/// Text payload of a `<command format="text">` reply.
static OUTPUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(configuration-output|output)>(.*?)</(?:configuration-output|output)>")
        .expect("Invalid regex pattern")
});

/// Any remaining XML tag.
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("Invalid regex pattern"));

/// Line prefix the device uses for errors inside text output.
pub const ERROR_PREFIX: &str = "error:";

/// Line prefix the device uses for warnings inside text output.
pub const WARNING_PREFIX: &str = "warning:";

/// Escapes text for embedding in an XML element.
pub fn xml_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Reverses [`xml_escape`].
pub fn xml_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Operations the engine issues against the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rpc {
    /// Take the exclusive candidate configuration lock.
    LockCandidate,
    /// Release the candidate configuration lock.
    UnlockCandidate,
    /// Load set-style statements into the candidate configuration.
    LoadSet { statements: Vec<Statement> },
    /// Validate the candidate without committing (`commit check`).
    CommitCheck,
    /// Commit the candidate with a log comment.
    Commit { comment: String },
    /// Throw away uncommitted candidate edits.
    DiscardChanges,
    /// Show the committed configuration below a path in set format.
    ShowConfiguration { path: ConfigPath },
    /// Free-form operational command in text format.
    Command { text: String },
    /// Terminate the NETCONF session.
    CloseSession,
}

impl Rpc {
    /// Returns a short name for logging and error context.
    pub fn name(&self) -> &'static str {
        match self {
            Rpc::LockCandidate => "lock",
            Rpc::UnlockCandidate => "unlock",
            Rpc::LoadSet { .. } => "load-configuration",
            Rpc::CommitCheck => "commit-check",
            Rpc::Commit { .. } => "commit",
            Rpc::DiscardChanges => "discard-changes",
            Rpc::ShowConfiguration { .. } => "show-configuration",
            Rpc::Command { .. } => "command",
            Rpc::CloseSession => "close-session",
        }
    }

    /// Returns true if the RPC modifies the candidate or running configuration.
    pub fn is_write(&self) -> bool {
        matches!(self, Rpc::LoadSet { .. } | Rpc::Commit { .. })
    }

    /// Renders the RPC body sent inside `<rpc>`.
    pub fn render(&self) -> String {
        match self {
            Rpc::LockCandidate => "<lock><target><candidate/></target></lock>".to_string(),
            Rpc::UnlockCandidate => "<unlock><target><candidate/></target></unlock>".to_string(),
            Rpc::LoadSet { statements } => {
                let lines: Vec<String> = statements.iter().map(ToString::to_string).collect();
                format!(
                    "<load-configuration action=\"set\" format=\"text\"><configuration-set>{}</configuration-set></load-configuration>",
                    xml_escape(&lines.join("\n"))
                )
            }
            Rpc::CommitCheck => "<commit-configuration><check/></commit-configuration>".to_string(),
            Rpc::Commit { comment } => format!(
                "<commit-configuration><log>{}</log></commit-configuration>",
                xml_escape(comment)
            ),
            Rpc::DiscardChanges => "<discard-changes/>".to_string(),
            Rpc::ShowConfiguration { path } => {
                let command = if path.is_empty() {
                    "show configuration | display set".to_string()
                } else {
                    format!("show configuration {} | display set", path)
                };
                format!("<command format=\"text\">{}</command>", xml_escape(&command))
            }
            Rpc::Command { text } => {
                format!("<command format=\"text\">{}</command>", xml_escape(text))
            }
            Rpc::CloseSession => "<close-session/>".to_string(),
        }
    }
}

/// Decoded device reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Text payload, unescaped.
    pub output: String,
    /// Messages the device flagged as errors.
    pub errors: Vec<String>,
    /// Messages the device flagged as warnings.
    pub warnings: Vec<String>,
}

impl Reply {
    /// Creates a successful reply carrying `output`.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Self::default()
        }
    }

    /// Creates a reply carrying one device error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
            ..Self::default()
        }
    }

    /// Returns true if the device reported no error.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the device error messages joined for display.
    pub fn error_message(&self) -> String {
        self.errors.join("; ")
    }

    /// Parses a raw `<rpc-reply>` document.
    pub fn parse(raw: &str) -> Self {
        let mut reply = Reply::default();

        for block in RPC_ERROR_RE.captures_iter(raw) {
            let body = &block[1];
            let severity = ERROR_SEVERITY_RE
                .captures(body)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "error".to_string());
            let message = ERROR_MESSAGE_RE
                .captures(body)
                .map(|c| xml_unescape(&c[1]))
                .unwrap_or_else(|| xml_unescape(TAG_RE.replace_all(body, " ").trim()));
            if severity == "warning" {
                reply.warnings.push(message);
            } else {
                reply.errors.push(message);
            }
        }

        let payload = match OUTPUT_RE.captures(raw) {
            Some(c) => xml_unescape(&c[2]),
            None => {
                let without_errors = RPC_ERROR_RE.replace_all(raw, "");
                xml_unescape(TAG_RE.replace_all(&without_errors, "").trim())
            }
        };

        for line in payload.lines() {
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix(ERROR_PREFIX) {
                reply.errors.push(rest.trim().to_string());
            } else if let Some(rest) = trimmed.strip_prefix(WARNING_PREFIX) {
                reply.warnings.push(rest.trim().to_string());
            }
        }

        reply.output = payload.trim_matches('\n').to_string();
        reply
    }
}
