//! Set-style configuration statement model.
//!
//! A [`ConfigPath`] names a node of the device configuration hierarchy and a
//! [`Statement`] is one `set` or `delete` instruction against it. Rendering
//! follows the device grammar exactly: tokens that contain whitespace or
//! special characters are double quoted, `"` and `\` are escaped.
//!
//! # Example
//!
//! ```
//! use junos_common::{config_path, Statement};
//!
//! let path = config_path!("interfaces", "ge-0/0/0", "description");
//! let stmt = Statement::set(path, Some("uplink to core".to_string()));
//! assert_eq!(stmt.to_string(), "set interfaces ge-0/0/0 description \"uplink to core\"");
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{JunosError, JunosResult};

/// Characters that force a token to be quoted.
static NEEDS_QUOTE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\s"';{}#|&<>()\[\]\\]"#).expect("Invalid regex pattern"));

/// Characters escaped inside a quoted token.
static QUOTE_ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(["\\])"#).expect("Invalid regex pattern"));

/// Quotes a token for use in a configuration statement.
///
/// ```
/// use junos_common::statement::quote_token;
///
/// assert_eq!(quote_token("ge-0/0/0"), "ge-0/0/0");
/// assert_eq!(quote_token("uplink to core"), "\"uplink to core\"");
/// assert_eq!(quote_token("say \"hi\""), "\"say \\\"hi\\\"\"");
/// ```
pub fn quote_token(token: &str) -> String {
    if !token.is_empty() && !NEEDS_QUOTE_RE.is_match(token) {
        return token.to_string();
    }
    let escaped = QUOTE_ESCAPE_RE.replace_all(token, r"\$1");
    format!("\"{}\"", escaped)
}

/// Splits one line of set-style configuration text into tokens.
///
/// Quoted tokens are unquoted and unescaped. A `#` that starts a token
/// outside quotes begins a comment running to the end of the line, which
/// covers the `## SECRET-DATA` trailer the device appends to secrets.
pub fn tokenize_line(line: &str) -> JunosResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.trim().chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '#' {
            break;
        }
        let mut token = String::new();
        if c == '"' {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some(escaped) => token.push(escaped),
                        None => break,
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => token.push(other),
                }
            }
            if !closed {
                return Err(JunosError::decode(
                    format!("configuration line '{}'", line),
                    "unterminated quoted string",
                ));
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        tokens.push(token);
    }

    Ok(tokens)
}

/// A node of the configuration hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigPath(Vec<String>);

impl ConfigPath {
    /// Builds a path from hierarchy tokens.
    pub fn new<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    /// Returns the hierarchy tokens.
    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    /// Returns the number of tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the configuration root.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new path with one more token.
    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut tokens = self.0.clone();
        tokens.push(token.into());
        Self(tokens)
    }

    /// Returns a new path extended with several tokens.
    pub fn join<I, T>(&self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut joined = self.0.clone();
        joined.extend(tokens.into_iter().map(Into::into));
        Self(joined)
    }

    /// Returns the enclosing path, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Returns true if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &ConfigPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns true if `tokens` begins with this path.
    pub fn is_prefix_of(&self, tokens: &[String]) -> bool {
        tokens.starts_with(&self.0)
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for token in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(&quote_token(token))?;
            first = false;
        }
        Ok(())
    }
}

/// Builds a [`ConfigPath`] from expressions convertible into `String`.
#[macro_export]
macro_rules! config_path {
    ($($token:expr),* $(,)?) => {
        $crate::statement::ConfigPath::new(vec![$($token.to_string()),*])
    };
}

/// Statement operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Op {
    /// Create or replace the node.
    Set,
    /// Remove the node and everything below it.
    Delete,
}

impl Op {
    /// Returns the keyword used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Set => "set",
            Op::Delete => "delete",
        }
    }
}

/// One `set` or `delete` instruction.
///
/// The value is the final token of a single-valued leaf (`description`,
/// `mtu`). Keys of list entries (an address, a policy name) belong to the
/// path, and such statements carry no value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub path: ConfigPath,
    pub op: Op,
    pub value: Option<String>,
}

impl Statement {
    /// Creates a statement.
    pub fn new(path: ConfigPath, op: Op, value: Option<String>) -> Self {
        Self { path, op, value }
    }

    /// Creates a `set` statement.
    pub fn set(path: ConfigPath, value: Option<String>) -> Self {
        Self::new(path, Op::Set, value)
    }

    /// Creates a `delete` statement. Deletes never carry a value.
    pub fn delete(path: ConfigPath) -> Self {
        Self::new(path, Op::Delete, None)
    }

    /// Returns true if both statements target the same node with the same
    /// operation. Values are compared for `set` only.
    pub fn is_duplicate_of(&self, other: &Statement) -> bool {
        if self.path != other.path || self.op != other.op {
            return false;
        }
        match self.op {
            Op::Delete => true,
            Op::Set => self.value == other.value,
        }
    }

    /// Returns the full token sequence: path followed by the value, if any.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens = self.path.tokens().to_vec();
        if let Some(value) = &self.value {
            tokens.push(value.clone());
        }
        tokens
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op.as_str())?;
        if !self.path.is_empty() {
            write!(f, " {}", self.path)?;
        }
        if let Some(value) = &self.value {
            write!(f, " {}", quote_token(value))?;
        }
        Ok(())
    }
}

/// Removes duplicate statements, keeping the first occurrence.
pub fn dedup_statements(statements: Vec<Statement>) -> Vec<Statement> {
    let mut kept: Vec<Statement> = Vec::with_capacity(statements.len());
    for stmt in statements {
        if !kept.iter().any(|k| k.is_duplicate_of(&stmt)) {
            kept.push(stmt);
        }
    }
    kept
}
