//! Error types for Junos reconciliation operations.
//!
//! Every failure the engine can report is a [`JunosError`] variant. Transport
//! problems keep their underlying cause as a [`TransportFailure`] so callers
//! can tell a timeout from a refused connection.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Junos operations.
pub type JunosResult<T> = Result<T, JunosError>;

/// Low-level cause of a transport error.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The call did not complete before its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Reading from or writing to the stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// The SSH client could not authenticate or establish the subsystem.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The peer sent something that is not valid NETCONF framing.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Flat classification of [`JunosError`], stable across annotation wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    LockConflict,
    ConfigConflict,
    CommitUnknown,
    AlreadyExists,
    Vanished,
    Decode,
    InvalidConfig,
    Unlock,
    Internal,
}

/// Errors that can occur while reconciling configuration against a device.
#[derive(Debug, Error)]
pub enum JunosError {
    /// Connectivity, authentication or deadline failure.
    #[error("Transport failure during {operation} on {device}: {source}")]
    Transport {
        /// Device the session talks to.
        device: String,
        /// The RPC or step that was in flight.
        operation: String,
        /// The preserved cause.
        #[source]
        source: TransportFailure,
    },

    /// Another session holds the candidate configuration lock.
    #[error("Candidate configuration on {device} is locked: {message}")]
    LockConflict {
        /// Device name.
        device: String,
        /// Verbatim device message, or the local holder description.
        message: String,
    },

    /// The device rejected statements on load, validate or commit.
    #[error("Device rejected configuration at [{}]: {message}", .paths.join(", "))]
    ConfigConflict {
        /// Paths of the statements involved.
        paths: Vec<String>,
        /// Verbatim device message.
        message: String,
    },

    /// The commit RPC failed in transit; the device may or may not have committed.
    #[error("Commit outcome unknown for [{}]: {message}; re-read before retrying", .paths.join(", "))]
    CommitUnknown {
        /// Paths of the statements in the batch.
        paths: Vec<String>,
        /// Description of the transport failure.
        message: String,
    },

    /// Create found the object already present on the device.
    #[error("{resource_type} '{id}' already exists on the device")]
    AlreadyExists {
        /// Resource type tag.
        resource_type: String,
        /// Resource identifier.
        id: String,
    },

    /// Update or Delete found no object on the device.
    #[error("{resource_type} '{id}' no longer exists on the device")]
    Vanished {
        /// Resource type tag.
        resource_type: String,
        /// Resource identifier.
        id: String,
    },

    /// A reply or configuration line could not be decoded.
    #[error("Failed to decode {context}: {message}")]
    Decode {
        /// What was being decoded.
        context: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// The device refused to release the candidate lock.
    #[error("Failed to release candidate lock on {device}: {message}")]
    Unlock {
        /// Device name.
        device: String,
        /// Verbatim device message.
        message: String,
    },

    /// A failure followed by a failed lock release; both are kept.
    #[error("{original}; lock release also failed: {release}")]
    ReleaseFailed {
        /// The error that triggered cleanup.
        original: Box<JunosError>,
        /// The error raised by the release itself.
        release: Box<JunosError>,
    },

    /// An error annotated with the resource and statement batch involved.
    #[error("{resource}: {source} (batch: {})", .statements.join("; "))]
    Resource {
        /// `type 'id'` description of the resource.
        resource: String,
        /// Rendered statements of the batch.
        statements: Vec<String>,
        /// The underlying error.
        #[source]
        source: Box<JunosError>,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl JunosError {
    /// Creates a transport error.
    pub fn transport(
        device: impl Into<String>,
        operation: impl Into<String>,
        source: TransportFailure,
    ) -> Self {
        Self::Transport {
            device: device.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Creates a lock conflict error.
    pub fn lock_conflict(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LockConflict {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Creates a configuration conflict error.
    pub fn config_conflict(paths: Vec<String>, message: impl Into<String>) -> Self {
        Self::ConfigConflict {
            paths,
            message: message.into(),
        }
    }

    /// Creates a commit-unknown error.
    pub fn commit_unknown(paths: Vec<String>, message: impl Into<String>) -> Self {
        Self::CommitUnknown {
            paths,
            message: message.into(),
        }
    }

    /// Creates an already-exists error.
    pub fn already_exists(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Creates a vanished error.
    pub fn vanished(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Vanished {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an unlock error.
    pub fn unlock(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unlock {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Joins the error that triggered cleanup with a failed release.
    pub fn combine(original: JunosError, release: JunosError) -> Self {
        Self::ReleaseFailed {
            original: Box::new(original),
            release: Box::new(release),
        }
    }

    /// Annotates the error with the resource and statement batch involved.
    pub fn annotate(self, resource: impl Into<String>, statements: Vec<String>) -> Self {
        Self::Resource {
            resource: resource.into(),
            statements,
            source: Box::new(self),
        }
    }

    /// Returns the classification of this error.
    ///
    /// Annotations are looked through. A combined release failure reports
    /// the kind of the error that triggered the cleanup.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JunosError::Transport { .. } => ErrorKind::Transport,
            JunosError::LockConflict { .. } => ErrorKind::LockConflict,
            JunosError::ConfigConflict { .. } => ErrorKind::ConfigConflict,
            JunosError::CommitUnknown { .. } => ErrorKind::CommitUnknown,
            JunosError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            JunosError::Vanished { .. } => ErrorKind::Vanished,
            JunosError::Decode { .. } => ErrorKind::Decode,
            JunosError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            JunosError::Unlock { .. } => ErrorKind::Unlock,
            JunosError::Internal { .. } => ErrorKind::Internal,
            JunosError::ReleaseFailed { original, .. } => original.kind(),
            JunosError::Resource { source, .. } => source.kind(),
        }
    }

    /// Returns the release failure carried by a combined error, if any.
    pub fn release_error(&self) -> Option<&JunosError> {
        match self {
            JunosError::ReleaseFailed { release, .. } => Some(release),
            JunosError::Resource { source, .. } => source.release_error(),
            _ => None,
        }
    }

    /// Returns the configuration paths reported by the error.
    pub fn paths(&self) -> &[String] {
        match self {
            JunosError::ConfigConflict { paths, .. } | JunosError::CommitUnknown { paths, .. } => {
                paths
            }
            JunosError::ReleaseFailed { original, .. } => original.paths(),
            JunosError::Resource { source, .. } => source.paths(),
            _ => &[],
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::LockConflict)
    }

    /// Returns true if the underlying cause is an expired deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            JunosError::Transport { source, .. } => {
                matches!(source, TransportFailure::Timeout(_))
            }
            JunosError::Resource { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
