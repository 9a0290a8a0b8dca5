//! Verification helpers for reconciliation tests
//!
//! Provides assertion helpers to verify committed device configuration and
//! the RPCs a session sent.

use junos_common::Rpc;
use thiserror::Error;

use crate::MockDevice;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected statement '{statement}' not found in committed configuration")]
    StatementNotFound { statement: String },

    #[error("Unexpected statement '{statement}' in committed configuration")]
    UnexpectedStatement { statement: String },

    #[error("Expected {expected} committed lines under '{prefix}', found {actual}")]
    LineCountMismatch {
        prefix: String,
        expected: usize,
        actual: usize,
    },

    #[error("Committed configuration changed:\n--- expected\n{expected}\n--- actual\n{actual}")]
    SnapshotMismatch { expected: String, actual: String },

    #[error("Expected RPC sequence {expected:?}, got {actual:?}")]
    RpcMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Expected {expected} write RPCs, found {actual}")]
    WriteCountMismatch { expected: usize, actual: usize },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Committed configuration verifier
pub struct DeviceVerifier<'a> {
    device: &'a MockDevice,
}

impl<'a> DeviceVerifier<'a> {
    /// Create a new verifier for `device`
    pub fn new(device: &'a MockDevice) -> Self {
        Self { device }
    }

    /// Verify that a set-format line is committed
    pub fn assert_committed(&self, statement: &str) -> VerifyResult<()> {
        if self.device.committed_lines().iter().any(|l| l == statement) {
            Ok(())
        } else {
            Err(VerificationError::StatementNotFound {
                statement: statement.to_string(),
            })
        }
    }

    /// Verify that no committed line starts with `prefix`
    pub fn assert_absent(&self, prefix: &str) -> VerifyResult<()> {
        match self
            .device
            .committed_lines()
            .into_iter()
            .find(|l| l.starts_with(prefix))
        {
            Some(statement) => Err(VerificationError::UnexpectedStatement { statement }),
            None => Ok(()),
        }
    }

    /// Verify the number of committed lines starting with `prefix`
    pub fn assert_line_count(&self, prefix: &str, expected: usize) -> VerifyResult<()> {
        let actual = self
            .device
            .committed_lines()
            .iter()
            .filter(|l| l.starts_with(prefix))
            .count();
        if actual != expected {
            return Err(VerificationError::LineCountMismatch {
                prefix: prefix.to_string(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Capture the committed configuration for a later comparison
    pub fn snapshot(&self) -> String {
        self.device.committed_text()
    }

    /// Verify that the committed configuration equals `snapshot` byte for byte
    pub fn assert_unchanged(&self, snapshot: &str) -> VerifyResult<()> {
        let actual = self.device.committed_text();
        if actual != snapshot {
            return Err(VerificationError::SnapshotMismatch {
                expected: snapshot.to_string(),
                actual,
            });
        }
        Ok(())
    }
}

/// RPC log verifier
pub struct RpcVerifier {
    captured: Vec<Rpc>,
}

impl RpcVerifier {
    /// Create a verifier over the device's current RPC log
    pub fn new(device: &MockDevice) -> Self {
        Self {
            captured: device.rpc_log().into_iter().map(|r| r.rpc).collect(),
        }
    }

    fn names(&self) -> Vec<String> {
        self.captured.iter().map(|r| r.name().to_string()).collect()
    }

    /// Verify the exact sequence of RPC names
    pub fn assert_sequence(&self, expected: &[&str]) -> VerifyResult<()> {
        let actual = self.names();
        if actual != expected {
            return Err(VerificationError::RpcMismatch {
                expected: expected.iter().map(|s| s.to_string()).collect(),
                actual,
            });
        }
        Ok(())
    }

    /// Verify that an RPC was sent at least once
    pub fn assert_sent(&self, name: &str) -> VerifyResult<()> {
        if self.captured.iter().any(|r| r.name() == name) {
            Ok(())
        } else {
            Err(VerificationError::RpcMismatch {
                expected: vec![name.to_string()],
                actual: self.names(),
            })
        }
    }

    /// Verify that an RPC was never sent
    pub fn assert_not_sent(&self, name: &str) -> VerifyResult<()> {
        if self.captured.iter().any(|r| r.name() == name) {
            Err(VerificationError::RpcMismatch {
                expected: vec![format!("no {}", name)],
                actual: self.names(),
            })
        } else {
            Ok(())
        }
    }

    /// Verify the number of RPCs that modify configuration
    pub fn assert_write_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.captured.iter().filter(|r| r.is_write()).count();
        if actual != expected {
            return Err(VerificationError::WriteCountMismatch { expected, actual });
        }
        Ok(())
    }

    /// Count of RPCs with `name`
    pub fn count(&self, name: &str) -> usize {
        self.captured.iter().filter(|r| r.name() == name).count()
    }
}
