//! Test infrastructure for the Junos reconciliation crates
//!
//! Provides:
//! - An in-memory device speaking the engine's RPC vocabulary
//! - Scripted rejections and transport faults
//! - Fixtures for pre-existing device configuration
//! - Committed configuration and RPC log verification helpers

pub mod fixtures;
mod mock_device;
mod verification;

pub use fixtures::*;
pub use mock_device::*;
pub use verification::*;
