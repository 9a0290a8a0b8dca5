//! Common infrastructure for the Junos configuration reconciliation crates.
//!
//! - [`statement`]: set-style statement model with device-exact quoting
//! - [`rpc`]: the RPC vocabulary sent to the device and reply decoding
//! - [`transport`]: the [`Transport`] seam and NETCONF-over-SSH implementation
//! - [`config`]: TOML configuration for connection, deadlines and retries
//! - [`error`]: error types shared by every crate
//!
//! # Example
//!
//! ```ignore
//! use junos_common::{config_path, connect_ssh, ReconcilerConfig, Rpc, Statement, Transport};
//!
//! let config = ReconcilerConfig::load()?;
//! let mut transport = connect_ssh(&config.device, config.connect_timeout()).await?;
//! let stmt = Statement::set(config_path!("interfaces", "ge-0/0/0", "vlan-tagging"), None);
//! let reply = transport.send(&Rpc::LoadSet { statements: vec![stmt] }).await?;
//! ```

pub mod config;
pub mod error;
pub mod rpc;
pub mod statement;
pub mod transport;

// Re-export commonly used items at crate root
pub use config::{DeviceConfig, ReconcilerConfig, TimeoutConfig, TransactionConfig};
pub use error::{ErrorKind, JunosError, JunosResult, TransportFailure};
pub use rpc::{Reply, Rpc};
pub use statement::{tokenize_line, ConfigPath, Op, Statement};
pub use transport::{connect_ssh, Connector, NetconfTransport, SshConnector, SshTransport, Transport};
