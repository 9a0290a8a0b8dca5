//! Test fixtures for pre-existing device configuration
//!
//! Each fixture returns set-format lines suitable for
//! [`MockDevice::with_committed`](crate::MockDevice::with_committed).

use crate::MockDevice;

/// Device name used by fixture devices
pub const FIXTURE_DEVICE: &str = "vsrx1";

/// Creates a device whose committed configuration is the concatenation of `sets`
pub fn device_with<I>(sets: I) -> MockDevice
where
    I: IntoIterator<Item = Vec<String>>,
{
    let lines: Vec<String> = sets.into_iter().flatten().collect();
    MockDevice::new(FIXTURE_DEVICE).with_committed(lines)
}

fn lines(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|l| l.to_string()).collect()
}

/// Common interface fixtures
pub mod interface_fixtures {
    /// Physical interface with VLAN tagging and a description
    pub fn tagged_physical(name: &str) -> Vec<String> {
        vec![
            format!("set interfaces {} description \"managed uplink\"", name),
            format!("set interfaces {} vlan-tagging", name),
        ]
    }

    /// Logical unit with an IPv4 address
    pub fn unit_with_inet(name: &str, unit: u32, address: &str) -> Vec<String> {
        vec![format!(
            "set interfaces {} unit {} family inet address {}",
            name, unit, address
        )]
    }

    /// Aggregated Ethernet member
    pub fn ae_member(name: &str, ae: &str) -> Vec<String> {
        vec![format!("set interfaces {} gigether-options 802.3ad {}", name, ae)]
    }
}

/// Common routing instance fixtures
pub mod routing_fixtures {
    /// Virtual router with one member interface
    pub fn virtual_router(name: &str, interface: &str) -> Vec<String> {
        vec![
            format!("set routing-instances {} instance-type virtual-router", name),
            format!("set routing-instances {} interface {}", name, interface),
        ]
    }

    /// VRF with route distinguisher and target
    pub fn vrf(name: &str, rd: &str) -> Vec<String> {
        vec![
            format!("set routing-instances {} instance-type vrf", name),
            format!("set routing-instances {} route-distinguisher {}", name, rd),
            format!("set routing-instances {} vrf-target target:{}", name, rd),
        ]
    }
}

/// Common security policy fixtures
pub mod security_fixtures {
    use super::*;

    /// Zone pair with one permit-any rule
    pub fn permit_any(from: &str, to: &str, rule: &str) -> Vec<String> {
        let base = format!("set security policies from-zone {} to-zone {} policy {}", from, to, rule);
        vec![
            format!("{} match source-address any", base),
            format!("{} match destination-address any", base),
            format!("{} match application any", base),
            format!("{} then permit", base),
        ]
    }

    /// Security zones the policies refer to; not owned by any policy
    pub fn zones() -> Vec<String> {
        lines(&[
            "set security zones security-zone trust interfaces ge-0/0/0.0",
            "set security zones security-zone untrust interfaces ge-0/0/1.0",
        ])
    }
}

/// Common SNMP fixtures
pub mod snmp_fixtures {
    use super::*;

    /// SNMP system settings
    pub fn system() -> Vec<String> {
        lines(&[
            "set snmp location \"lab rack 4\"",
            "set snmp contact noc@example.net",
        ])
    }

    /// Read-only community restricted to one client prefix
    pub fn read_only_community(name: &str, client: &str) -> Vec<String> {
        vec![
            format!("set snmp community \"{}\" authorization read-only", name),
            format!("set snmp community \"{}\" clients {}", name, client),
        ]
    }
}
