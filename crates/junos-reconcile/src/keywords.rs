//! Configuration hierarchy keywords

/// Top-level interfaces hierarchy
pub const INTERFACES: &str = "interfaces";

/// Logical unit below an interface
pub const UNIT: &str = "unit";

/// Top-level routing instances hierarchy
pub const ROUTING_INSTANCES: &str = "routing-instances";

/// Top-level security hierarchy
pub const SECURITY: &str = "security";

/// Security policies below `security`
pub const POLICIES: &str = "policies";

/// Source zone of a policy set
pub const FROM_ZONE: &str = "from-zone";

/// Destination zone of a policy set
pub const TO_ZONE: &str = "to-zone";

/// Named policy rule
pub const POLICY: &str = "policy";

/// Top-level SNMP hierarchy
pub const SNMP: &str = "snmp";

/// SNMP community entry
pub const COMMUNITY: &str = "community";

/// Leaf and container names
pub mod fields {
    pub const DESCRIPTION: &str = "description";
    pub const DISABLE: &str = "disable";
    pub const MTU: &str = "mtu";
    pub const VLAN_TAGGING: &str = "vlan-tagging";
    pub const ENCAPSULATION: &str = "encapsulation";
    pub const GIGETHER_OPTIONS: &str = "gigether-options";
    pub const LACP_8023AD: &str = "802.3ad";

    pub const VLAN_ID: &str = "vlan-id";
    pub const FAMILY: &str = "family";
    pub const INET: &str = "inet";
    pub const INET6: &str = "inet6";
    pub const ADDRESS: &str = "address";
    pub const INTERFACE: &str = "interface";

    pub const INSTANCE_TYPE: &str = "instance-type";
    pub const ROUTE_DISTINGUISHER: &str = "route-distinguisher";
    pub const VRF_TARGET: &str = "vrf-target";
    pub const ROUTING_OPTIONS: &str = "routing-options";
    pub const AUTONOMOUS_SYSTEM: &str = "autonomous-system";

    pub const MATCH: &str = "match";
    pub const SOURCE_ADDRESS: &str = "source-address";
    pub const DESTINATION_ADDRESS: &str = "destination-address";
    pub const APPLICATION: &str = "application";
    pub const THEN: &str = "then";
    pub const COUNT: &str = "count";
    pub const LOG: &str = "log";
    pub const SESSION_INIT: &str = "session-init";
    pub const SESSION_CLOSE: &str = "session-close";

    pub const LOCATION: &str = "location";
    pub const CONTACT: &str = "contact";
    pub const FILTER_DUPLICATES: &str = "filter-duplicates";
    pub const AUTHORIZATION: &str = "authorization";
    pub const CLIENTS: &str = "clients";
    pub const VIEW: &str = "view";
}
