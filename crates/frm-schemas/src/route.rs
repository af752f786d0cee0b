use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::Subnet;

/// Priority given to every route the manager creates.
pub const DEFAULT_ROUTE_PRIORITY: u32 = 1000;

/// A route as it currently exists in the cloud route table.
///
/// Fields are kept exactly as the backend reported them; the diff decides
/// what a malformed next hop or destination means.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LiveRoute {
    pub name: String,
    pub dest_range: String,
    pub next_hop_ip: String,
}

impl LiveRoute {
    pub fn new(
        name: impl Into<String>,
        dest_range: impl Into<String>,
        next_hop_ip: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            dest_range: dest_range.into(),
            next_hop_ip: next_hop_ip.into(),
        }
    }

    /// True when this route already sends `subnet` to `ip`.
    pub fn matches(&self, ip: Ipv4Addr, subnet: &Subnet) -> bool {
        self.next_hop_ip.parse::<Ipv4Addr>().ok() == Some(ip)
            && self.dest_range.parse::<Subnet>().ok().as_ref() == Some(subnet)
    }
}

/// A route the manager wants the backend to create.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoute {
    pub name: String,
    pub dest_range: Subnet,
    pub next_hop_ip: Ipv4Addr,
    pub priority: u32,
}

impl NewRoute {
    pub fn new(name: impl Into<String>, dest_range: Subnet, next_hop_ip: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            dest_range,
            next_hop_ip,
            priority: DEFAULT_ROUTE_PRIORITY,
        }
    }

    pub fn to_live(&self) -> LiveRoute {
        LiveRoute::new(
            self.name.clone(),
            self.dest_range.to_string(),
            self.next_hop_ip.to_string(),
        )
    }
}
