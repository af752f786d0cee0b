use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use frm_schemas::{DesiredRoutes, LiveRoute, NewRoute, Subnet};

use crate::naming::route_name;

/// Mutations needed to turn the live route set into the desired one.
///
/// Deletes must be applied before inserts: when a subnet changes owner the
/// stale route and its replacement share a name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Stale live routes, sorted by name.
    pub deletes: Vec<LiveRoute>,
    /// Missing routes, sorted by next hop.
    pub inserts: Vec<NewRoute>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty()
    }

    pub fn mutation_count(&self) -> usize {
        self.deletes.len() + self.inserts.len()
    }
}

/// Diff `desired` against `live` for `network`.
///
/// A live route is stale when its next hop is not a desired owner, or the
/// owner's desired subnet differs from the route's destination. Every other
/// live route satisfies its owner. Each unsatisfied owner gets one insert.
/// Routes are never updated in place.
pub fn plan_sync(network: &str, desired: &DesiredRoutes, live: &[LiveRoute]) -> SyncPlan {
    let mut satisfied: BTreeSet<Ipv4Addr> = BTreeSet::new();
    let mut deletes: Vec<LiveRoute> = Vec::new();

    let mut live_sorted: Vec<&LiveRoute> = live.iter().collect();
    live_sorted.sort_by(|a, b| a.name.cmp(&b.name));

    for route in live_sorted {
        match wanted_by(desired, route) {
            Some(ip) => {
                satisfied.insert(ip);
            }
            None => deletes.push(route.clone()),
        }
    }

    let inserts = desired
        .iter()
        .filter(|(ip, _)| !satisfied.contains(ip))
        .map(|(ip, subnet)| NewRoute::new(route_name(network, subnet), *subnet, *ip))
        .collect();

    SyncPlan { deletes, inserts }
}

/// The desired owner this live route already serves, if any.
fn wanted_by(desired: &DesiredRoutes, route: &LiveRoute) -> Option<Ipv4Addr> {
    let ip: Ipv4Addr = route.next_hop_ip.parse().ok()?;
    let want = desired.get(&ip)?;
    let have: Subnet = route.dest_range.parse().ok()?;
    (have == *want).then_some(ip)
}
