//! Route naming.
//!
//! `flannel-<network>-<subnet with '.' and '/' replaced by '-'>`, e.g.
//! `flannel-default-10-1-15-0-24`. The name is recomputed every time; nothing
//! remembers which name was assigned to which subnet.

use frm_schemas::Subnet;

/// Every route owned by `network` starts with this prefix.
pub fn route_name_prefix(network: &str) -> String {
    format!("flannel-{network}-")
}

pub fn route_name(network: &str, subnet: &Subnet) -> String {
    format!(
        "{}{}",
        route_name_prefix(network),
        subnet.to_string().replace(['.', '/'], "-")
    )
}

/// Backend-side list filter selecting this network's routes.
pub fn list_filter(network: &str) -> String {
    format!("name eq {}.*", route_name_prefix(network))
}

/// Recover the subnet a route name was derived from.
///
/// Returns `None` for names this network did not produce, including
/// non-canonical spellings of a valid subnet.
pub fn subnet_from_route_name(network: &str, name: &str) -> Option<Subnet> {
    let rest = name.strip_prefix(&route_name_prefix(network))?;
    let parts: Vec<&str> = rest.split('-').collect();
    let [a, b, c, d, len] = parts.as_slice() else {
        return None;
    };
    let subnet: Subnet = format!("{a}.{b}.{c}.{d}/{len}").parse().ok()?;
    (route_name(network, &subnet) == name).then_some(subnet)
}
