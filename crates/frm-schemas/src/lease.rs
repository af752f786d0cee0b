//! Lease records: decoding store nodes into `(owner ip, subnet)` pairs.
//!
//! A lease lives at `<prefix>/<subnet with '/' replaced by '-'>`, e.g.
//! `/coreos.com/network/subnets/10.1.15.0-24`. The subnet is always taken from
//! the key; the value only contributes the owner's public address.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::{LeaseNode, Subnet};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A lease node that cannot be turned into a route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The key's last path segment is not a `-`-encoded subnet.
    InvalidKey { key: String, reason: String },
    /// The value is not a JSON lease record.
    InvalidValue { key: String, reason: String },
    /// The record's `PublicIP` is not an IPv4 address.
    InvalidOwnerIp { key: String, value: String },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidKey { key, reason } => {
                write!(f, "lease key '{key}' is not a subnet: {reason}")
            }
            DecodeError::InvalidValue { key, reason } => {
                write!(f, "lease '{key}' has an undecodable value: {reason}")
            }
            DecodeError::InvalidOwnerIp { key, value } => {
                write!(f, "lease '{key}' has an invalid PublicIP '{value}'")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// ---------------------------------------------------------------------------
// Key <-> subnet
// ---------------------------------------------------------------------------

/// Derive the subnet a lease key refers to.
pub fn subnet_from_key(key: &str) -> Result<Subnet, DecodeError> {
    let base = key.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    base.replace('-', "/")
        .parse()
        .map_err(|e: crate::SubnetParseError| DecodeError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Store key for `subnet` under `prefix`. Inverse of [`subnet_from_key`].
pub fn lease_key(prefix: &str, subnet: &Subnet) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        subnet.to_string().replace('/', "-")
    )
}

// ---------------------------------------------------------------------------
// Record body
// ---------------------------------------------------------------------------

/// JSON body written by each host agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaseAttrs {
    #[serde(rename = "PublicIP")]
    pub public_ip: String,
    #[serde(rename = "BackendType", default, skip_serializing_if = "Option::is_none")]
    pub backend_type: Option<String>,
    #[serde(rename = "BackendData", default, skip_serializing_if = "Option::is_none")]
    pub backend_data: Option<serde_json::Value>,
}

/// A decoded lease: `owner_ip` owns `subnet`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LeaseRecord {
    pub owner_ip: Ipv4Addr,
    pub subnet: Subnet,
}

/// Decode a single node. Each node is decoded independently.
pub fn decode_lease(key: &str, value: &str) -> Result<LeaseRecord, DecodeError> {
    let subnet = subnet_from_key(key)?;
    let attrs: LeaseAttrs = serde_json::from_str(value).map_err(|e| DecodeError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    let owner_ip = attrs
        .public_ip
        .trim()
        .parse()
        .map_err(|_| DecodeError::InvalidOwnerIp {
            key: key.to_string(),
            value: attrs.public_ip.clone(),
        })?;
    Ok(LeaseRecord { owner_ip, subnet })
}

/// Minimal record body for `owner_ip`, as a host agent would write it.
pub fn encode_lease_value(owner_ip: Ipv4Addr) -> String {
    let attrs = LeaseAttrs {
        public_ip: owner_ip.to_string(),
        backend_type: None,
        backend_data: None,
    };
    // A struct of plain strings always serializes.
    serde_json::to_string(&attrs).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Desired state
// ---------------------------------------------------------------------------

/// The route set implied by the current leases: owner ip -> subnet.
///
/// At most one subnet per owner. If the store holds two leases for the same
/// owner, the one read last wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DesiredRoutes {
    routes: BTreeMap<Ipv4Addr, Subnet>,
}

impl DesiredRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode every node. The first undecodable node fails the whole set.
    pub fn from_nodes(nodes: &[LeaseNode]) -> Result<Self, DecodeError> {
        let mut out = Self::new();
        for node in nodes {
            let lease = decode_lease(&node.key, &node.value)?;
            out.insert(lease.owner_ip, lease.subnet);
        }
        Ok(out)
    }

    pub fn insert(&mut self, owner_ip: Ipv4Addr, subnet: Subnet) -> Option<Subnet> {
        self.routes.insert(owner_ip, subnet)
    }

    pub fn remove(&mut self, owner_ip: &Ipv4Addr) -> Option<Subnet> {
        self.routes.remove(owner_ip)
    }

    pub fn get(&self, owner_ip: &Ipv4Addr) -> Option<&Subnet> {
        self.routes.get(owner_ip)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, Ipv4Addr, Subnet> {
        self.routes.iter()
    }
}

impl FromIterator<(Ipv4Addr, Subnet)> for DesiredRoutes {
    fn from_iter<I: IntoIterator<Item = (Ipv4Addr, Subnet)>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a DesiredRoutes {
    type Item = (&'a Ipv4Addr, &'a Subnet);
    type IntoIter = btree_map::Iter<'a, Ipv4Addr, Subnet>;

    fn into_iter(self) -> Self::IntoIter {
        self.routes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_comes_from_last_key_segment() {
        let s = subnet_from_key("/coreos.com/network/subnets/10.1.15.0-24").unwrap();
        assert_eq!(s.to_string(), "10.1.15.0/24");
    }

    #[test]
    fn lease_key_inverts_subnet_from_key() {
        let s: Subnet = "10.244.3.0/24".parse().unwrap();
        let key = lease_key("/coreos.com/network/subnets/", &s);
        assert_eq!(key, "/coreos.com/network/subnets/10.244.3.0-24");
        assert_eq!(subnet_from_key(&key).unwrap(), s);
    }

    #[test]
    fn garbage_key_is_rejected() {
        let err = subnet_from_key("/coreos.com/network/subnets/config").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidKey { .. }));
    }

    #[test]
    fn key_with_host_bits_is_rejected() {
        let err = subnet_from_key("/coreos.com/network/subnets/10.1.0.5-24").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidKey { .. }), "got {err}");
    }

    #[test]
    fn decode_reads_public_ip_and_ignores_backend_fields() {
        let v = r#"{"PublicIP":"203.0.113.5","BackendType":"udp","BackendData":{"Port":8285}}"#;
        let lease = decode_lease("/p/subnets/10.1.0.0-24", v).unwrap();
        assert_eq!(lease.owner_ip, Ipv4Addr::new(203, 0, 113, 5));
        assert_eq!(lease.subnet.to_string(), "10.1.0.0/24");
    }

    #[test]
    fn decode_rejects_non_json_value() {
        let err = decode_lease("/p/subnets/10.1.0.0-24", "not json").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidValue { .. }));
    }

    #[test]
    fn decode_rejects_bad_public_ip() {
        let err = decode_lease("/p/subnets/10.1.0.0-24", r#"{"PublicIP":"nope"}"#).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidOwnerIp {
                key: "/p/subnets/10.1.0.0-24".to_string(),
                value: "nope".to_string(),
            }
        );
    }

    #[test]
    fn encoded_value_decodes_back() {
        let ip = Ipv4Addr::new(198, 51, 100, 7);
        let lease = decode_lease("/p/10.9.0.0-16", &encode_lease_value(ip)).unwrap();
        assert_eq!(lease.owner_ip, ip);
    }

    #[test]
    fn from_nodes_fails_on_first_bad_node() {
        let nodes = vec![
            LeaseNode::new("/p/10.1.0.0-24", r#"{"PublicIP":"203.0.113.5"}"#, 3),
            LeaseNode::new("/p/10.1.1.0-24", "{", 4),
        ];
        assert!(DesiredRoutes::from_nodes(&nodes).is_err());
    }

    #[test]
    fn from_nodes_last_read_wins_for_duplicate_owner() {
        let nodes = vec![
            LeaseNode::new("/p/10.1.0.0-24", r#"{"PublicIP":"203.0.113.5"}"#, 3),
            LeaseNode::new("/p/10.1.1.0-24", r#"{"PublicIP":"203.0.113.5"}"#, 4),
        ];
        let d = DesiredRoutes::from_nodes(&nodes).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(
            d.get(&Ipv4Addr::new(203, 0, 113, 5)).unwrap().to_string(),
            "10.1.1.0/24"
        );
    }
}
