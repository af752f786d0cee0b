//! frm-schemas
//!
//! Shared wire and domain types for the route manager: subnets, lease records
//! as they live in the store, watch events, and live routes as reported by a
//! cloud backend.
//!
//! Pure types and decoding only. No IO.

mod event;
mod lease;
mod route;
mod subnet;

pub use event::{LeaseNode, LeaseTree, WatchAction, WatchEvent};
pub use lease::{
    decode_lease, encode_lease_value, lease_key, subnet_from_key, DecodeError, DesiredRoutes,
    LeaseAttrs, LeaseRecord,
};
pub use route::{LiveRoute, NewRoute, DEFAULT_ROUTE_PRIORITY};
pub use subnet::{Subnet, SubnetParseError};
