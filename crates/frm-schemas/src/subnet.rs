use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// An IPv4 CIDR block such as `10.1.15.0/24`.
///
/// Host bits must be zero, so every network has exactly one `Subnet` value
/// and one canonical text form (and therefore one route name).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subnet(Ipv4Net);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubnetParseError {
    Invalid(String),
    HostBitsSet(String),
}

impl fmt::Display for SubnetParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetParseError::Invalid(s) => {
                write!(f, "subnet '{s}' is not an IPv4 CIDR (expected a.b.c.d/0-32)")
            }
            SubnetParseError::HostBitsSet(s) => {
                write!(f, "subnet '{s}' has host bits set")
            }
        }
    }
}

impl std::error::Error for SubnetParseError {}

impl Subnet {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, SubnetParseError> {
        let net = Ipv4Net::new(addr, prefix_len)
            .map_err(|_| SubnetParseError::Invalid(format!("{addr}/{prefix_len}")))?;
        Self::from_net(net)
    }

    fn from_net(net: Ipv4Net) -> Result<Self, SubnetParseError> {
        if net.trunc() != net {
            return Err(SubnetParseError::HostBitsSet(net.to_string()));
        }
        Ok(Self(net))
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    pub fn net(&self) -> Ipv4Net {
        self.0
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Subnet {
    type Err = SubnetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let net: Ipv4Net = s
            .parse()
            .map_err(|_| SubnetParseError::Invalid(s.to_string()))?;
        Self::from_net(net)
    }
}

impl Serialize for Subnet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Subnet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
