//! Network endpoint value type: an IP address plus a port.
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The address a node or peer can be reached at.
#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The raw address bytes, without the port. Write-tokens are bound to
    /// these bytes only, so an endpoint that re-announces from a different
    /// source port still holds a valid token.
    #[must_use]
    pub fn address_bytes(&self) -> Vec<u8> {
        match self.ip {
            IpAddr::V4(ip) => ip.octets().to_vec(),
            IpAddr::V6(ip) => ip.octets().to_vec(),
        }
    }

    #[must_use]
    pub fn with_port(&self, port: u16) -> Self {
        Self { ip: self.ip, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        SocketAddr::from(*self).fmt(f)
    }
}

impl FromStr for Endpoint {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s.parse()?;
        Ok(addr.into())
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        SocketAddr::new(endpoint.ip, endpoint.port)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use super::Endpoint;

    #[test]
    fn an_endpoint_can_be_parsed_from_an_ip_port_string() {
        let endpoint: Endpoint = "192.0.2.1:6881".parse().unwrap();

        assert_eq!(endpoint.ip, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
        assert_eq!(endpoint.port, 6881);
    }

    #[test]
    fn an_endpoint_should_round_trip_through_a_socket_address() {
        let endpoint: Endpoint = "203.0.113.9:51413".parse().unwrap();
        let addr: std::net::SocketAddr = endpoint.into();

        assert_eq!(Endpoint::from(addr), endpoint);
    }

    #[test]
    fn the_address_bytes_should_not_include_the_port() {
        let a = Endpoint::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)), 6881);
        let b = a.with_port(9999);

        assert_eq!(a.address_bytes(), b.address_bytes());
        assert_eq!(a.address_bytes(), vec![192, 0, 2, 1]);
    }

    #[test]
    fn the_address_bytes_of_an_ipv6_endpoint_should_be_sixteen_bytes() {
        let endpoint = Endpoint::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 6881);

        assert_eq!(endpoint.address_bytes().len(), 16);
    }
}
