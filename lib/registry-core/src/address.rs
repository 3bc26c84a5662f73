//! Provider addresses and service names
use crate::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Path separator used by the coordination store
pub const PATH_SEPARATOR: char = '/';

/// Logical name a consumer resolves to one or more providers
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "service name must not be empty".to_string(),
            ));
        }
        if name.contains(PATH_SEPARATOR) {
            return Err(RegistryError::InvalidArgument(format!(
                "service name {:?} must not contain '{}'",
                name, PATH_SEPARATOR
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ServiceName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServiceName> for String {
    fn from(name: ServiceName) -> Self {
        name.0
    }
}

/// Network address of a single provider, canonically `host:port`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "address host must not be empty".to_string(),
            ));
        }
        if host.contains(PATH_SEPARATOR) {
            return Err(RegistryError::InvalidArgument(format!(
                "address host {:?} must not contain '{}'",
                host, PATH_SEPARATOR
            )));
        }
        if port == 0 {
            return Err(RegistryError::InvalidArgument(format!(
                "address port for {} must be in 1..=65535",
                host
            )));
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = RegistryError;

    /// Parse `host:port`; the last colon separates the port so bracketed
    /// IPv6 hosts like `[::1]:9000` are accepted
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            RegistryError::InvalidArgument(format!("address {:?} is not host:port", s))
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            RegistryError::InvalidArgument(format!("address {:?} has an invalid port", s))
        })?;
        Self::new(host, port)
    }
}

impl TryFrom<String> for Address {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl TryFrom<SocketAddr> for Address {
    type Error = RegistryError;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        let host = match addr {
            SocketAddr::V4(v4) => v4.ip().to_string(),
            SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
        };
        Self::new(host, addr.port())
    }
}
