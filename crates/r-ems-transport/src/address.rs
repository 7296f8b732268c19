//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport implementations for messaging layers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use crate::TransportError;

/// Endpoint understood by the bundled transports.
///
/// Addresses use URL syntax: `inproc://<name>` for the in-process channel
/// transport and `tcp://<host>:<port>` for TCP. A `*` host on a TCP listen
/// address binds every interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// Named rendezvous point inside the current process.
    InProc(String),
    /// `host:port` pair for the TCP transport.
    Tcp(String),
}

impl Address {
    /// URL scheme of the address.
    pub fn scheme(&self) -> &'static str {
        match self {
            Address::InProc(_) => "inproc",
            Address::Tcp(_) => "tcp",
        }
    }

    /// Scheme-specific part (inproc name or `host:port`).
    pub fn target(&self) -> &str {
        match self {
            Address::InProc(name) => name,
            Address::Tcp(host) => host,
        }
    }
}

impl FromStr for Address {
    type Err = TransportError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| TransportError::InvalidAddress(format!("missing scheme in '{raw}'")))?;
        if rest.is_empty() {
            return Err(TransportError::InvalidAddress(format!(
                "missing endpoint in '{raw}'"
            )));
        }
        match scheme.to_ascii_lowercase().as_str() {
            "inproc" => Ok(Address::InProc(rest.to_owned())),
            "tcp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(|| {
                    TransportError::InvalidAddress(format!("tcp address '{raw}' needs a port"))
                })?;
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(TransportError::InvalidAddress(format!(
                        "tcp address '{raw}' must be host:port"
                    )));
                }
                Ok(Address::Tcp(rest.to_owned()))
            }
            other => Err(TransportError::InvalidAddress(format!(
                "unsupported scheme '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_schemes() {
        let inproc: Address = "inproc://bus-a".parse().unwrap();
        assert_eq!(inproc, Address::InProc("bus-a".into()));
        assert_eq!(inproc.to_string(), "inproc://bus-a");

        let tcp: Address = "tcp://127.0.0.1:5555".parse().unwrap();
        assert_eq!(tcp.scheme(), "tcp");
        assert_eq!(tcp.target(), "127.0.0.1:5555");

        let wildcard: Address = "tcp://*:7000".parse().unwrap();
        assert_eq!(wildcard.target(), "*:7000");
    }

    #[test]
    fn rejects_malformed_addresses() {
        for raw in ["bus-a", "inproc://", "tcp://localhost", "tcp://:80", "ipc:///tmp/x"] {
            assert!(
                matches!(raw.parse::<Address>(), Err(TransportError::InvalidAddress(_))),
                "{raw} should be rejected"
            );
        }
    }
}
