//! Endpoint addressing (`tcp://<host>:<port>`)

use std::fmt;
use std::str::FromStr;

use crate::{Result, StreamError};

/// Default port for publishers and subscribers.
pub const DEFAULT_PORT: u16 = 1936;

const WILDCARD_HOST: &str = "*";
const SCHEME: &str = "tcp://";

/// A TCP pub/sub endpoint.
///
/// Publishers bind a wildcard host (`tcp://*:1936`); subscribers connect to a
/// concrete host (`tcp://127.0.0.1:1936`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Wildcard endpoint for binding on every interface.
    pub fn wildcard(port: u16) -> Self {
        Self::new(WILDCARD_HOST, port)
    }

    /// Parse `tcp://host:port`, `host:port`, or a bare `host` (default port).
    ///
    /// IPv6 hosts must be bracketed: `tcp://[::1]:1936`.
    pub fn parse(endpoint: &str) -> Result<Self> {
        let rest = match endpoint.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some((scheme, _)) => {
                return Err(StreamError::invalid_endpoint(
                    endpoint,
                    format!("unsupported transport '{scheme}', only tcp is available"),
                ));
            }
            None => endpoint,
        };

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| StreamError::invalid_endpoint(endpoint, "unterminated '['"))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => {
                    return Err(StreamError::invalid_endpoint(endpoint, "junk after IPv6 host"));
                }
            }
        } else {
            match rest.split_once(':') {
                Some((_, port)) if port.contains(':') => {
                    return Err(StreamError::invalid_endpoint(
                        endpoint,
                        "IPv6 hosts must be written as [addr]:port",
                    ));
                }
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(StreamError::invalid_endpoint(endpoint, "missing host"));
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|e| {
                StreamError::invalid_endpoint(endpoint, format!("invalid port '{port}': {e}"))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_wildcard(&self) -> bool {
        self.host == WILDCARD_HOST
    }

    /// Socket address to bind; the wildcard host maps to `0.0.0.0`.
    pub fn bind_address(&self) -> String {
        if self.is_wildcard() {
            format!("0.0.0.0:{}", self.port)
        } else {
            self.socket_address()
        }
    }

    /// Socket address to connect to; a wildcard host cannot be connected to.
    pub fn connect_address(&self) -> Result<String> {
        if self.is_wildcard() {
            return Err(StreamError::invalid_endpoint(
                self.to_string(),
                "subscribers must connect to a concrete host",
            ));
        }
        Ok(self.socket_address())
    }

    fn socket_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}", self.socket_address())
    }
}

impl FromStr for Endpoint {
    type Err = StreamError;

    fn from_str(endpoint: &str) -> Result<Self> {
        Self::parse(endpoint)
    }
}
