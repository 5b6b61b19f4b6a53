//! Connection view handed to the tap factory

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Read-only description of a proxied connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Connection identifier, also used as the trace id
    pub id: u64,

    /// Local (proxy side) address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_address: Option<SocketAddr>,

    /// Remote (peer) address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<SocketAddr>,

    /// Negotiated application protocol (e.g. ALPN "h2")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

impl ConnectionInfo {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            local_address: None,
            remote_address: None,
            protocol: None,
        }
    }

    pub fn with_local_address(mut self, addr: SocketAddr) -> Self {
        self.local_address = Some(addr);
        self
    }

    pub fn with_remote_address(mut self, addr: SocketAddr) -> Self {
        self.remote_address = Some(addr);
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn local_port(&self) -> Option<u16> {
        self.local_address.map(|a| a.port())
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_address.map(|a| a.port())
    }
}
