//! Network interfaces of a node.

use crate::types::Address;

/// Which medium an interface is attached to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceKind {
    /// Shared radio channel; reachability comes from the link oracle.
    Wireless,
    /// Out-of-band wormhole channel between colluding endpoints.
    Tunnel,
}

impl InterfaceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InterfaceKind::Wireless => "wifi",
            InterfaceKind::Tunnel => "tunnel",
        }
    }
}

/// An addressed interface that can be brought up and down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    kind: InterfaceKind,
    address: Address,
    up: bool,
}

impl Interface {
    pub fn new(kind: InterfaceKind, address: Address) -> Self {
        Self {
            kind,
            address,
            up: true,
        }
    }

    pub fn kind(&self) -> InterfaceKind {
        self.kind
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_up(&self) -> bool {
        self.up
    }

    pub fn set_up(&mut self, up: bool) {
        self.up = up;
    }
}
