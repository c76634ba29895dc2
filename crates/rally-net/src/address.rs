//! Endpoint address derivation.
//!
//! A host registers `<host_prefix><code>`, which any joiner can rebuild from
//! the room code alone. Joiners register
//! `<join_prefix><code>-<unix millis>-<random hex>` so two joiners using the
//! same code never ask for the same address.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::room_code::RoomCode;

/// An address registered with a transport provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointAddress(String);

impl EndpointAddress {
    /// Wrap an arbitrary address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role-specific address prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressScheme {
    /// Prefix for host endpoints.
    pub host_prefix: String,
    /// Prefix for joiner endpoints.
    pub join_prefix: String,
}

impl Default for AddressScheme {
    fn default() -> Self {
        Self {
            host_prefix: "rally-host-".to_string(),
            join_prefix: "rally-join-".to_string(),
        }
    }
}

impl AddressScheme {
    /// Address a host registers for `code`. Pure function of the code.
    pub fn host_address(&self, code: &RoomCode) -> EndpointAddress {
        EndpointAddress(format!("{}{}", self.host_prefix, code))
    }

    /// A fresh joiner address for `code`.
    pub fn join_address(&self, code: &RoomCode) -> EndpointAddress {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let nonce: u32 = rand::rng().random();
        self.join_address_with_token(code, millis, nonce)
    }

    fn join_address_with_token(&self, code: &RoomCode, millis: u128, nonce: u32) -> EndpointAddress {
        EndpointAddress(format!("{}{code}-{millis}-{nonce:08x}", self.join_prefix))
    }
}
