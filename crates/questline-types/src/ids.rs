//! Type-safe identifier wrappers.
//!
//! Sessions and events carry UUID v7 identifiers (time-ordered, so analytics
//! batches sort naturally). Wallet addresses are opaque strings supplied by
//! the auth layer; they are validated once at the boundary and never
//! re-checked downstream.

use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::EventError;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

define_id! {
    /// Unique identifier for a play session (one per wallet connect).
    SessionId
}

define_id! {
    /// Unique identifier for an event published on the bus.
    EventId
}

/// Longest wallet address accepted at the boundary.
const MAX_WALLET_LEN: usize = 128;

/// A wallet address as reported by the auth layer.
///
/// The address is kept verbatim (no case folding) because some chains use
/// case-sensitive encodings. Construction goes through [`WalletAddress::parse`],
/// which is also what deserialization uses.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Validate and wrap a wallet address.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidWallet`] if the address is empty, contains
    /// whitespace, or is longer than 128 characters.
    pub fn parse(raw: &str) -> Result<Self, EventError> {
        if raw.is_empty() {
            return Err(EventError::InvalidWallet("address is empty".to_owned()));
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(EventError::InvalidWallet(format!(
                "address contains whitespace: {raw:?}"
            )));
        }
        if raw.len() > MAX_WALLET_LEN {
            return Err(EventError::InvalidWallet(format!(
                "address longer than {MAX_WALLET_LEN} characters"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    /// Borrow the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.into_inner().to_string());
    }

    #[test]
    fn wallet_rejects_empty_and_whitespace() {
        assert!(WalletAddress::parse("").is_err());
        assert!(WalletAddress::parse("0xabc def").is_err());
        assert!(WalletAddress::parse(&"a".repeat(129)).is_err());
        assert_eq!(WalletAddress::parse("0xAbC").unwrap().as_str(), "0xAbC");
    }

    #[test]
    fn wallet_deserialization_validates() {
        let ok: Result<WalletAddress, _> = serde_json::from_str("\"0x1234\"");
        assert!(ok.is_ok());
        let bad: Result<WalletAddress, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }
}
