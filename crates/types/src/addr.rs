//! Resource and account addresses.

use crate::{Hash, PublicKey};
use sbor::prelude::*;
use std::fmt;

/// Maximum length of a resource symbol.
pub const MAX_SYMBOL_LEN: usize = 35;

/// Length of the key-derived part of a hashed resource address.
pub const HASHED_KEY_BYTES: usize = 26;

/// An address on the ledger.
///
/// Resource addresses (`Native`, `HashedKey`) identify token definitions;
/// `Account` addresses hold tokens; `System` identifies the singleton
/// epoch/round state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub enum REAddr {
    /// The system address.
    System,
    /// The native token's resource address.
    Native,
    /// A resource address derived from its creator's key and symbol.
    HashedKey([u8; HASHED_KEY_BYTES]),
    /// An account controlled by a key.
    Account(PublicKey),
}

impl REAddr {
    /// Derive the resource address owned by `key` for `symbol`.
    pub fn of_hashed_key(key: &PublicKey, symbol: &str) -> Self {
        let hash = Hash::from_parts(&[key.as_bytes(), symbol.as_bytes()]);
        let mut bytes = [0u8; HASHED_KEY_BYTES];
        bytes.copy_from_slice(&hash.as_bytes()[..HASHED_KEY_BYTES]);
        REAddr::HashedKey(bytes)
    }

    /// Account address for a key.
    pub fn of_account(key: PublicKey) -> Self {
        REAddr::Account(key)
    }

    /// Whether `key` reproduces this hashed-key address for `symbol`.
    pub fn allows_create_with(&self, key: &PublicKey, symbol: &str) -> bool {
        *self == Self::of_hashed_key(key, symbol)
    }

    /// True for addresses that can name a token resource.
    pub fn is_resource(&self) -> bool {
        matches!(self, REAddr::Native | REAddr::HashedKey(_))
    }

    /// True for the native token.
    pub fn is_native(&self) -> bool {
        matches!(self, REAddr::Native)
    }

    /// True for accounts.
    pub fn is_account(&self) -> bool {
        matches!(self, REAddr::Account(_))
    }

    /// The controlling key of an account address.
    pub fn account_key(&self) -> Option<PublicKey> {
        match self {
            REAddr::Account(key) => Some(*key),
            _ => None,
        }
    }

    /// Canonical byte form: a one-byte tag followed by the payload.
    ///
    /// Used for index prefixes and virtual substate ids; the tags are part of
    /// the ledger format and must not change.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            REAddr::System => vec![0x00],
            REAddr::Native => vec![0x01],
            REAddr::HashedKey(bytes) => {
                let mut out = Vec::with_capacity(1 + HASHED_KEY_BYTES);
                out.push(0x03);
                out.extend_from_slice(bytes);
                out
            }
            REAddr::Account(key) => {
                let mut out = Vec::with_capacity(1 + PublicKey::BYTES);
                out.push(0x04);
                out.extend_from_slice(key.as_bytes());
                out
            }
        }
    }
}

impl fmt::Display for REAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            REAddr::System => write!(f, "system"),
            REAddr::Native => write!(f, "native"),
            REAddr::HashedKey(bytes) => write!(f, "resource_{}", hex::encode(bytes)),
            REAddr::Account(key) => write!(f, "account_{}", key.to_hex()),
        }
    }
}

/// Check a resource symbol: 1 to 35 characters of `[a-z0-9]`.
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    #[test]
    fn test_hashed_key_address_depends_on_key_and_symbol() {
        let alice = KeyPair::from_seed(1).unwrap().public_key();
        let bob = KeyPair::from_seed(2).unwrap().public_key();

        let addr = REAddr::of_hashed_key(&alice, "gold");
        assert!(addr.is_resource());
        assert!(addr.allows_create_with(&alice, "gold"));
        assert!(!addr.allows_create_with(&bob, "gold"));
        assert!(!addr.allows_create_with(&alice, "silver"));
    }

    #[test]
    fn test_byte_form_is_tagged() {
        let key = KeyPair::from_seed(3).unwrap().public_key();
        assert_eq!(REAddr::System.to_bytes(), vec![0x00]);
        assert_eq!(REAddr::Native.to_bytes(), vec![0x01]);
        assert_eq!(REAddr::of_account(key).to_bytes().len(), 34);
        assert_eq!(REAddr::of_hashed_key(&key, "x").to_bytes().len(), 27);
    }

    #[test]
    fn test_symbol_validation() {
        assert!(is_valid_symbol("xrd"));
        assert!(is_valid_symbol("abc123"));
        assert!(!is_valid_symbol(""));
        assert!(!is_valid_symbol("XRD"));
        assert!(!is_valid_symbol("a-b"));
        assert!(!is_valid_symbol(&"a".repeat(36)));
    }
}
