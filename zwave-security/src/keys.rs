//! Network key and derived key sets
//!
//! A network key never encrypts anything directly. Two subkeys are derived
//! from it by encrypting fixed blocks:
//! ```text
//! auth_key = AES(network_key, 0x55 * 16)
//! enc_key  = AES(network_key, 0xAA * 16)
//! ```
//! The context keeps two sets at once: one from the real network key and one
//! from the all-zero bootstrap key used while a node is being included.

use crate::cipher::{encrypt_block, Block};
use crate::constants::{AUTH_KEY_CONSTANT, ENC_KEY_CONSTANT, KEY_SIZE};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};
use zwave_core::{ZwError, ZwResult};

/// 16-byte network key shared by all secure nodes
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct NetworkKey([u8; KEY_SIZE]);

impl NetworkKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// The all-zero key used for the key exchange during inclusion
    pub fn bootstrap() -> Self {
        Self([0u8; KEY_SIZE])
    }

    /// Create a key from a slice
    ///
    /// # Errors
    /// Returns `InvalidData` unless `bytes` is exactly 16 bytes long.
    pub fn from_slice(bytes: &[u8]) -> ZwResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(ZwError::InvalidData(format!(
                "Network key must be {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    pub fn is_bootstrap(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NetworkKey(..)")
    }
}

/// Authentication and encryption subkeys of one network key
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeySet {
    auth_key: Block,
    enc_key: Block,
}

impl DerivedKeySet {
    /// Derive both subkeys from a network key
    pub fn derive(network_key: &NetworkKey) -> Self {
        Self {
            auth_key: encrypt_block(network_key.as_bytes(), &AUTH_KEY_CONSTANT),
            enc_key: encrypt_block(network_key.as_bytes(), &ENC_KEY_CONSTANT),
        }
    }

    /// Key for the CBC-MAC
    pub fn auth_key(&self) -> &Block {
        &self.auth_key
    }

    /// Key for the OFB payload encryption
    pub fn enc_key(&self) -> &Block {
        &self.enc_key
    }
}

impl fmt::Debug for DerivedKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKeySet(..)")
    }
}

/// Which derived key set secures a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySlot {
    /// Keys derived from the all-zero bootstrap key
    Bootstrap,
    /// Keys derived from the real network key
    Network,
}

/// Both key sets held by a security context
pub struct KeyStore {
    network_key: Option<NetworkKey>,
    network: Option<DerivedKeySet>,
    bootstrap: DerivedKeySet,
}

impl KeyStore {
    /// Create a store holding only the bootstrap set
    pub fn new() -> Self {
        Self {
            network_key: None,
            network: None,
            bootstrap: DerivedKeySet::derive(&NetworkKey::bootstrap()),
        }
    }

    /// Install a network key, replacing (and wiping) any previous one
    pub fn install(&mut self, key: NetworkKey) {
        self.network = Some(DerivedKeySet::derive(&key));
        self.network_key = Some(key);
    }

    /// Forget the network key
    pub fn clear_network(&mut self) {
        self.network = None;
        self.network_key = None;
    }

    pub fn network_key(&self) -> Option<&NetworkKey> {
        self.network_key.as_ref()
    }

    pub fn has_network_key(&self) -> bool {
        self.network.is_some()
    }

    /// Key set for a slot
    ///
    /// # Errors
    /// Returns `KeyMissing` for [`KeySlot::Network`] before a key is installed.
    pub fn get(&self, slot: KeySlot) -> ZwResult<&DerivedKeySet> {
        match slot {
            KeySlot::Bootstrap => Ok(&self.bootstrap),
            KeySlot::Network => self.network.as_ref().ok_or(ZwError::KeyMissing),
        }
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("has_network_key", &self.has_network_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_key_derivation() {
        let key = NetworkKey::bootstrap();
        let set = DerivedKeySet::derive(&key);
        assert_eq!(set.auth_key(), &encrypt_block(&[0u8; 16], &[0x55u8; 16]));
        assert_eq!(set.enc_key(), &encrypt_block(&[0u8; 16], &[0xAAu8; 16]));
        assert_ne!(set.auth_key(), set.enc_key());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let key = NetworkKey::new([0x11; 16]);
        assert!(DerivedKeySet::derive(&key) == DerivedKeySet::derive(&key));
    }

    #[test]
    fn test_one_byte_changes_both_subkeys() {
        let base = DerivedKeySet::derive(&NetworkKey::bootstrap());
        let mut bytes = [0u8; 16];
        bytes[15] = 0x01;
        let changed = DerivedKeySet::derive(&NetworkKey::new(bytes));
        assert_ne!(base.auth_key(), changed.auth_key());
        assert_ne!(base.enc_key(), changed.enc_key());
    }

    #[test]
    fn test_key_store_slots() {
        let mut store = KeyStore::new();
        assert!(store.get(KeySlot::Bootstrap).is_ok());
        assert_eq!(store.get(KeySlot::Network).unwrap_err(), ZwError::KeyMissing);

        store.install(NetworkKey::new([7; 16]));
        assert!(store.has_network_key());
        assert!(store.get(KeySlot::Network).unwrap() != store.get(KeySlot::Bootstrap).unwrap());

        store.clear_network();
        assert!(store.network_key().is_none());
    }

    #[test]
    fn test_key_from_slice() {
        assert!(NetworkKey::from_slice(&[0u8; 15]).is_err());
        assert!(NetworkKey::from_slice(&[0u8; 16]).unwrap().is_bootstrap());
        assert_eq!(format!("{:?}", NetworkKey::new([1; 16])), "NetworkKey(..)");
    }
}
