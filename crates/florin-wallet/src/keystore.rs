//! In-memory keystore with a reserve keypool.

use crate::{WalletError, WalletResult};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use florin_chain::{Script, OP_CHECKSIG};
use parking_lot::{Mutex, RwLock};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::collections::VecDeque;

/// A spend destination: an ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Destination(pub [u8; 32]);

impl Destination {
    /// The pay-to-pubkey script for this destination.
    pub fn script_pubkey(&self) -> Script {
        let mut script = Script::new();
        script.push_slice(&self.0).push_opcode(OP_CHECKSIG);
        script
    }

    /// Extract the destination from a pay-to-pubkey script, if it is one.
    pub fn from_script(script: &Script) -> Option<Self> {
        let bytes = script.as_bytes();
        if bytes.len() == 34 && bytes[0] == 32 && bytes[33] == OP_CHECKSIG {
            Some(Self(bytes[1..33].try_into().ok()?))
        } else {
            None
        }
    }
}

/// Key storage plus the keypool of pre-generated destinations.
pub struct KeyStore {
    keys: RwLock<HashMap<[u8; 32], SigningKey>>,
    keypool: Mutex<VecDeque<[u8; 32]>>,
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            keypool: Mutex::new(VecDeque::new()),
        }
    }

    /// Generate `count` fresh keys into the keypool.
    pub fn top_up(&self, count: usize) {
        let mut keys = self.keys.write();
        let mut keypool = self.keypool.lock();
        for _ in 0..count {
            let signing = SigningKey::generate(&mut OsRng);
            let pubkey = signing.verifying_key().to_bytes();
            keys.insert(pubkey, signing);
            keypool.push_back(pubkey);
        }
    }

    /// Number of unreserved destinations left.
    pub fn keypool_size(&self) -> usize {
        self.keypool.lock().len()
    }

    /// Reserve the next destination from the keypool.
    pub fn reserve(&self) -> WalletResult<Destination> {
        self.keypool
            .lock()
            .pop_front()
            .map(Destination)
            .ok_or(WalletError::KeypoolExhausted)
    }

    /// Whether this store holds the key for a destination.
    pub fn owns(&self, destination: &Destination) -> bool {
        self.keys.read().contains_key(&destination.0)
    }

    /// Sign a message with the key of the given destination.
    pub fn sign(&self, destination: &Destination, message: &[u8]) -> WalletResult<Vec<u8>> {
        let keys = self.keys.read();
        let signing = keys.get(&destination.0).ok_or(WalletError::NotOurs)?;
        Ok(signing.sign(message).to_bytes().to_vec())
    }

    /// Verify a signature against a destination's public key.
    pub fn verify(destination: &Destination, message: &[u8], signature: &[u8]) -> bool {
        let Ok(verifying) = VerifyingKey::from_bytes(&destination.0) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        verifying.verify(message, &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_drains_keypool() {
        let store = KeyStore::new();
        store.top_up(2);
        assert_eq!(store.keypool_size(), 2);

        let first = store.reserve().unwrap();
        let second = store.reserve().unwrap();
        assert_ne!(first, second);
        assert!(matches!(
            store.reserve(),
            Err(WalletError::KeypoolExhausted)
        ));
        // Reserved keys stay usable for signing.
        assert!(store.owns(&first));
    }

    #[test]
    fn test_sign_and_verify() {
        let store = KeyStore::new();
        store.top_up(1);
        let dest = store.reserve().unwrap();

        let signature = store.sign(&dest, b"message").unwrap();
        assert!(KeyStore::verify(&dest, b"message", &signature));
        assert!(!KeyStore::verify(&dest, b"other", &signature));
    }

    #[test]
    fn test_script_round_trip() {
        let store = KeyStore::new();
        store.top_up(1);
        let dest = store.reserve().unwrap();

        let script = dest.script_pubkey();
        assert_eq!(Destination::from_script(&script), Some(dest));
        assert_eq!(script.sigop_count(), 1);
    }
}
