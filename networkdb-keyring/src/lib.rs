//! # Gossip transport key ring
//!
//! A small sorted list of symmetric keys used to encrypt/authenticate
//! gossip transport frames (§4.9). Exactly one key is ever "primary" — the
//! one new outbound frames get encrypted with — while older keys are kept
//! around so frames encrypted by a peer that hasn't rotated yet can still
//! be decrypted.
//!
//! Keys are never removed while primary: callers must promote a
//! replacement first. This mirrors the teacher's security-config mutation
//! guards (`networkdb-keyring` started life as `aerolithdb-security`,
//! which guarded every sensitive mutation the same way).

use std::sync::RwLock;

use chacha20poly1305::aead::{Aead, KeyInit, OsRng};
use chacha20poly1305::{AeadCore, ChaCha20Poly1305, Key, Nonce};
use networkdb_protocol::LamportTime;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyRingError {
    #[error("key ring is empty, no primary key set")]
    NoPrimaryKey,
    #[error("cannot remove the primary key; promote a replacement first")]
    CannotRemovePrimary,
    #[error("no such key")]
    NoSuchKey,
    #[error("decryption failed under every known key")]
    DecryptFailed,
}

#[derive(Debug, Clone)]
pub struct GossipKey {
    pub bytes: [u8; 32],
    pub ltime: LamportTime,
}

impl GossipKey {
    pub fn new(bytes: [u8; 32], ltime: LamportTime) -> Self {
        Self { bytes, ltime }
    }
}

struct Inner {
    keys: Vec<GossipKey>,
    primary: usize,
}

/// Sorted list of gossip encryption keys with one primary.
pub struct KeyRing {
    inner: RwLock<Inner>,
}

impl Default for KeyRing {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                keys: Vec::new(),
                primary: 0,
            }),
        }
    }
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the ring with a single primary key, typically at startup.
    pub fn with_primary(key: GossipKey) -> Self {
        Self {
            inner: RwLock::new(Inner {
                keys: vec![key],
                primary: 0,
            }),
        }
    }

    /// Add a key, unless one with identical bytes is already in the ring —
    /// a repeated rotation announcement for the same key must not create a
    /// duplicate entry.
    pub fn add_key(&self, key: GossipKey) {
        let mut inner = self.inner.write().unwrap();
        if inner.keys.iter().any(|k| k.bytes == key.bytes) {
            return;
        }
        inner.keys.push(key);
    }

    /// Remove a non-primary key. Errors if `bytes` names the current primary.
    pub fn remove_key(&self, bytes: &[u8; 32]) -> Result<(), KeyRingError> {
        let mut inner = self.inner.write().unwrap();
        let idx = inner
            .keys
            .iter()
            .position(|k| &k.bytes == bytes)
            .ok_or(KeyRingError::NoSuchKey)?;
        if idx == inner.primary {
            return Err(KeyRingError::CannotRemovePrimary);
        }
        inner.keys.remove(idx);
        if inner.primary > idx {
            inner.primary -= 1;
        }
        Ok(())
    }

    /// Promote an already-known key to primary.
    pub fn use_key(&self, bytes: &[u8; 32]) -> Result<(), KeyRingError> {
        let mut inner = self.inner.write().unwrap();
        let idx = inner
            .keys
            .iter()
            .position(|k| &k.bytes == bytes)
            .ok_or(KeyRingError::NoSuchKey)?;
        inner.primary = idx;
        Ok(())
    }

    pub fn primary_key(&self) -> Result<GossipKey, KeyRingError> {
        let inner = self.inner.read().unwrap();
        inner.keys.get(inner.primary).cloned().ok_or(KeyRingError::NoPrimaryKey)
    }

    /// Keys sorted by the time they were added, with the first two
    /// elements swapped after sorting.
    ///
    /// This reproduces an undocumented quirk rather than the "obviously
    /// intended" plain ascending order: callers (including key rotation
    /// announcements sent to peers) rely on the primary key landing
    /// second in the list whenever it happens to sort first, and swapping
    /// unconditionally is what the reference behavior actually does. Do
    /// not "fix" this without checking every caller.
    pub fn get_keys(&self) -> Vec<GossipKey> {
        let inner = self.inner.read().unwrap();
        let mut keys = inner.keys.clone();
        keys.sort_by_key(|k| k.ltime);
        if keys.len() >= 2 {
            keys.swap(0, 1);
        }
        keys
    }

    /// Encrypt `plaintext` under the current primary key, returning
    /// `nonce ‖ ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyRingError> {
        let primary = self.primary_key()?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&primary.bytes));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| KeyRingError::DecryptFailed)?;
        let mut out = Vec::with_capacity(nonce.len() + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce ‖ ciphertext` frame, trying every known key (newest
    /// first) so a peer that hasn't rotated yet can still be understood.
    pub fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>, KeyRingError> {
        if framed.len() < 12 {
            return Err(KeyRingError::DecryptFailed);
        }
        let (nonce_bytes, ciphertext) = framed.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let inner = self.inner.read().unwrap();
        let mut candidates: Vec<&GossipKey> = inner.keys.iter().collect();
        candidates.sort_by_key(|k| std::cmp::Reverse(k.ltime));

        for key in candidates {
            let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.bytes));
            if let Ok(plaintext) = cipher.decrypt(nonce, ciphertext) {
                return Ok(plaintext);
            }
        }
        Err(KeyRingError::DecryptFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8, ltime: LamportTime) -> GossipKey {
        GossipKey::new([byte; 32], ltime)
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let ring = KeyRing::with_primary(key(1, 1));
        let ciphertext = ring.encrypt(b"hello gossip").unwrap();
        let plaintext = ring.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"hello gossip");
    }

    #[test]
    fn decrypt_falls_back_to_older_key_after_rotation() {
        let ring = KeyRing::with_primary(key(1, 1));
        let ciphertext = ring.encrypt(b"before rotation").unwrap();

        ring.add_key(key(2, 2));
        ring.use_key(&[2; 32]).unwrap();

        let plaintext = ring.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"before rotation");
    }

    #[test]
    fn cannot_remove_primary_key() {
        let ring = KeyRing::with_primary(key(1, 1));
        assert!(matches!(ring.remove_key(&[1; 32]), Err(KeyRingError::CannotRemovePrimary)));
    }

    #[test]
    fn add_key_is_idempotent_for_identical_bytes() {
        let ring = KeyRing::with_primary(key(1, 1));
        ring.add_key(key(2, 2));
        ring.add_key(key(2, 99));
        assert_eq!(ring.get_keys().len(), 2);
    }

    #[test]
    fn removing_a_non_primary_key_succeeds() {
        let ring = KeyRing::with_primary(key(1, 1));
        ring.add_key(key(2, 2));
        ring.remove_key(&[2; 32]).unwrap();
        assert_eq!(ring.get_keys().len(), 1);
    }

    #[test]
    fn get_keys_sorts_by_ltime_then_swaps_first_two() {
        let ring = KeyRing::with_primary(key(1, 3));
        ring.add_key(key(2, 1));
        ring.add_key(key(3, 2));

        let keys = ring.get_keys();
        // ascending ltime order would be [2, 3, 1]; swap(0, 1) makes it [3, 2, 1].
        assert_eq!(keys.iter().map(|k| k.bytes[0]).collect::<Vec<_>>(), vec![3, 2, 1]);
    }
}
