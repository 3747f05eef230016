//! Authenticated encryption primitives shared by the key provider and the
//! envelope codec. Sealed bytes are laid out as `nonce || ciphertext+tag`.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CoreError;

pub const KEY_SIZE: usize = 32;

/// 96-bit nonce for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

const ROOT_WRAP_CONTEXT: &str = "portcullis 2026-10-01 root wrapping key";

fn random_key() -> Result<[u8; KEY_SIZE], CoreError> {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CoreError::Entropy(e.to_string()))?;
    Ok(bytes)
}

/// Root of trust for one controller. Never persisted by this crate.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RootKey {
    bytes: [u8; KEY_SIZE],
}

impl RootKey {
    pub fn generate() -> Result<Self, CoreError> {
        Ok(Self {
            bytes: random_key()?,
        })
    }

    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Key that wraps every data key minted for `purpose`.
    pub fn wrapping_key(&self, purpose: &str) -> DataKey {
        let mut hasher = blake3::Hasher::new_derive_key(ROOT_WRAP_CONTEXT);
        hasher.update(&self.bytes);
        hasher.update(purpose.as_bytes());
        DataKey {
            bytes: *hasher.finalize().as_bytes(),
        }
    }
}

/// A symmetric key used with ChaCha20-Poly1305 (zeroized on drop).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn generate() -> Result<Self, CoreError> {
        Ok(Self {
            bytes: random_key()?,
        })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let bytes: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidData(format!("key must be {KEY_SIZE} bytes")))?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Encrypt `plaintext`, binding `aad` into the tag.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CoreError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.bytes));
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CoreError::Entropy(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CoreError::Encryption(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CoreError> {
        if sealed.len() < NONCE_SIZE {
            return Err(CoreError::Authentication);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.bytes));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CoreError::Authentication)
    }
}
