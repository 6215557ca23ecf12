//! Cipher factory contract backing the `Encrypted` envelope packet and the
//! `NetworkEncryptionCipher`/`NetworkEncryptionUpgrade` negotiation packets.
//!
//! `reliudp` has no cipher concept at all (it is plaintext-only); this
//! trait and its `aes-gcm` implementation are grounded on
//! `hxrts-bitchat-rs`/`happybigmtn-bitchat-rust`, which wrap an AEAD cipher
//! around a frame protocol the same way this envelope does.

use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, OsRng, rand_core::RngCore};
use aes_gcm::{Aes256Gcm, Nonce};
use sha2::{Digest, Sha256};

use crate::error::{CodecError, CodecResult};

const NONCE_LEN: usize = 12;
const FINGERPRINT_LEN: usize = 32;

/// One encrypt or decrypt operation bound to a fixed nonce.
///
/// AES-GCM is a one-shot AEAD, not a true streaming cipher, so `encrypt`/
/// `decrypt` each take the whole buffer; the envelope's "streaming" write
/// path still buffers the plaintext internally before calling this, a
/// simplification noted in `DESIGN.md`.
pub trait CipherSession: Send {
    fn encrypt(&mut self, plaintext: &[u8]) -> CodecResult<Vec<u8>>;
    fn decrypt(&mut self, ciphertext: &[u8]) -> CodecResult<Vec<u8>>;
}

/// Constructs cipher sessions and owns the settings-blob contract the
/// `Encrypted` envelope relies on to decide whether its cache is still
/// valid.
pub trait CipherFactory: Send + Sync {
    /// Builds a fresh encrypting session and the settings blob that must
    /// accompany the ciphertext (nonce, plus anything the peer needs to
    /// reconstruct a decrypting session).
    fn construct_encrypt(&self) -> CodecResult<(Box<dyn CipherSession>, Vec<u8>)>;

    /// Builds a decrypting session from a settings blob produced by
    /// `construct_encrypt`.
    fn construct_decrypt(&self, settings: &[u8]) -> CodecResult<Box<dyn CipherSession>>;

    /// Strips the secret-bearing portion out of a settings blob, leaving
    /// only what is safe to log or compare across calls.
    fn settings_without_secrets(&self, settings_with_secrets: &[u8]) -> Vec<u8>;

    /// Whether the factory's settings have changed since the last
    /// `construct_encrypt`/`apply_settings` call; used by the `Encrypted`
    /// envelope to decide whether a cached ciphertext is still valid.
    fn settings_modified(&self) -> bool;

    /// Applies externally-supplied settings (e.g. a rotated key) to this
    /// factory, marking it modified.
    fn apply_settings(&self, settings: &[u8]) -> CodecResult<()>;
}

struct AesGcmSession {
    cipher: Aes256Gcm,
    nonce: [u8; NONCE_LEN],
}

impl CipherSession for AesGcmSession {
    fn encrypt(&mut self, plaintext: &[u8]) -> CodecResult<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(&self.nonce), plaintext)
            .map_err(|e| CodecError::CipherFailure(e.to_string()))
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> CodecResult<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(&self.nonce), ciphertext)
            .map_err(|e| CodecError::CipherFailure(e.to_string()))
    }
}

/// `aes-gcm`-backed factory. The real 256-bit key never leaves the process;
/// the settings blob carries only a random nonce plus a digest "fingerprint"
/// of the key, honoring a "settings without secrets" contract.
pub struct AesGcmCipherFactory {
    key: [u8; 32],
    modified: Mutex<bool>,
}

impl AesGcmCipherFactory {
    pub fn new(key: [u8; 32]) -> Self {
        AesGcmCipherFactory { key, modified: Mutex::new(true) }
    }

    fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        let out = hasher.finalize();
        let mut buf = [0u8; FINGERPRINT_LEN];
        buf.copy_from_slice(&out);
        buf
    }
}

impl CipherFactory for AesGcmCipherFactory {
    fn construct_encrypt(&self) -> CodecResult<(Box<dyn CipherSession>, Vec<u8>)> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|e| CodecError::CipherFailure(e.to_string()))?;
        if let Ok(mut modified) = self.modified.lock() {
            *modified = false;
        }
        let mut settings = Vec::with_capacity(NONCE_LEN + FINGERPRINT_LEN);
        settings.extend_from_slice(&nonce);
        settings.extend_from_slice(&self.fingerprint());
        Ok((Box::new(AesGcmSession { cipher, nonce }), settings))
    }

    fn construct_decrypt(&self, settings: &[u8]) -> CodecResult<Box<dyn CipherSession>> {
        if settings.len() < NONCE_LEN {
            return Err(CodecError::CipherFailure(format!(
                "cipher settings blob too short: got {} bytes, need at least {}",
                settings.len(),
                NONCE_LEN
            )));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&settings[..NONCE_LEN]);
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|e| CodecError::CipherFailure(e.to_string()))?;
        Ok(Box::new(AesGcmSession { cipher, nonce }))
    }

    fn settings_without_secrets(&self, settings_with_secrets: &[u8]) -> Vec<u8> {
        settings_with_secrets[..settings_with_secrets.len().min(NONCE_LEN)].to_vec()
    }

    fn settings_modified(&self) -> bool {
        self.modified.lock().map(|m| *m).unwrap_or(true)
    }

    fn apply_settings(&self, _settings: &[u8]) -> CodecResult<()> {
        if let Ok(mut modified) = self.modified.lock() {
            *modified = true;
        }
        Ok(())
    }
}
