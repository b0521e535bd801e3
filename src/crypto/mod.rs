//! Cryptographic primitives for the vault.
//!
//! Provides key derivation, authenticated encryption, and the
//! [`CryptoProvider`] seam the rest of the crate is written against.

pub mod aead;
pub mod kdf;

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{VaultError, VaultResult};
pub use kdf::KdfParams;

/// Length of the salt (16 bytes).
pub const SALT_LEN: usize = 16;
/// Length of the nonce (24 bytes for XChaCha20-Poly1305).
pub const NONCE_LEN: usize = 24;
/// Length of the encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key. Wiped from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub(crate) fn zeroed() -> Self {
        Self([0u8; KEY_LEN])
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; KEY_LEN] {
        &mut self.0
    }

    /// Raw key bytes for escrow wrapping.
    pub fn export(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.0.to_vec())
    }

    /// Rebuilds a key from exported bytes.
    pub fn import(raw: &[u8]) -> VaultResult<Self> {
        let bytes: [u8; KEY_LEN] = raw
            .try_into()
            .map_err(|_| VaultError::DecryptionIntegrityFailure)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Capability interface over the primitive operations the vault needs.
///
/// [`SystemCrypto`] is the production implementation; tests may substitute a
/// deterministic one.
pub trait CryptoProvider: Send + Sync {
    fn fill_random(&self, buf: &mut [u8]) -> VaultResult<()>;

    fn derive_key(&self, password: &str, salt: &[u8], kdf: &KdfParams) -> VaultResult<SecretKey>;

    fn seal(&self, key: &SecretKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8])
    -> VaultResult<Vec<u8>>;

    fn open(
        &self,
        key: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> VaultResult<Zeroizing<Vec<u8>>>;

    fn generate_salt(&self) -> VaultResult<[u8; SALT_LEN]> {
        let mut salt = [0u8; SALT_LEN];
        self.fill_random(&mut salt)?;
        Ok(salt)
    }

    fn generate_nonce(&self) -> VaultResult<[u8; NONCE_LEN]> {
        let mut nonce = [0u8; NONCE_LEN];
        self.fill_random(&mut nonce)?;
        Ok(nonce)
    }

    fn generate_key(&self) -> VaultResult<SecretKey> {
        let mut key = SecretKey::zeroed();
        self.fill_random(key.as_mut_bytes())?;
        Ok(key)
    }
}

/// Argon2id + XChaCha20-Poly1305 over the OS random generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCrypto;

impl CryptoProvider for SystemCrypto {
    fn fill_random(&self, buf: &mut [u8]) -> VaultResult<()> {
        aead::secure_random(buf)
    }

    fn derive_key(&self, password: &str, salt: &[u8], kdf: &KdfParams) -> VaultResult<SecretKey> {
        kdf::derive_key(password, salt, kdf)
    }

    fn seal(
        &self,
        key: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> VaultResult<Vec<u8>> {
        aead::seal(key, nonce, plaintext)
    }

    fn open(
        &self,
        key: &SecretKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        aead::open(key, nonce, ciphertext)
    }
}
