use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use getrandom::fill;
use zeroize::Zeroizing;

use super::{NONCE_LEN, SecretKey};
use crate::error::{VaultError, VaultResult};

/// Fill buffer with cryptographically secure random bytes
pub fn secure_random(buf: &mut [u8]) -> VaultResult<()> {
    fill(buf).map_err(|_| VaultError::RandomUnavailable)
}

/// Encrypt plaintext under `key` with the caller-supplied nonce
pub fn seal(key: &SecretKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> VaultResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    cipher
        .encrypt(XNonce::from_slice(nonce), plaintext)
        .map_err(|_| VaultError::Encryption)
}

/// Decrypt and authenticate ciphertext
pub fn open(
    key: &SecretKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> VaultResult<Zeroizing<Vec<u8>>> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::DecryptionIntegrityFailure)?;
    Ok(Zeroizing::new(plaintext))
}
