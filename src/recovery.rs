//! Master key escrow under a recovery code.
//!
//! The escrow blob holds the raw master key encrypted under a key derived from
//! the recovery code and the vault salt. A second blob keeps the code itself
//! under the master key so the owner can look it up again later.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{CryptoProvider, KdfParams, SecretKey};
use crate::envelope::{Envelope, EnvelopeCipher};
use crate::error::{VaultError, VaultResult};

/// Random bytes behind one recovery code (16 hex digits).
pub const RECOVERY_CODE_BYTES: usize = 8;

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct EscrowPayload {
    master_key_raw: String,
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct CodePayload {
    recovery_code: String,
}

/// Generates a code like `AB12-CD34-EF56-7890`.
pub fn generate_recovery_code(crypto: &dyn CryptoProvider) -> VaultResult<Zeroizing<String>> {
    let mut bytes = Zeroizing::new([0u8; RECOVERY_CODE_BYTES]);
    crypto.fill_random(&mut bytes[..])?;
    Ok(format_recovery_code(&bytes[..]))
}

/// Uppercase hex in groups of four separated by dashes.
pub fn format_recovery_code(bytes: &[u8]) -> Zeroizing<String> {
    let hex = Zeroizing::new(
        bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<String>(),
    );
    let groups: Vec<&str> = hex
        .as_bytes()
        .chunks(4)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect();
    Zeroizing::new(groups.join("-"))
}

/// Trims and uppercases user input so transcription case does not matter.
pub fn normalize_recovery_code(input: &str) -> Zeroizing<String> {
    Zeroizing::new(input.trim().to_ascii_uppercase())
}

/// Encrypts the raw master key under `deriveKey(code, salt)`.
pub fn wrap_master_key(
    cipher: &EnvelopeCipher,
    master_key: &SecretKey,
    code: &str,
    salt: &[u8],
    kdf: &KdfParams,
) -> VaultResult<Envelope> {
    let recovery_key = cipher.crypto().derive_key(code, salt, kdf)?;
    let raw = master_key.export();
    let payload = EscrowPayload {
        master_key_raw: STANDARD.encode(raw.as_slice()),
    };
    cipher.encrypt(&payload, &recovery_key)
}

/// Recovers the master key from the escrow blob.
///
/// Every failure is reported as [`VaultError::InvalidRecoveryCode`].
pub fn unwrap_master_key(
    cipher: &EnvelopeCipher,
    escrow: &Envelope,
    code: &str,
    salt: &[u8],
    kdf: &KdfParams,
) -> VaultResult<SecretKey> {
    let recovery_key = cipher
        .crypto()
        .derive_key(code, salt, kdf)
        .map_err(|_| VaultError::InvalidRecoveryCode)?;
    let payload: EscrowPayload = cipher
        .decrypt(escrow, &recovery_key)
        .map_err(|_| VaultError::InvalidRecoveryCode)?;
    let raw = Zeroizing::new(
        STANDARD
            .decode(payload.master_key_raw.as_bytes())
            .map_err(|_| VaultError::InvalidRecoveryCode)?,
    );
    SecretKey::import(&raw).map_err(|_| VaultError::InvalidRecoveryCode)
}

/// Keeps a viewable copy of the code under the master key.
pub fn seal_code(cipher: &EnvelopeCipher, code: &str, master_key: &SecretKey) -> VaultResult<Envelope> {
    let payload = CodePayload {
        recovery_code: code.to_string(),
    };
    cipher.encrypt(&payload, master_key)
}

pub fn open_code(
    cipher: &EnvelopeCipher,
    blob: &Envelope,
    master_key: &SecretKey,
) -> VaultResult<Zeroizing<String>> {
    let payload: CodePayload = cipher.decrypt(blob, master_key)?;
    Ok(Zeroizing::new(payload.recovery_code.clone()))
}
