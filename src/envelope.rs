//! Envelope encryption of single logical payloads.
//!
//! Wire shape: `{"ciphertext": <base64>, "iv": <base64>, "encrypted": true}`.
//! Values without the `encrypted` marker are legacy plaintext and pass
//! through [`EnvelopeCipher::decrypt_value`] untouched.

use std::sync::Arc;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use zeroize::Zeroizing;

use crate::crypto::{CryptoProvider, NONCE_LEN, SecretKey};
use crate::error::{VaultError, VaultResult};

/// Name of the marker field that distinguishes envelopes from legacy records.
pub const ENCRYPTED_MARKER: &str = "encrypted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    pub encrypted: bool,
}

impl Envelope {
    pub fn to_value(&self) -> VaultResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses a stored value as an envelope. Anything malformed is reported as
    /// an integrity failure.
    pub fn from_value(value: &Value) -> VaultResult<Self> {
        let envelope: Envelope = serde_json::from_value(value.clone())
            .map_err(|_| VaultError::DecryptionIntegrityFailure)?;
        if !envelope.encrypted {
            return Err(VaultError::DecryptionIntegrityFailure);
        }
        Ok(envelope)
    }
}

/// True when `value` carries the `encrypted: true` marker.
pub fn is_envelope(value: &Value) -> bool {
    matches!(value.get(ENCRYPTED_MARKER), Some(Value::Bool(true)))
}

/// Wraps and unwraps payloads under a caller-held key.
///
/// Holds no key and no mutable state, so one cipher can serve concurrent
/// callers working on independent records.
#[derive(Clone)]
pub struct EnvelopeCipher {
    crypto: Arc<dyn CryptoProvider>,
}

impl EnvelopeCipher {
    pub fn new(crypto: Arc<dyn CryptoProvider>) -> Self {
        Self { crypto }
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoProvider> {
        &self.crypto
    }

    pub fn encrypt<T: Serialize + ?Sized>(&self, payload: &T, key: &SecretKey) -> VaultResult<Envelope> {
        let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);
        let nonce = self.crypto.generate_nonce()?;
        let ciphertext = self.crypto.seal(key, &nonce, &plaintext)?;

        Ok(Envelope {
            ciphertext,
            iv: nonce.to_vec(),
            encrypted: true,
        })
    }

    pub fn decrypt<T: DeserializeOwned>(&self, envelope: &Envelope, key: &SecretKey) -> VaultResult<T> {
        if !envelope.encrypted {
            return Err(VaultError::DecryptionIntegrityFailure);
        }
        let nonce: [u8; NONCE_LEN] = envelope
            .iv
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::DecryptionIntegrityFailure)?;

        let plaintext = self.crypto.open(key, &nonce, &envelope.ciphertext)?;
        serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptionIntegrityFailure)
    }

    /// Decrypts a stored value, returning legacy plaintext values as they are.
    pub fn decrypt_value(&self, value: &Value, key: &SecretKey) -> VaultResult<Value> {
        if !is_envelope(value) {
            return Ok(value.clone());
        }
        let envelope = Envelope::from_value(value)?;
        self.decrypt(&envelope, key)
    }
}

pub(crate) mod b64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}
